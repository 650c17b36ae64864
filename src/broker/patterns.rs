//! Request patterns and event topics shared across services. Patterns are
//! dot-separated verbs; replies travel on `<pattern>.reply`.

// user service patterns

pub const USER_GET_BY_ID: &str = "user.get.by.id";
pub const USER_GET_BY_EMAIL: &str = "user.get.by.email";
pub const USER_EXISTS: &str = "user.exists";
pub const USER_CREATE: &str = "user.create";

// auth service patterns

pub const AUTH_LOGIN: &str = "auth.login";
pub const AUTH_REGISTER: &str = "auth.register";
pub const AUTH_REFRESH_TOKEN: &str = "auth.refresh.token";
pub const AUTH_LOGOUT: &str = "auth.logout";
pub const AUTH_LOGOUT_ALL: &str = "auth.logout.all";
pub const AUTH_VALIDATE_TOKEN: &str = "auth.validate.token";
pub const AUTH_BLACKLIST_CHECK: &str = "auth.token.blacklist.check";

// fire-and-forget event topics

pub const TOPIC_USER_REGISTERED: &str = "auth.user.registered";
pub const TOPIC_USER_LOGGED_IN: &str = "auth.user.logged_in";
pub const TOPIC_USER_LOGGED_OUT: &str = "auth.user.logged_out";

pub fn reply_topic(pattern: &str) -> String {
    format!("{pattern}.reply")
}
