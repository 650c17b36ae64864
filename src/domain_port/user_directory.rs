use crate::application_port::AuthError;
use crate::domain_model::{UserId, UserRole, UserStatus};
use serde::{Deserialize, Serialize};

/// User projection as returned by the user service. `password_hash` is only
/// present on lookups that serve credential checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub is_verified: bool,
    pub status: UserStatus,
    pub roles: Vec<UserRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub email: String,
    /// Already hashed; the plaintext never crosses the broker.
    pub password: String,
    pub roles: Vec<UserRole>,
    pub is_verified: bool,
    pub status: UserStatus,
}

/// User data owned by another service, reached over the broker.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, email: &str, username: &str) -> Result<bool, AuthError>;

    async fn find_by_identifier(
        &self,
        username_or_email: &str,
    ) -> Result<Option<UserRecord>, AuthError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, AuthError>;

    async fn create(&self, user: NewUser) -> Result<UserRecord, AuthError>;
}
