use crate::domain_model::{UserId, UserRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claim set shared by access and refresh tokens. `jti` is unique per
/// issuance and is the key revocation operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtClaims {
    pub sub: String,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub roles: Vec<UserRole>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

impl JwtClaims {
    /// Seconds of validity left relative to `now` (unix seconds); zero once
    /// past expiry.
    pub fn remaining_secs(&self, now: i64) -> u64 {
        (self.exp - now).max(0) as u64
    }
}
