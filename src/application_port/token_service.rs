use crate::application_port::AuthError;
use crate::domain_model::{DeviceInfo, JwtClaims, UserId, UserRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity baked into issued token claims.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: UserId,
    pub username: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<UserRole>,
}

#[derive(Debug, Clone)]
pub struct IssuedRefresh {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatedTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[async_trait::async_trait]
pub trait TokenService: Send + Sync {
    async fn issue_access_token(&self, subject: &TokenSubject) -> Result<String, AuthError>;

    /// Signs a refresh token and persists its record keyed by digest.
    async fn issue_refresh_token(
        &self,
        subject: &TokenSubject,
        device: &DeviceInfo,
    ) -> Result<IssuedRefresh, AuthError>;

    /// Exactly-once exchange of a refresh token for a new pair. The
    /// presented token is consumed; a second rotation with the same value
    /// fails with `Unauthorized`.
    async fn rotate(
        &self,
        refresh_token: &str,
        device_id: Option<&str>,
    ) -> Result<RotatedTokens, AuthError>;

    /// Marks the record revoked and blacklists the jti. Returns whether a
    /// record actually changed.
    async fn revoke(&self, refresh_token: &str) -> Result<bool, AuthError>;

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<bool, AuthError>;

    /// Cache lookup; a cache error degrades to `false` (availability over
    /// strict enforcement).
    async fn is_blacklisted(&self, jti: &str) -> bool;

    async fn verify_access_token(&self, token: &str) -> Result<JwtClaims, AuthError>;

    /// Claims without signature/expiry enforcement, for non-authoritative
    /// reads (e.g. digging a jti out of a token being revoked).
    fn decode_unverified(&self, token: &str) -> Option<JwtClaims>;

    /// Housekeeping: drop expired and long-revoked records. Returns the
    /// number deleted.
    async fn cleanup_expired(&self) -> Result<u64, AuthError>;
}
