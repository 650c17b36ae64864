use crate::domain_model::UserId;
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate key")]
    Duplicate,
    #[error("store error: {0}")]
    Backend(String),
}

/// One issued refresh token. Keyed by a deterministic SHA-256 hex digest of
/// the token value so the store can look up by digest directly.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub token_digest: String,
    pub jti: String,
    pub user_id: UserId,
    pub is_revoked: bool,
    pub expires_at: DateTime<Utc>,
    pub device_id: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Jti/expiry pair of a record revoked by a bulk operation, for
/// blacklisting.
#[derive(Debug, Clone)]
pub struct RevokedToken {
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait RefreshTokenRepo: Send + Sync {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    async fn find_by_digest(&self, digest: &str)
    -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Conditional not-revoked -> revoked transition. Returns `true` iff
    /// this call flipped the record; `false` means a concurrent rotation
    /// already consumed it. Rotations may race from different processes, so
    /// the condition must be enforced by the store, not in memory.
    async fn consume(&self, digest: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Unconditional mark-revoked (logout path). Returns whether a record
    /// changed.
    async fn mark_revoked(&self, digest: &str) -> Result<bool, StoreError>;

    /// Revokes every active record for the user and reports their jtis.
    async fn revoke_all_for_user(&self, user_id: UserId)
    -> Result<Vec<RevokedToken>, StoreError>;

    /// Deletes records past expiry, plus revoked records unused since
    /// `revoked_before`.
    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
