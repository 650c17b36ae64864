use crate::domain_port::StoreError;

/// TTL-bounded set of revoked token ids. Eventually consistent: a jti
/// revoked an instant ago may still pass a concurrent in-flight check
/// elsewhere.
#[async_trait::async_trait]
pub trait RevocationStore: Send + Sync {
    /// Marks a jti revoked for `ttl_secs` (the token's remaining life).
    async fn put(&self, jti: &str, ttl_secs: u64) -> Result<(), StoreError>;

    async fn contains(&self, jti: &str) -> Result<bool, StoreError>;
}
