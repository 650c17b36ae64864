use crate::domain_port::{RevocationStore, StoreError};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

const REVOKED_MARKER: &str = "revoked";

/// Blacklist entries live under `<prefix><jti>` with a TTL equal to the
/// token's remaining life, so the cache never outgrows the tokens it covers.
pub struct RedisRevocationStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisRevocationStore {
    pub fn new(conn: redis::aio::ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisRevocationStore {
            conn,
            prefix: prefix.into(),
        }
    }

    fn key(&self, jti: &str) -> String {
        format!("{}{}", self.prefix, jti)
    }
}

#[async_trait::async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn put(&self, jti: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let key = self.key(jti);
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(&key, REVOKED_MARKER, ttl_secs)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn contains(&self, jti: &str) -> Result<bool, StoreError> {
        let key = self.key(jti);
        let mut conn = self.conn.clone();
        let val: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(val.as_deref() == Some(REVOKED_MARKER))
    }
}
