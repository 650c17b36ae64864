use crate::domain_port::{RevocationStore, StoreError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// In-memory TTL'd revocation set for tests and demos.
pub struct MemoryRevocationStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for MemoryRevocationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn put(&self, jti: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_secs as i64);
        self.entries.insert(jti.to_string(), expires_at);
        Ok(())
    }

    async fn contains(&self, jti: &str) -> Result<bool, StoreError> {
        // the guard must be released before the lazy expiry removal below
        let live = match self.entries.get(jti) {
            Some(expires_at) => *expires_at > Utc::now(),
            None => return Ok(false),
        };

        if !live {
            self.entries.remove(jti);
        }
        Ok(live)
    }
}
