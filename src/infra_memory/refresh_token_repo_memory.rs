use crate::domain_model::UserId;
use crate::domain_port::{RefreshTokenRecord, RefreshTokenRepo, RevokedToken, StoreError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// In-memory record store for tests and demos. `consume` mutates under the
/// map's per-entry lock, which gives the same single-winner guarantee the
/// MySQL conditional update does.
pub struct MemoryRefreshTokenRepo {
    records: DashMap<String, RefreshTokenRecord>,
}

impl MemoryRefreshTokenRepo {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn active_count_for(&self, user_id: UserId) -> usize {
        self.records
            .iter()
            .filter(|r| r.user_id == user_id && !r.is_revoked)
            .count()
    }
}

impl Default for MemoryRefreshTokenRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RefreshTokenRepo for MemoryRefreshTokenRepo {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        if self.records.contains_key(&record.token_digest) {
            return Err(StoreError::Duplicate);
        }
        self.records
            .insert(record.token_digest.clone(), record.clone());
        Ok(())
    }

    async fn find_by_digest(
        &self,
        digest: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.records.get(digest).map(|r| r.clone()))
    }

    async fn consume(&self, digest: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.records.get_mut(digest) {
            Some(mut record) if !record.is_revoked => {
                record.is_revoked = true;
                record.last_used_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_revoked(&self, digest: &str) -> Result<bool, StoreError> {
        match self.records.get_mut(digest) {
            Some(mut record) => {
                let changed = !record.is_revoked;
                record.is_revoked = true;
                Ok(changed)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<RevokedToken>, StoreError> {
        let mut revoked = Vec::new();
        for mut record in self.records.iter_mut() {
            if record.user_id == user_id && !record.is_revoked {
                record.is_revoked = true;
                revoked.push(RevokedToken {
                    jti: record.jti.clone(),
                    expires_at: record.expires_at,
                });
            }
        }
        Ok(revoked)
    }

    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let before = self.records.len();
        self.records.retain(|_, record| {
            let expired = record.expires_at <= now;
            let long_revoked = record.is_revoked && record.last_used_at <= revoked_before;
            !expired && !long_revoked
        });
        Ok((before - self.records.len()) as u64)
    }
}
