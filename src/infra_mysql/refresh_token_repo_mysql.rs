use super::util::is_dup_key;
use crate::domain_model::UserId;
use crate::domain_port::{RefreshTokenRecord, RefreshTokenRepo, RevokedToken, StoreError};
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use uuid::Uuid;

pub struct MySqlRefreshTokenRepo {
    pool: MySqlPool,
}

impl MySqlRefreshTokenRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlRefreshTokenRepo { pool }
    }

    #[inline]
    fn uid_as_bytes(id: &UserId) -> &[u8] {
        id.0.as_bytes()
    }

    #[inline]
    fn uid_from_bytes(id: &[u8]) -> Result<UserId, StoreError> {
        Ok(UserId(
            Uuid::from_slice(id).map_err(|e| StoreError::Backend(e.to_string()))?,
        ))
    }

    fn backend(e: sqlx::Error) -> StoreError {
        StoreError::Backend(e.to_string())
    }

    fn row_to_record(row: MySqlRow) -> Result<RefreshTokenRecord, StoreError> {
        let user_id_bytes: Vec<u8> = row.try_get("user_id").map_err(Self::backend)?;
        let user_id = Self::uid_from_bytes(&user_id_bytes)?;

        let token_digest: String = row.try_get("token_digest").map_err(Self::backend)?;
        let jti: String = row.try_get("jti").map_err(Self::backend)?;
        let is_revoked: bool = row.try_get("is_revoked").map_err(Self::backend)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(Self::backend)?;
        let device_id: Option<String> = row.try_get("device_id").map_err(Self::backend)?;
        let user_agent: Option<String> = row.try_get("user_agent").map_err(Self::backend)?;
        let ip_address: Option<String> = row.try_get("ip_address").map_err(Self::backend)?;
        let last_used_at: DateTime<Utc> = row.try_get("last_used_at").map_err(Self::backend)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(Self::backend)?;

        Ok(RefreshTokenRecord {
            token_digest,
            jti,
            user_id,
            is_revoked,
            expires_at,
            device_id,
            user_agent,
            ip_address,
            last_used_at,
            created_at,
        })
    }
}

#[async_trait::async_trait]
impl RefreshTokenRepo for MySqlRefreshTokenRepo {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO refresh_token
    (token_digest, jti, user_id, is_revoked, expires_at,
     device_id, user_agent, ip_address, last_used_at, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#,
        )
        .bind(&record.token_digest)
        .bind(&record.jti)
        .bind(Self::uid_as_bytes(&record.user_id))
        .bind(record.is_revoked)
        .bind(record.expires_at)
        .bind(&record.device_id)
        .bind(&record.user_agent)
        .bind(&record.ip_address)
        .bind(record.last_used_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_dup_key(&e) {
                StoreError::Duplicate
            } else {
                Self::backend(e)
            }
        })?;

        Ok(())
    }

    async fn find_by_digest(
        &self,
        digest: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT token_digest, jti, user_id, is_revoked, expires_at,
       device_id, user_agent, ip_address, last_used_at, created_at
FROM refresh_token
WHERE token_digest = ?
"#,
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::backend)?;

        row_opt.map(Self::row_to_record).transpose()
    }

    async fn consume(&self, digest: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        // rows_affected decides the winner between concurrent rotations
        let result = sqlx::query(
            r#"
UPDATE refresh_token
SET is_revoked = TRUE, last_used_at = ?
WHERE token_digest = ? AND is_revoked = FALSE
"#,
        )
        .bind(now)
        .bind(digest)
        .execute(&self.pool)
        .await
        .map_err(Self::backend)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_revoked(&self, digest: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE refresh_token
SET is_revoked = TRUE
WHERE token_digest = ?
"#,
        )
        .bind(digest)
        .execute(&self.pool)
        .await
        .map_err(Self::backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<RevokedToken>, StoreError> {
        let rows = sqlx::query(
            r#"
SELECT jti, expires_at
FROM refresh_token
WHERE user_id = ? AND is_revoked = FALSE
"#,
        )
        .bind(Self::uid_as_bytes(&user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(Self::backend)?;

        let mut revoked = Vec::with_capacity(rows.len());
        for row in rows {
            let jti: String = row.try_get("jti").map_err(Self::backend)?;
            let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(Self::backend)?;
            revoked.push(RevokedToken { jti, expires_at });
        }

        sqlx::query(
            r#"
UPDATE refresh_token
SET is_revoked = TRUE
WHERE user_id = ? AND is_revoked = FALSE
"#,
        )
        .bind(Self::uid_as_bytes(&user_id))
        .execute(&self.pool)
        .await
        .map_err(Self::backend)?;

        Ok(revoked)
    }

    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
DELETE FROM refresh_token
WHERE expires_at <= ?
   OR (is_revoked = TRUE AND last_used_at <= ?)
"#,
        )
        .bind(now)
        .bind(revoked_before)
        .execute(&self.pool)
        .await
        .map_err(Self::backend)?;

        Ok(result.rows_affected())
    }
}
