use crate::application_port::{
    AuthError, IssuedRefresh, RotatedTokens, TokenService, TokenSubject,
};
use crate::domain_model::{DeviceInfo, JwtClaims, TokenType, UserId};
use crate::domain_port::{RefreshTokenRecord, RefreshTokenRepo, RevocationStore};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub signing_key: Vec<u8>,
}

impl JwtConfig {
    /// Builds a config from the duration strings the settings carry
    /// (e.g. `15m`, `7d`).
    pub fn try_new(
        issuer: &str,
        signing_key: Vec<u8>,
        access_expires_in: &str,
        refresh_expires_in: &str,
    ) -> anyhow::Result<Self> {
        let access_ttl = parse_expiration(access_expires_in)
            .ok_or_else(|| anyhow::anyhow!("invalid access ttl: {access_expires_in:?}"))?;
        let refresh_ttl = parse_expiration(refresh_expires_in)
            .ok_or_else(|| anyhow::anyhow!("invalid refresh ttl: {refresh_expires_in:?}"))?;
        Ok(JwtConfig {
            issuer: issuer.to_string(),
            access_ttl,
            refresh_ttl,
            signing_key,
        })
    }
}

/// Parses duration strings like `30s`, `15m`, `2h`, `7d`, `1w`.
pub fn parse_expiration(value: &str) -> Option<Duration> {
    let unit = value.chars().last()?;
    let digits = &value[..value.len() - unit.len_utf8()];
    let amount: u64 = digits.parse().ok()?;

    let secs = match unit {
        's' => amount,
        'm' => amount * 60,
        'h' => amount * 60 * 60,
        'd' => amount * 24 * 60 * 60,
        'w' => amount * 7 * 24 * 60 * 60,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// Deterministic, unsalted digest of a token value. Lookup-by-value against
/// the durable store depends on the digest being reproducible and indexable.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Local verdict over a stored record; exactly one boundary translation
/// turns a non-active verdict into an error.
enum RefreshAssessment {
    Active,
    Revoked,
    Expired,
    DeviceMismatch,
}

fn assess(
    record: &RefreshTokenRecord,
    device_id: Option<&str>,
    now: DateTime<Utc>,
) -> RefreshAssessment {
    if record.is_revoked {
        return RefreshAssessment::Revoked;
    }
    if record.expires_at <= now {
        return RefreshAssessment::Expired;
    }
    if let (Some(presented), Some(stored)) = (device_id, record.device_id.as_deref()) {
        if presented != stored {
            return RefreshAssessment::DeviceMismatch;
        }
    }
    RefreshAssessment::Active
}

pub struct JwtTokenService {
    cfg: JwtConfig,
    repo: Arc<dyn RefreshTokenRepo>,
    revocations: Arc<dyn RevocationStore>,
}

impl JwtTokenService {
    pub fn new(
        cfg: JwtConfig,
        repo: Arc<dyn RefreshTokenRepo>,
        revocations: Arc<dyn RevocationStore>,
    ) -> Self {
        JwtTokenService {
            cfg,
            repo,
            revocations,
        }
    }

    #[inline]
    fn new_jti() -> String {
        Uuid::new_v4().to_string()
    }

    fn build_claims(
        &self,
        subject: &TokenSubject,
        token_type: TokenType,
        ttl: Duration,
    ) -> JwtClaims {
        let now = Utc::now();
        JwtClaims {
            sub: subject.user_id.to_string(),
            user_id: subject.user_id,
            username: subject.username.clone(),
            email: subject.email.clone(),
            roles: subject.roles.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Self::new_jti(),
            token_type,
        }
    }

    fn encode_jwt(&self, claims: &JwtClaims) -> Result<String, AuthError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(&self.cfg.signing_key),
        )
        .map_err(|e| AuthError::Internal(e.to_string()))
    }

    fn verify(&self, token: &str, expected: TokenType) -> Result<JwtClaims, AuthError> {
        let label = match expected {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[self.cfg.issuer.clone()]);

        let data = decode::<JwtClaims>(
            token,
            &DecodingKey::from_secret(&self.cfg.signing_key),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => {
                AuthError::Unauthorized(format!("{label} token expired"))
            }
            _ => AuthError::Unauthorized(format!("{label} token invalid")),
        })?;

        if data.claims.token_type != expected {
            return Err(AuthError::Unauthorized(format!(
                "token is not an {label} token"
            )));
        }
        Ok(data.claims)
    }

    /// Best-effort: a cache write failure is logged, never surfaced.
    async fn blacklist(&self, jti: &str, ttl_secs: u64) {
        if ttl_secs == 0 {
            // past natural expiry, nothing to bound
            return;
        }
        if let Err(e) = self.revocations.put(jti, ttl_secs).await {
            tracing::warn!(jti, error = %e, "failed to blacklist token id");
        }
    }
}

#[async_trait::async_trait]
impl TokenService for JwtTokenService {
    async fn issue_access_token(&self, subject: &TokenSubject) -> Result<String, AuthError> {
        let claims = self.build_claims(subject, TokenType::Access, self.cfg.access_ttl);
        self.encode_jwt(&claims)
    }

    async fn issue_refresh_token(
        &self,
        subject: &TokenSubject,
        device: &DeviceInfo,
    ) -> Result<IssuedRefresh, AuthError> {
        let claims = self.build_claims(subject, TokenType::Refresh, self.cfg.refresh_ttl);
        let token = self.encode_jwt(&claims)?;

        let now = Utc::now();
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AuthError::Internal("refresh expiry out of range".to_string()))?;
        let record = RefreshTokenRecord {
            token_digest: token_digest(&token),
            jti: claims.jti,
            user_id: subject.user_id,
            is_revoked: false,
            expires_at,
            device_id: device.device_id.clone(),
            user_agent: device.user_agent.clone(),
            ip_address: device.ip_address.clone(),
            last_used_at: now,
            created_at: now,
        };
        self.repo.insert(&record).await?;

        Ok(IssuedRefresh { token, expires_at })
    }

    async fn rotate(
        &self,
        refresh_token: &str,
        device_id: Option<&str>,
    ) -> Result<RotatedTokens, AuthError> {
        let claims = self.verify(refresh_token, TokenType::Refresh)?;
        if self.is_blacklisted(&claims.jti).await {
            return Err(AuthError::Unauthorized("refresh token revoked".to_string()));
        }

        let digest = token_digest(refresh_token);
        let record = self
            .repo
            .find_by_digest(&digest)
            .await?
            .ok_or_else(|| AuthError::Unauthorized("refresh token not recognized".to_string()))?;

        let now = Utc::now();
        match assess(&record, device_id, now) {
            RefreshAssessment::Active => {}
            RefreshAssessment::Revoked => {
                return Err(AuthError::Unauthorized("refresh token revoked".to_string()));
            }
            RefreshAssessment::Expired => {
                return Err(AuthError::Unauthorized("refresh token expired".to_string()));
            }
            RefreshAssessment::DeviceMismatch => {
                return Err(AuthError::Unauthorized(
                    "refresh token does not match this device".to_string(),
                ));
            }
        }

        // the linchpin: the store enforces the not-revoked -> revoked
        // transition, so concurrent rotations from any process agree on a
        // single winner
        if !self.repo.consume(&digest, now).await? {
            return Err(AuthError::Unauthorized(
                "refresh token already used".to_string(),
            ));
        }

        self.blacklist(&claims.jti, claims.remaining_secs(now.timestamp()))
            .await;

        let subject = TokenSubject {
            user_id: claims.user_id,
            username: claims.username.clone(),
            email: claims.email.clone(),
            roles: claims.roles.clone(),
        };
        let device = DeviceInfo {
            device_id: record.device_id.clone(),
            user_agent: record.user_agent.clone(),
            ip_address: record.ip_address.clone(),
        };

        let access_token = self.issue_access_token(&subject).await?;
        let refreshed = self.issue_refresh_token(&subject, &device).await?;

        Ok(RotatedTokens {
            access_token,
            refresh_token: refreshed.token,
            expires_in: self.cfg.access_ttl.as_secs() as i64,
        })
    }

    async fn revoke(&self, refresh_token: &str) -> Result<bool, AuthError> {
        let digest = token_digest(refresh_token);
        let changed = self.repo.mark_revoked(&digest).await?;

        if let Some(claims) = self.decode_unverified(refresh_token) {
            self.blacklist(&claims.jti, claims.remaining_secs(Utc::now().timestamp()))
                .await;
        }

        Ok(changed)
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<bool, AuthError> {
        let revoked = self.repo.revoke_all_for_user(user_id).await?;
        let now = Utc::now().timestamp();

        for token in &revoked {
            let ttl = (token.expires_at.timestamp() - now).max(0) as u64;
            self.blacklist(&token.jti, ttl).await;
        }

        tracing::info!(%user_id, count = revoked.len(), "revoked all refresh tokens");
        Ok(true)
    }

    async fn is_blacklisted(&self, jti: &str) -> bool {
        match self.revocations.contains(jti).await {
            Ok(revoked) => revoked,
            Err(e) => {
                // availability over strict enforcement
                tracing::warn!(jti, error = %e, "blacklist check degraded to allow");
                false
            }
        }
    }

    async fn verify_access_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let claims = self.verify(token, TokenType::Access)?;
        if self.is_blacklisted(&claims.jti).await {
            return Err(AuthError::Unauthorized("access token revoked".to_string()));
        }
        Ok(claims)
    }

    fn decode_unverified(&self, token: &str) -> Option<JwtClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<JwtClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .ok()
    }

    async fn cleanup_expired(&self) -> Result<u64, AuthError> {
        let now = Utc::now();
        let revoked_before = now - chrono::Duration::days(30);
        let deleted = self.repo.delete_expired(now, revoked_before).await?;
        if deleted > 0 {
            tracing::info!(deleted, "cleaned up expired refresh tokens");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_port::StoreError;
    use crate::infra_memory::{MemoryRefreshTokenRepo, MemoryRevocationStore};

    fn config() -> JwtConfig {
        JwtConfig::try_new("descant.auth", b"test-signing-key".to_vec(), "15m", "7d").unwrap()
    }

    fn service_with(
        cfg: JwtConfig,
    ) -> (
        JwtTokenService,
        Arc<MemoryRefreshTokenRepo>,
        Arc<MemoryRevocationStore>,
    ) {
        let repo = Arc::new(MemoryRefreshTokenRepo::new());
        let revocations = Arc::new(MemoryRevocationStore::new());
        (
            JwtTokenService::new(cfg, repo.clone(), revocations.clone()),
            repo,
            revocations,
        )
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: UserId(Uuid::new_v4()),
            username: Some("johndoe".to_string()),
            email: Some("johndoe@example.com".to_string()),
            roles: vec![crate::domain_model::UserRole::User],
        }
    }

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo {
            device_id: Some(id.to_string()),
            user_agent: Some("test-agent".to_string()),
            ip_address: None,
        }
    }

    struct FailingRevocationStore;

    #[async_trait::async_trait]
    impl RevocationStore for FailingRevocationStore {
        async fn put(&self, _jti: &str, _ttl_secs: u64) -> Result<(), StoreError> {
            Err(StoreError::Backend("cache down".to_string()))
        }

        async fn contains(&self, _jti: &str) -> Result<bool, StoreError> {
            Err(StoreError::Backend("cache down".to_string()))
        }
    }

    #[test]
    fn parse_expiration_understands_the_usual_units() {
        assert_eq!(parse_expiration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_expiration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_expiration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_expiration("7d"), Some(Duration::from_secs(604800)));
        assert_eq!(parse_expiration("1w"), Some(Duration::from_secs(604800)));
        assert_eq!(parse_expiration(""), None);
        assert_eq!(parse_expiration("15"), None);
        assert_eq!(parse_expiration("x5m"), None);
    }

    #[test]
    fn digests_are_deterministic_and_collision_free_across_values() {
        assert_eq!(token_digest("token-a"), token_digest("token-a"));
        assert_ne!(token_digest("token-a"), token_digest("token-b"));
    }

    #[tokio::test]
    async fn first_rotation_succeeds_second_is_rejected() {
        let (service, _, _) = service_with(config());
        let issued = service
            .issue_refresh_token(&subject(), &device("d1"))
            .await
            .unwrap();

        let rotated = service.rotate(&issued.token, Some("d1")).await.unwrap();
        assert_ne!(rotated.refresh_token, issued.token);

        let replay = service.rotate(&issued.token, Some("d1")).await;
        assert!(matches!(replay, Err(AuthError::Unauthorized(_))));

        // the pair from the successful rotation still works
        service.rotate(&rotated.refresh_token, Some("d1")).await.unwrap();
    }

    #[tokio::test]
    async fn device_mismatch_rejects_and_leaves_the_record_active() {
        let (service, repo, _) = service_with(config());
        let issued = service
            .issue_refresh_token(&subject(), &device("d1"))
            .await
            .unwrap();

        let result = service.rotate(&issued.token, Some("d2")).await;
        assert!(matches!(result, Err(AuthError::Unauthorized(_))));

        let record = repo
            .find_by_digest(&token_digest(&issued.token))
            .await
            .unwrap()
            .unwrap();
        assert!(!record.is_revoked);

        // the right device can still rotate afterwards
        service.rotate(&issued.token, Some("d1")).await.unwrap();
    }

    #[tokio::test]
    async fn rotation_without_a_stored_record_is_unauthorized() {
        let (service, repo, _) = service_with(config());
        let issued = service
            .issue_refresh_token(&subject(), &device("d1"))
            .await
            .unwrap();

        repo.clear();
        let result = service.rotate(&issued.token, Some("d1")).await;
        assert!(matches!(result, Err(AuthError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn record_expiry_is_enforced_independently_of_jwt_leeway() {
        let mut cfg = config();
        cfg.refresh_ttl = Duration::ZERO;
        let (service, _, _) = service_with(cfg);

        let issued = service
            .issue_refresh_token(&subject(), &device("d1"))
            .await
            .unwrap();
        let result = service.rotate(&issued.token, Some("d1")).await;

        assert!(matches!(result, Err(AuthError::Unauthorized(ref m)) if m.contains("expired")));
    }

    #[tokio::test]
    async fn concurrent_rotations_of_one_token_have_exactly_one_winner() {
        let (service, _, _) = service_with(config());
        let service = Arc::new(service);
        let issued = service
            .issue_refresh_token(&subject(), &device("d1"))
            .await
            .unwrap();

        let a = {
            let service = service.clone();
            let token = issued.token.clone();
            tokio::spawn(async move { service.rotate(&token, Some("d1")).await })
        };
        let b = {
            let service = service.clone();
            let token = issued.token.clone();
            tokio::spawn(async move { service.rotate(&token, Some("d1")).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);

        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(AuthError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn revoke_blacklists_the_jti_immediately() {
        let (service, _, _) = service_with(config());
        let issued = service
            .issue_refresh_token(&subject(), &device("d1"))
            .await
            .unwrap();
        let jti = service.decode_unverified(&issued.token)
            .unwrap()
            .jti;

        assert!(!service.is_blacklisted(&jti).await);
        assert!(service.revoke(&issued.token).await.unwrap());
        assert!(service.is_blacklisted(&jti).await);

        // revoked means no rotation either
        let result = service.rotate(&issued.token, Some("d1")).await;
        assert!(matches!(result, Err(AuthError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn revoking_an_unknown_token_reports_no_change() {
        let (service, _, _) = service_with(config());
        assert!(!service.revoke("eyJhbGciOi.not-a-real.token").await.unwrap());
    }

    #[tokio::test]
    async fn revoke_all_leaves_zero_active_records_for_the_user() {
        let (service, repo, _) = service_with(config());
        let owner = subject();
        let other = subject();

        let first = service.issue_refresh_token(&owner, &device("d1")).await.unwrap();
        let second = service.issue_refresh_token(&owner, &device("d2")).await.unwrap();
        let unrelated = service.issue_refresh_token(&other, &device("d3")).await.unwrap();

        assert!(service.revoke_all_for_user(owner.user_id).await.unwrap());

        assert_eq!(repo.active_count_for(owner.user_id), 0);
        assert_eq!(repo.active_count_for(other.user_id), 1);

        for token in [&first.token, &second.token] {
            let jti = service.decode_unverified(token).unwrap().jti;
            assert!(service.is_blacklisted(&jti).await);
        }
        let result = service.rotate(&unrelated.token, Some("d3")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn blacklist_check_degrades_to_allow_when_the_cache_fails() {
        let repo = Arc::new(MemoryRefreshTokenRepo::new());
        let service =
            JwtTokenService::new(config(), repo, Arc::new(FailingRevocationStore));

        let access = service.issue_access_token(&subject()).await.unwrap();
        let claims = service.verify_access_token(&access).await.unwrap();

        assert!(!service.is_blacklisted(&claims.jti).await);
    }

    #[tokio::test]
    async fn access_verification_rejects_refresh_tokens() {
        let (service, _, _) = service_with(config());
        let issued = service
            .issue_refresh_token(&subject(), &device("d1"))
            .await
            .unwrap();

        let result = service.verify_access_token(&issued.token).await;
        assert!(matches!(result, Err(AuthError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn signature_tampering_is_rejected() {
        let (service, _, _) = service_with(config());
        let issued = service
            .issue_refresh_token(&subject(), &device("d1"))
            .await
            .unwrap();

        let mut tampered = issued.token.clone();
        tampered.pop();
        let result = service.rotate(&tampered, Some("d1")).await;
        assert!(matches!(result, Err(AuthError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn cleanup_deletes_expired_records() {
        let mut cfg = config();
        cfg.refresh_ttl = Duration::ZERO;
        let (service, repo, _) = service_with(cfg);

        service
            .issue_refresh_token(&subject(), &device("d1"))
            .await
            .unwrap();
        assert_eq!(repo.len(), 1);

        assert_eq!(service.cleanup_expired().await.unwrap(), 1);
        assert_eq!(repo.len(), 0);
    }
}
