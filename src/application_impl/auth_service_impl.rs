use crate::application_port::{
    AuthError, AuthResponse, AuthService, CredentialHasher, LoginInput, LogoutResult,
    RegisterInput, TokenService, TokenSubject,
};
use crate::domain_model::{DeviceInfo, UserId, UserRole, UserStatus, UserSummary};
use crate::domain_port::{NewUser, UserDirectory, UserRecord};
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use std::sync::Arc;

pub struct Argon2PasswordHasher;

#[async_trait::async_trait]
impl CredentialHasher for Argon2PasswordHasher {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = argon2::password_hash::SaltString::generate(&mut OsRng);
        let argon2 = argon2::Argon2::default();
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .to_string();
        Ok(hash)
    }

    async fn verify_password(
        &self,
        password: &str,
        password_hash: &str,
    ) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(password_hash)
            .map_err(|e| AuthError::Internal(format!("invalid PHC hash: {e}")))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(_) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Internal(format!("verify error: {e}"))),
        }
    }
}

/// Composes the cross-service user directory (reached over the broker) with
/// the token lifecycle manager.
pub struct RealAuthService {
    users: Arc<dyn UserDirectory>,
    tokens: Arc<dyn TokenService>,
    credential_hasher: Arc<dyn CredentialHasher>,
    min_username_len: usize,
    min_password_len: usize,
}

impl RealAuthService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        tokens: Arc<dyn TokenService>,
        credential_hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        Self {
            users,
            tokens,
            credential_hasher,
            min_username_len: 3,
            min_password_len: 8,
        }
    }

    fn validate_register(&self, input: &RegisterInput) -> Result<(), AuthError> {
        if input.username.len() < self.min_username_len {
            return Err(AuthError::Validation("username too short".to_string()));
        }
        if !input.email.contains('@') {
            return Err(AuthError::Validation("invalid email".to_string()));
        }
        if input.password.len() < self.min_password_len {
            return Err(AuthError::Validation("password too short".to_string()));
        }
        Ok(())
    }

    fn subject_of(user: &UserRecord) -> TokenSubject {
        TokenSubject {
            user_id: user.id,
            username: Some(user.username.clone()),
            email: Some(user.email.clone()),
            roles: user.roles.clone(),
        }
    }

    fn summary_of(user: UserRecord) -> UserSummary {
        UserSummary {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            is_verified: user.is_verified,
            roles: user.roles,
        }
    }

    async fn issue_response(
        &self,
        user: UserRecord,
        device: &DeviceInfo,
    ) -> Result<AuthResponse, AuthError> {
        let subject = Self::subject_of(&user);
        let access_token = self.tokens.issue_access_token(&subject).await?;
        let refresh = self.tokens.issue_refresh_token(&subject, device).await?;

        let expires_in = self
            .tokens
            .decode_unverified(&access_token)
            .map(|claims| claims.exp - Utc::now().timestamp())
            .unwrap_or(900);

        Ok(AuthResponse {
            access_token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in,
            user: Self::summary_of(user),
        })
    }
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn register(&self, input: RegisterInput) -> Result<AuthResponse, AuthError> {
        self.validate_register(&input)?;

        if self.users.exists(&input.email, &input.username).await? {
            return Err(AuthError::Conflict(
                "email or username already taken".to_string(),
            ));
        }

        let password_hash = self.credential_hasher.hash_password(&input.password).await?;
        let user = self
            .users
            .create(NewUser {
                username: input.username.clone(),
                email: input.email.clone(),
                password: password_hash,
                roles: vec![UserRole::User],
                is_verified: false,
                status: UserStatus::Pending,
            })
            .await?;

        self.issue_response(user, &input.device).await
    }

    async fn login(&self, input: LoginInput) -> Result<AuthResponse, AuthError> {
        if input.username_or_email.is_empty() || input.password.is_empty() {
            return Err(AuthError::Validation("missing credentials".to_string()));
        }

        let user = self
            .users
            .find_by_identifier(&input.username_or_email)
            .await?
            .ok_or_else(|| AuthError::Unauthorized("invalid credentials".to_string()))?;

        if user.status != UserStatus::Active {
            return Err(AuthError::Forbidden(format!("account is {}", user.status)));
        }

        let password_hash = user
            .password
            .as_deref()
            .ok_or_else(|| AuthError::Internal("user record missing credentials".to_string()))?;
        let ok = self
            .credential_hasher
            .verify_password(&input.password, password_hash)
            .await?;
        if !ok {
            return Err(AuthError::Unauthorized("invalid credentials".to_string()));
        }

        self.issue_response(user, &input.device).await
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        device_id: Option<&str>,
    ) -> Result<AuthResponse, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::Validation("missing refresh token".to_string()));
        }

        let rotated = self.tokens.rotate(refresh_token, device_id).await?;

        let claims = self
            .tokens
            .decode_unverified(&rotated.access_token)
            .ok_or_else(|| AuthError::Internal("undecodable issued token".to_string()))?;
        let user = self
            .users
            .find_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(AuthResponse {
            access_token: rotated.access_token,
            refresh_token: rotated.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: rotated.expires_in,
            user: Self::summary_of(user),
        })
    }

    async fn logout(&self, refresh_token: &str) -> LogoutResult {
        match self.tokens.revoke(refresh_token).await {
            Ok(success) => LogoutResult { success },
            Err(e) => {
                // failing to log out is not a hard error for the caller
                tracing::warn!(error = %e, "logout revocation failed");
                LogoutResult { success: false }
            }
        }
    }

    async fn logout_all(&self, user_id: UserId) -> LogoutResult {
        match self.tokens.revoke_all_for_user(user_id).await {
            Ok(success) => LogoutResult { success },
            Err(e) => {
                tracing::warn!(%user_id, error = %e, "logout-all revocation failed");
                LogoutResult { success: false }
            }
        }
    }

    async fn validate_token(&self, token: &str) -> Result<UserId, AuthError> {
        let claims = self.tokens.verify_access_token(token).await?;
        Ok(claims.user_id)
    }
}
