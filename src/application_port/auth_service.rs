use crate::broker::RpcError;
use crate::domain_model::{DeviceInfo, UserId, UserSummary};
use crate::domain_port::StoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("user not found")]
    UserNotFound,
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("service timeout: {0}")]
    ServiceTimeout(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable application code carried in error response envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthorized(_) => "UNAUTHORIZED",
            AuthError::Forbidden(_) => "FORBIDDEN",
            AuthError::Conflict(_) => "CONFLICT",
            AuthError::Validation(_) => "VALIDATION",
            AuthError::UserNotFound => "NOT_FOUND",
            AuthError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AuthError::ServiceTimeout(_) => "SERVICE_TIMEOUT",
            AuthError::Store(_) => "STORE_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<RpcError> for AuthError {
    fn from(error: RpcError) -> Self {
        match error {
            RpcError::Unavailable { .. } => AuthError::ServiceUnavailable(error.to_string()),
            RpcError::Timeout { .. } => AuthError::ServiceTimeout(error.to_string()),
            RpcError::Application { ref code, ref message, .. } => match code.as_str() {
                "CONFLICT" => AuthError::Conflict(message.clone()),
                "NOT_FOUND" => AuthError::UserNotFound,
                "UNAUTHORIZED" => AuthError::Unauthorized(message.clone()),
                "VALIDATION" => AuthError::Validation(message.clone()),
                _ => AuthError::Internal(error.to_string()),
            },
            RpcError::BadResponse { .. } => AuthError::Internal(error.to_string()),
            RpcError::Encode(_) => AuthError::Internal(error.to_string()),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Duplicate => AuthError::Conflict(error.to_string()),
            StoreError::Backend(_) => AuthError::Store(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(flatten)]
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginInput {
    pub username_or_email: String,
    pub password: String,
    #[serde(flatten)]
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LogoutResult {
    pub success: bool,
}

#[async_trait::async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError>;
    async fn verify_password(&self, password: &str, password_hash: &str)
    -> Result<bool, AuthError>;
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn register(&self, input: RegisterInput) -> Result<AuthResponse, AuthError>;
    async fn login(&self, input: LoginInput) -> Result<AuthResponse, AuthError>;
    async fn refresh(
        &self,
        refresh_token: &str,
        device_id: Option<&str>,
    ) -> Result<AuthResponse, AuthError>;
    /// Best-effort by design: a failed revocation reports `success: false`
    /// instead of an error.
    async fn logout(&self, refresh_token: &str) -> LogoutResult;
    async fn logout_all(&self, user_id: UserId) -> LogoutResult;
    async fn validate_token(&self, token: &str) -> Result<UserId, AuthError>;
}
