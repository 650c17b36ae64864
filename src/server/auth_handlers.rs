use crate::application_port::{
    AuthError, AuthService, LoginInput, RegisterInput, TokenService,
};
use crate::broker::{
    Envelope, HandlerError, PatternHandler, RequestResponder, RpcClient, patterns,
};
use crate::domain_model::UserId;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

impl From<AuthError> for HandlerError {
    fn from(error: AuthError) -> Self {
        match &error {
            AuthError::Store(_) | AuthError::Internal(_) => {
                tracing::error!(error = %error, "internal failure in pattern handler")
            }
            _ => tracing::debug!(error = %error, "request rejected"),
        }
        HandlerError::new(error.code(), error.to_string())
    }
}

fn parse_input<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, HandlerError> {
    serde_json::from_value(data)
        .map_err(|e| HandlerError::new("VALIDATION", format!("malformed payload: {e}")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(value)
        .map_err(|e| HandlerError::new("INTERNAL_ERROR", format!("unserializable response: {e}")))
}

/// Best-effort lifecycle event; a broker hiccup never fails the request.
async fn emit_event(events: &RpcClient, topic: &str, payload: Value) {
    if let Err(e) = events.emit(topic, &payload).await {
        tracing::debug!(topic, error = %e, "lifecycle event not emitted");
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest {
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutAllRequest {
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    token: String,
}

#[derive(Debug, Deserialize)]
struct BlacklistCheckRequest {
    jti: String,
}

struct RegisterHandler {
    auth: Arc<dyn AuthService>,
    events: Arc<RpcClient>,
}

#[async_trait::async_trait]
impl PatternHandler for RegisterHandler {
    async fn handle(&self, request: Envelope) -> Result<Value, HandlerError> {
        let input: RegisterInput = parse_input(request.data)?;
        let response = self.auth.register(input).await?;

        emit_event(
            &self.events,
            patterns::TOPIC_USER_REGISTERED,
            json!({"userId": response.user.id}),
        )
        .await;
        to_value(&response)
    }
}

struct LoginHandler {
    auth: Arc<dyn AuthService>,
    events: Arc<RpcClient>,
}

#[async_trait::async_trait]
impl PatternHandler for LoginHandler {
    async fn handle(&self, request: Envelope) -> Result<Value, HandlerError> {
        let input: LoginInput = parse_input(request.data)?;
        let response = self.auth.login(input).await?;

        emit_event(
            &self.events,
            patterns::TOPIC_USER_LOGGED_IN,
            json!({"userId": response.user.id}),
        )
        .await;
        to_value(&response)
    }
}

struct RefreshHandler {
    auth: Arc<dyn AuthService>,
}

#[async_trait::async_trait]
impl PatternHandler for RefreshHandler {
    async fn handle(&self, request: Envelope) -> Result<Value, HandlerError> {
        let input: RefreshRequest = parse_input(request.data)?;
        let response = self
            .auth
            .refresh(&input.refresh_token, input.device_id.as_deref())
            .await?;
        to_value(&response)
    }
}

struct LogoutHandler {
    auth: Arc<dyn AuthService>,
    tokens: Arc<dyn TokenService>,
    events: Arc<RpcClient>,
}

#[async_trait::async_trait]
impl PatternHandler for LogoutHandler {
    async fn handle(&self, request: Envelope) -> Result<Value, HandlerError> {
        let input: LogoutRequest = parse_input(request.data)?;
        let result = self.auth.logout(&input.refresh_token).await;

        if result.success {
            let user_id = self
                .tokens
                .decode_unverified(&input.refresh_token)
                .map(|claims| claims.user_id);
            emit_event(
                &self.events,
                patterns::TOPIC_USER_LOGGED_OUT,
                json!({"userId": user_id}),
            )
            .await;
        }
        to_value(&result)
    }
}

struct LogoutAllHandler {
    auth: Arc<dyn AuthService>,
}

#[async_trait::async_trait]
impl PatternHandler for LogoutAllHandler {
    async fn handle(&self, request: Envelope) -> Result<Value, HandlerError> {
        let input: LogoutAllRequest = parse_input(request.data)?;
        let result = self.auth.logout_all(input.user_id).await;
        to_value(&result)
    }
}

struct ValidateTokenHandler {
    auth: Arc<dyn AuthService>,
}

#[async_trait::async_trait]
impl PatternHandler for ValidateTokenHandler {
    async fn handle(&self, request: Envelope) -> Result<Value, HandlerError> {
        let input: ValidateRequest = parse_input(request.data)?;
        let user_id = self.auth.validate_token(&input.token).await?;
        Ok(json!({"valid": true, "userId": user_id}))
    }
}

struct BlacklistCheckHandler {
    tokens: Arc<dyn TokenService>,
}

#[async_trait::async_trait]
impl PatternHandler for BlacklistCheckHandler {
    async fn handle(&self, request: Envelope) -> Result<Value, HandlerError> {
        let input: BlacklistCheckRequest = parse_input(request.data)?;
        let blacklisted = self.tokens.is_blacklisted(&input.jti).await;
        Ok(json!({"blacklisted": blacklisted}))
    }
}

/// Wires every auth pattern onto the responder.
pub fn register_all(
    responder: &mut RequestResponder,
    auth: Arc<dyn AuthService>,
    tokens: Arc<dyn TokenService>,
    events: Arc<RpcClient>,
) {
    responder.register(
        patterns::AUTH_REGISTER,
        Arc::new(RegisterHandler {
            auth: auth.clone(),
            events: events.clone(),
        }),
    );
    responder.register(
        patterns::AUTH_LOGIN,
        Arc::new(LoginHandler {
            auth: auth.clone(),
            events: events.clone(),
        }),
    );
    responder.register(
        patterns::AUTH_REFRESH_TOKEN,
        Arc::new(RefreshHandler { auth: auth.clone() }),
    );
    responder.register(
        patterns::AUTH_LOGOUT,
        Arc::new(LogoutHandler {
            auth: auth.clone(),
            tokens: tokens.clone(),
            events,
        }),
    );
    responder.register(
        patterns::AUTH_LOGOUT_ALL,
        Arc::new(LogoutAllHandler { auth: auth.clone() }),
    );
    responder.register(
        patterns::AUTH_VALIDATE_TOKEN,
        Arc::new(ValidateTokenHandler { auth }),
    );
    responder.register(
        patterns::AUTH_BLACKLIST_CHECK,
        Arc::new(BlacklistCheckHandler { tokens }),
    );
}
