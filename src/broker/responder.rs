use crate::broker::{
    BrokerConnection, Envelope, ErrorBody, HandleOutcome, MessageHandler, ResponseEnvelope,
    is_envelope_shaped, patterns,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome a pattern handler reports back over the wire. Handlers are
/// infallible at the transport level; anything that goes wrong becomes an
/// error response envelope with a stable code.
#[derive(Debug)]
pub struct HandlerError {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        HandlerError {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// One request pattern's implementation. Handlers must be idempotent: a
/// caller that timed out may retry an operation that already completed here.
#[async_trait::async_trait]
pub trait PatternHandler: Send + Sync {
    async fn handle(&self, request: Envelope) -> Result<Value, HandlerError>;
}

/// Serves request patterns off the consumer stream and publishes response
/// envelopes to `<pattern>.reply`, echoing the request's correlation id.
pub struct RequestResponder {
    connection: Arc<dyn BrokerConnection>,
    handlers: HashMap<String, Arc<dyn PatternHandler>>,
    source: String,
}

impl RequestResponder {
    pub fn new(connection: Arc<dyn BrokerConnection>, source: &str) -> Self {
        RequestResponder {
            connection,
            handlers: HashMap::new(),
            source: source.to_string(),
        }
    }

    pub fn register(&mut self, pattern: &str, handler: Arc<dyn PatternHandler>) {
        self.handlers.insert(pattern.to_string(), handler);
    }

    pub fn patterns(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl MessageHandler for RequestResponder {
    async fn handle(&self, topic: &str, payload: &[u8]) -> anyhow::Result<HandleOutcome> {
        let request = crate::broker::decode(payload);
        if request.is_decode_error() {
            tracing::warn!(topic, "skipping undecodable request");
            return Ok(HandleOutcome::Commit);
        }

        let Some(correlation_id) = request.metadata.correlation_id.clone() else {
            tracing::warn!(topic, "skipping request without correlation id");
            return Ok(HandleOutcome::Commit);
        };

        let Some(handler) = self.handlers.get(topic) else {
            tracing::warn!(topic, "no handler registered");
            return Ok(HandleOutcome::Commit);
        };

        let response = if is_envelope_shaped(&request.data) {
            // the legacy double-wrapped shape is rejected, not unwrapped
            ResponseEnvelope::error(
                ErrorBody {
                    code: "VALIDATION".to_string(),
                    message: "nested envelope payload is not accepted".to_string(),
                    details: None,
                },
                &self.source,
                Some(correlation_id.clone()),
            )
        } else {
            match handler.handle(request).await {
                Ok(data) => {
                    ResponseEnvelope::success(data, &self.source, Some(correlation_id.clone()))
                }
                Err(e) => ResponseEnvelope::error(
                    ErrorBody {
                        code: e.code,
                        message: e.message,
                        details: e.details,
                    },
                    &self.source,
                    Some(correlation_id.clone()),
                ),
            }
        };

        let reply_payload = serde_json::to_vec(&response)?;
        let reply_topic = patterns::reply_topic(topic);
        if let Err(e) = self
            .connection
            .publish(&reply_topic, correlation_id.as_bytes(), &reply_payload)
            .await
        {
            tracing::error!(topic, error = %e, "failed to publish reply");
            // leave uncommitted for redelivery; handlers are idempotent
            return Ok(HandleOutcome::Retry);
        }

        Ok(HandleOutcome::Commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{FakeBrokerConnection, ResponseStatus};
    use serde_json::json;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl PatternHandler for EchoHandler {
        async fn handle(&self, request: Envelope) -> Result<Value, HandlerError> {
            Ok(json!({"echo": request.data}))
        }
    }

    struct RejectingHandler;

    #[async_trait::async_trait]
    impl PatternHandler for RejectingHandler {
        async fn handle(&self, _request: Envelope) -> Result<Value, HandlerError> {
            Err(HandlerError::new("UNAUTHORIZED", "bad credentials"))
        }
    }

    fn responder(
        conn: Arc<FakeBrokerConnection>,
        pattern: &str,
        handler: Arc<dyn PatternHandler>,
    ) -> RequestResponder {
        let mut responder = RequestResponder::new(conn, "auth-service");
        responder.register(pattern, handler);
        responder
    }

    fn request_bytes(data: Value, correlation_id: &str) -> Vec<u8> {
        serde_json::to_vec(&Envelope::request(data, "gateway", correlation_id)).unwrap()
    }

    fn last_reply(conn: &FakeBrokerConnection) -> (String, ResponseEnvelope) {
        let published = conn.published();
        let message = published.last().unwrap();
        (
            message.topic.clone(),
            serde_json::from_slice(&message.payload).unwrap(),
        )
    }

    #[tokio::test]
    async fn replies_on_the_reply_topic_with_the_request_correlation_id() {
        let conn = Arc::new(FakeBrokerConnection::new());
        let responder = responder(conn.clone(), "auth.login", Arc::new(EchoHandler));

        responder
            .handle("auth.login", &request_bytes(json!({"user": "u"}), "corr-7"))
            .await
            .unwrap();

        let (topic, reply) = last_reply(&conn);
        assert_eq!(topic, "auth.login.reply");
        assert_eq!(reply.status, ResponseStatus::Success);
        assert_eq!(reply.correlation_id(), Some("corr-7"));
        assert_eq!(reply.data.unwrap(), json!({"echo": {"user": "u"}}));
    }

    #[tokio::test]
    async fn handler_errors_become_error_envelopes() {
        let conn = Arc::new(FakeBrokerConnection::new());
        let responder = responder(conn.clone(), "auth.login", Arc::new(RejectingHandler));

        responder
            .handle("auth.login", &request_bytes(json!({}), "corr-8"))
            .await
            .unwrap();

        let (_, reply) = last_reply(&conn);
        assert_eq!(reply.status, ResponseStatus::Error);
        assert_eq!(reply.error.unwrap().code, "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn double_wrapped_requests_are_rejected_not_unwrapped() {
        let conn = Arc::new(FakeBrokerConnection::new());
        let responder = responder(conn.clone(), "auth.login", Arc::new(EchoHandler));

        let inner = Envelope::request(json!({"user": "u"}), "gateway", "corr-9");
        let outer = request_bytes(serde_json::to_value(&inner).unwrap(), "corr-9");
        responder.handle("auth.login", &outer).await.unwrap();

        let (_, reply) = last_reply(&conn);
        assert_eq!(reply.status, ResponseStatus::Error);
        assert_eq!(reply.error.unwrap().code, "VALIDATION");
    }

    #[tokio::test]
    async fn requests_without_correlation_id_are_skipped() {
        let conn = Arc::new(FakeBrokerConnection::new());
        let responder = responder(conn.clone(), "auth.login", Arc::new(EchoHandler));

        let bytes = crate::broker::encode(
            &json!({"user": "u"}),
            "gateway",
            crate::broker::KIND_EVENT,
        )
        .unwrap();
        responder.handle("auth.login", &bytes).await.unwrap();

        assert_eq!(conn.publish_count(), 0);
    }
}
