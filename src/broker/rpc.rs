use crate::broker::{
    BrokerConnection, ConnState, Envelope, ErrorBody, HandleOutcome, MessageHandler,
    ResponseEnvelope, ResponseStatus, patterns,
};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("service unavailable for {pattern}: {reason}")]
    Unavailable { pattern: String, reason: String },
    #[error("timed out after {timeout_ms}ms waiting on {pattern}")]
    Timeout { pattern: String, timeout_ms: u64 },
    #[error("{code}: {message}")]
    Application {
        code: String,
        message: String,
        details: Option<Value>,
    },
    #[error("malformed response for {pattern}: {reason}")]
    BadResponse { pattern: String, reason: String },
    #[error("failed to encode request: {0}")]
    Encode(String),
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Per-attempt response deadline.
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Base backoff; attempt `n` waits `retry_delay * n`.
    pub retry_delay: Duration,
    /// Honored on the first attempt only; retries always regenerate.
    pub correlation_id: Option<String>,
}

impl Default for SendOptions {
    fn default() -> Self {
        SendOptions {
            timeout: Duration::from_secs(10),
            max_attempts: 1,
            retry_delay: Duration::from_secs(1),
            correlation_id: None,
        }
    }
}

enum AttemptFailure {
    Timeout,
    Transport(String),
}

/// Request/response over fire-and-forget pub/sub. One outstanding
/// correlation id maps to one single-resolution completion handle; the
/// response consumer feeds `dispatch_response`, and whichever of
/// response-arrival or timeout fires first removes the entry.
pub struct RpcClient {
    connection: Arc<dyn BrokerConnection>,
    pending: DashMap<String, oneshot::Sender<ResponseEnvelope>>,
    reply_topics: Mutex<Vec<String>>,
    source: String,
    defaults: SendOptions,
}

impl RpcClient {
    pub fn new(connection: Arc<dyn BrokerConnection>, source: &str, defaults: SendOptions) -> Self {
        RpcClient {
            connection,
            pending: DashMap::new(),
            reply_topics: Mutex::new(Vec::new()),
            source: source.to_string(),
            defaults,
        }
    }

    /// Registers interest in replies for a pattern. The wiring subscribes
    /// the response consumer to every topic collected here before the first
    /// `send`.
    pub fn subscribe_to_response_of(&self, pattern: &str) {
        let topic = patterns::reply_topic(pattern);
        if let Ok(mut topics) = self.reply_topics.lock() {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
    }

    pub fn reply_topics(&self) -> Vec<String> {
        self.reply_topics
            .lock()
            .map(|topics| topics.clone())
            .unwrap_or_default()
    }

    pub async fn send<TReq, TResp>(&self, pattern: &str, data: &TReq) -> Result<TResp, RpcError>
    where
        TReq: Serialize + Sync,
        TResp: DeserializeOwned,
    {
        self.send_with(pattern, data, self.defaults.clone()).await
    }

    pub async fn send_with<TReq, TResp>(
        &self,
        pattern: &str,
        data: &TReq,
        opts: SendOptions,
    ) -> Result<TResp, RpcError>
    where
        TReq: Serialize + Sync,
        TResp: DeserializeOwned,
    {
        let data = serde_json::to_value(data).map_err(|e| RpcError::Encode(e.to_string()))?;
        let max_attempts = opts.max_attempts.max(1);
        let mut last_failure = AttemptFailure::Transport("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            if self.connection.state() != ConnState::Connected {
                if let Err(e) = self.connection.connect().await {
                    tracing::warn!(pattern, attempt, error = %e, "reconnect failed");
                    last_failure = AttemptFailure::Transport(e.to_string());
                    tokio::time::sleep(opts.retry_delay * attempt).await;
                    continue;
                }
                tracing::info!(pattern, attempt, "broker reconnected");
            }

            // fresh id per attempt: a stale reply to a timed-out attempt
            // must never match a later attempt's wait
            let correlation_id = match &opts.correlation_id {
                Some(id) if attempt == 1 => id.clone(),
                _ => new_correlation_id(),
            };

            match self
                .attempt::<TResp>(pattern, &data, &correlation_id, opts.timeout)
                .await
            {
                Ok(outcome) => return outcome,
                Err(failure) => {
                    last_failure = failure;
                    if attempt < max_attempts {
                        tracing::warn!(pattern, attempt, max_attempts, "attempt failed");
                        tokio::time::sleep(opts.retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(match last_failure {
            AttemptFailure::Timeout => RpcError::Timeout {
                pattern: pattern.to_string(),
                timeout_ms: opts.timeout.as_millis() as u64,
            },
            AttemptFailure::Transport(reason) => RpcError::Unavailable {
                pattern: pattern.to_string(),
                reason,
            },
        })
    }

    /// One publish-and-wait. `Ok(Err(..))` carries a terminal error that
    /// must not be retried (business error, undecodable response);
    /// `Err(..)` is a transient failure the retry loop may absorb.
    async fn attempt<TResp: DeserializeOwned>(
        &self,
        pattern: &str,
        data: &Value,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<Result<TResp, RpcError>, AttemptFailure> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.to_string(), tx);

        let envelope = Envelope::request(data.clone(), &self.source, correlation_id);
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                self.pending.remove(correlation_id);
                return Ok(Err(RpcError::Encode(e.to_string())));
            }
        };

        if let Err(e) = self
            .connection
            .publish(pattern, correlation_id.as_bytes(), &payload)
            .await
        {
            self.pending.remove(correlation_id);
            return Err(AttemptFailure::Transport(e.to_string()));
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Err(_elapsed) => {
                // releases the slot; a late reply is dropped as unmatched
                self.pending.remove(correlation_id);
                return Err(AttemptFailure::Timeout);
            }
            Ok(Err(_closed)) => {
                self.pending.remove(correlation_id);
                return Err(AttemptFailure::Transport("pending call dropped".to_string()));
            }
            Ok(Ok(response)) => response,
        };

        match response.status {
            ResponseStatus::Error => {
                let body = response.error.unwrap_or_else(|| ErrorBody {
                    code: "UNKNOWN".to_string(),
                    message: "unknown error".to_string(),
                    details: None,
                });
                Ok(Err(RpcError::Application {
                    code: body.code,
                    message: body.message,
                    details: body.details,
                }))
            }
            ResponseStatus::Success => {
                let value = response.data.unwrap_or(Value::Null);
                match serde_json::from_value(value) {
                    Ok(decoded) => Ok(Ok(decoded)),
                    Err(e) => Ok(Err(RpcError::BadResponse {
                        pattern: pattern.to_string(),
                        reason: e.to_string(),
                    })),
                }
            }
        }
    }

    /// Fire-and-forget counterpart of `send`: no response wait, no retry.
    pub async fn emit<T: Serialize + Sync>(&self, topic: &str, message: &T) -> Result<(), RpcError> {
        if self.connection.state() != ConnState::Connected {
            return Err(RpcError::Unavailable {
                pattern: topic.to_string(),
                reason: "not connected".to_string(),
            });
        }

        let value = serde_json::to_value(message).map_err(|e| RpcError::Encode(e.to_string()))?;
        let payload = crate::broker::encode(&value, &self.source, crate::broker::KIND_EVENT)
            .map_err(|e| RpcError::Encode(e.to_string()))?;

        self.connection
            .publish(topic, &[], &payload)
            .await
            .map_err(|e| RpcError::Unavailable {
                pattern: topic.to_string(),
                reason: e.to_string(),
            })
    }

    /// Demultiplexes one reply to its waiting call; unmatched or unparsable
    /// replies are dropped.
    pub fn dispatch_response(&self, payload: &[u8]) {
        let response = match serde_json::from_slice::<ResponseEnvelope>(payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparsable reply");
                return;
            }
        };

        let Some(correlation_id) = response.correlation_id().map(str::to_string) else {
            tracing::warn!("dropping reply without correlation id");
            return;
        };

        match self.pending.remove(&correlation_id) {
            Some((_, tx)) => {
                // the receiver may have timed out between remove and send
                let _ = tx.send(response);
            }
            None => tracing::trace!(correlation_id, "dropping unmatched reply"),
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Feeds the response consumer into the client's demultiplexer.
pub struct RpcResponseHandler {
    client: Arc<RpcClient>,
}

impl RpcResponseHandler {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl MessageHandler for RpcResponseHandler {
    async fn handle(&self, _topic: &str, payload: &[u8]) -> anyhow::Result<HandleOutcome> {
        self.client.dispatch_response(payload);
        Ok(HandleOutcome::Commit)
    }
}
