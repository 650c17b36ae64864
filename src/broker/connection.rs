use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnState {
    Disconnected,
    Connected,
}

/// The single long-lived link to the broker. Health is an explicit state
/// value owned by the instance and queried by method; reconnection is
/// attempted lazily by callers, never by a background loop.
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Idempotent; a no-op when already connected.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Drains in-flight messages and releases the connection.
    async fn close(&self);

    fn state(&self) -> ConnState;

    /// Fire-and-forget. Fails only for broker-side delivery problems, never
    /// for whatever a downstream consumer does with the message.
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<(), BrokerError>;
}

pub struct KafkaConnection {
    producer: FutureProducer,
    state: RwLock<ConnState>,
    probe_timeout: Duration,
    delivery_timeout: Duration,
}

impl KafkaConnection {
    pub fn try_new(brokers: &str, client_id: &str) -> anyhow::Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "1")
            .set("compression.type", "lz4")
            .create()?;

        Ok(Self {
            producer,
            state: RwLock::new(ConnState::Disconnected),
            probe_timeout: Duration::from_secs(5),
            delivery_timeout: Duration::from_secs(10),
        })
    }

    fn set_state(&self, state: ConnState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
    }
}

#[async_trait::async_trait]
impl BrokerConnection for KafkaConnection {
    async fn connect(&self) -> Result<(), BrokerError> {
        if self.state() == ConnState::Connected {
            return Ok(());
        }

        // librdkafka connects lazily; a metadata fetch is the actual probe
        let producer = self.producer.clone();
        let timeout = self.probe_timeout;
        let probe = tokio::task::spawn_blocking(move || {
            producer.client().fetch_metadata(None, timeout).map(|_| ())
        })
        .await
        .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        match probe {
            Ok(()) => {
                self.set_state(ConnState::Connected);
                tracing::info!("broker connection established");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnState::Disconnected);
                Err(BrokerError::Unavailable(e.to_string()))
            }
        }
    }

    async fn close(&self) {
        let producer = self.producer.clone();
        let timeout = self.delivery_timeout;
        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout)).await;
        if let Ok(Err(e)) = flushed {
            tracing::warn!(error = %e, "flush on close failed");
        }
        self.set_state(ConnState::Disconnected);
    }

    fn state(&self) -> ConnState {
        self.state.read().map(|guard| *guard).unwrap_or(ConnState::Disconnected)
    }

    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<(), BrokerError> {
        let mut record = FutureRecord::to(topic).payload(payload);
        if !key.is_empty() {
            record = record.key(key);
        }

        match self.producer.send(record, self.delivery_timeout).await {
            Ok(_delivery) => Ok(()),
            Err((e, _msg)) => {
                // any delivery failure forces a reprobe on the next call
                self.set_state(ConnState::Disconnected);
                Err(BrokerError::Unavailable(e.to_string()))
            }
        }
    }
}
