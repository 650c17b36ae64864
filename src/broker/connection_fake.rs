use crate::broker::{BrokerConnection, BrokerError, ConnState};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

// Minimal fake for tests and demos: records publishes, simulates a healthy
// or unreachable broker.
pub struct FakeBrokerConnection {
    connected: AtomicBool,
    connect_fails: AtomicBool,
    connect_attempts: AtomicU32,
    published: Mutex<Vec<PublishedMessage>>,
}

impl FakeBrokerConnection {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            connect_fails: AtomicBool::new(false),
            connect_attempts: AtomicU32::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Starts disconnected with every reconnect attempt failing.
    pub fn unreachable() -> Self {
        let conn = Self::new();
        conn.connected.store(false, Ordering::SeqCst);
        conn.connect_fails.store(true, Ordering::SeqCst);
        conn
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for FakeBrokerConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BrokerConnection for FakeBrokerConnection {
    async fn connect(&self) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.connect_fails.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("fake broker is down".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn state(&self) -> ConnState {
        if self.connected.load(Ordering::SeqCst) {
            ConnState::Connected
        } else {
            ConnState::Disconnected
        }
    }

    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<(), BrokerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("fake broker is down".to_string()));
        }
        if let Ok(mut published) = self.published.lock() {
            published.push(PublishedMessage {
                topic: topic.to_string(),
                key: key.to_vec(),
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }
}
