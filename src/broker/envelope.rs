use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const UNKNOWN_SOURCE: &str = "unknown";

pub const KIND_REQUEST: &str = "request";
pub const KIND_RESPONSE: &str = "response";
pub const KIND_EVENT: &str = "event";
pub const KIND_ERROR: &str = "error";
pub const KIND_UNKNOWN: &str = "unknown";

/// Wire metadata attached to every message crossing the broker. All fields
/// are defaulted so envelopes from senders on an older wire shape still
/// decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default = "unknown_string")]
    pub source: String,
    #[serde(rename = "type", default = "unknown_string")]
    pub kind: String,
}

fn unknown_string() -> String {
    UNKNOWN_SOURCE.to_string()
}

impl MessageMetadata {
    pub fn synthesized(source: &str, kind: &str) -> Self {
        MessageMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            correlation_id: None,
            trace_id: None,
            source: source.to_string(),
            kind: kind.to_string(),
        }
    }
}

/// The `{metadata, data}` wrapper around every broker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub metadata: MessageMetadata,
    pub data: Value,
}

impl Envelope {
    pub fn request(data: Value, source: &str, correlation_id: &str) -> Self {
        let mut metadata = MessageMetadata::synthesized(source, KIND_REQUEST);
        metadata.correlation_id = Some(correlation_id.to_string());
        Envelope { metadata, data }
    }

    pub fn is_decode_error(&self) -> bool {
        self.metadata.kind == KIND_ERROR
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Wire shape of a reply: status plus either `data` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ResponseEnvelope {
    pub fn success(data: Value, source: &str, correlation_id: Option<String>) -> Self {
        let mut metadata = MessageMetadata::synthesized(source, KIND_RESPONSE);
        metadata.correlation_id = correlation_id;
        ResponseEnvelope {
            status: ResponseStatus::Success,
            data: Some(data),
            error: None,
            metadata: Some(metadata),
        }
    }

    pub fn error(error: ErrorBody, source: &str, correlation_id: Option<String>) -> Self {
        let mut metadata = MessageMetadata::synthesized(source, KIND_RESPONSE);
        metadata.correlation_id = correlation_id;
        ResponseEnvelope {
            status: ResponseStatus::Error,
            data: None,
            error: Some(error),
            metadata: Some(metadata),
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.correlation_id.as_deref())
    }
}

/// Exactly one request shape is legal on this wire: `data` holds the bare
/// payload. A `data` that is itself envelope-shaped is the legacy
/// double-wrapped variant and gets rejected, not unwrapped.
pub fn is_envelope_shaped(value: &Value) -> bool {
    value.get("metadata").is_some_and(Value::is_object) && value.get("data").is_some()
}

/// Serializes a value for the wire. Values already carrying the envelope
/// shape pass through untouched; anything else is wrapped with synthesized
/// metadata.
pub fn encode(value: &Value, source: &str, kind: &str) -> anyhow::Result<Vec<u8>> {
    if is_envelope_shaped(value) {
        return Ok(serde_json::to_vec(value)?);
    }

    let envelope = Envelope {
        metadata: MessageMetadata::synthesized(source, kind),
        data: value.clone(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Parses wire bytes into an envelope. This never fails: messages missing
/// `metadata` or `data` are wrapped with synthesized defaults, and
/// unparsable bytes come back as a sentinel error envelope carrying the raw
/// content, so a consumer loop can log and move on instead of dying.
pub fn decode(bytes: &[u8]) -> Envelope {
    let parsed: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            return Envelope {
                metadata: MessageMetadata::synthesized(UNKNOWN_SOURCE, KIND_ERROR),
                data: json!({
                    "message": format!("error deserializing message: {e}"),
                    "originalContent": String::from_utf8_lossy(bytes),
                }),
            };
        }
    };

    if is_envelope_shaped(&parsed) {
        let Value::Object(mut fields) = parsed else {
            unreachable!("envelope-shaped implies object");
        };
        let metadata_value = fields.remove("metadata").unwrap_or(Value::Null);
        let data = fields.remove("data").unwrap_or(Value::Null);
        let metadata = serde_json::from_value::<MessageMetadata>(metadata_value)
            .unwrap_or_else(|_| MessageMetadata::synthesized(UNKNOWN_SOURCE, KIND_UNKNOWN));
        return Envelope { metadata, data };
    }

    tracing::warn!("decoding non-envelope message, wrapping it");
    Envelope {
        metadata: MessageMetadata::synthesized(UNKNOWN_SOURCE, KIND_UNKNOWN),
        data: parsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_well_formed_envelopes() {
        let envelope = Envelope::request(json!({"id": "42"}), "auth-service", "corr-1");
        let bytes = serde_json::to_vec(&envelope).unwrap();

        assert_eq!(decode(&bytes), envelope);
    }

    #[test]
    fn encode_passes_through_envelope_shaped_values() {
        let shaped = json!({
            "metadata": {"id": "m-1", "timestamp": 7, "source": "svc", "type": "event"},
            "data": {"k": "v"},
        });

        let bytes = encode(&shaped, "other", KIND_EVENT).unwrap();
        let reparsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reparsed, shaped);
    }

    #[test]
    fn encode_wraps_bare_values() {
        let bytes = encode(&json!({"id": "42"}), "auth-service", KIND_EVENT).unwrap();
        let envelope = decode(&bytes);

        assert_eq!(envelope.metadata.source, "auth-service");
        assert_eq!(envelope.metadata.kind, KIND_EVENT);
        assert_eq!(envelope.data, json!({"id": "42"}));
    }

    #[test]
    fn decode_synthesizes_metadata_for_legacy_messages() {
        let envelope = decode(br#"{"id": "42", "name": "bare"}"#);

        assert_eq!(envelope.metadata.source, UNKNOWN_SOURCE);
        assert_eq!(envelope.metadata.kind, KIND_UNKNOWN);
        assert_eq!(envelope.data, json!({"id": "42", "name": "bare"}));
    }

    #[test]
    fn decode_tolerates_partial_metadata() {
        let envelope = decode(br#"{"metadata": {"correlationId": "c-9"}, "data": 1}"#);

        assert_eq!(envelope.metadata.correlation_id.as_deref(), Some("c-9"));
        assert_eq!(envelope.metadata.source, UNKNOWN_SOURCE);
        assert_eq!(envelope.data, json!(1));
    }

    #[test]
    fn decode_returns_sentinel_on_unparsable_bytes() {
        let envelope = decode(b"not json at all");

        assert!(envelope.is_decode_error());
        assert_eq!(envelope.data["originalContent"], json!("not json at all"));
    }

    #[test]
    fn double_wrapped_payloads_are_detectable() {
        let inner = Envelope::request(json!({"id": "42"}), "svc", "corr-2");
        let outer = Envelope::request(serde_json::to_value(&inner).unwrap(), "svc", "corr-2");

        assert!(is_envelope_shaped(&outer.data));
        assert!(!is_envelope_shaped(&inner.data));
    }
}
