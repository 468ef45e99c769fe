use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::sources::RawMessage;

use super::{
    debezium::{KeyPayload, SchemaEnvelope, ValuePayload},
    headers::{normalize_headers, Headers},
    validation::{validate_key, validate_value},
};

/// Broker coordinates shared by both event variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventMeta {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
    pub headers: Headers,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CdcEvent {
    Parsed {
        #[serde(flatten)]
        meta: EventMeta,
        key: Option<SchemaEnvelope<KeyPayload>>,
        value: SchemaEnvelope<ValuePayload>,
    },
    /// A record that could not be read as a Debezium change. Carries the raw
    /// text so the problem stays visible downstream.
    Unknown {
        #[serde(flatten)]
        meta: EventMeta,
        key_raw: Option<String>,
        value_raw: Option<String>,
        parse_error: String,
    },
}

impl CdcEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            CdcEvent::Parsed { meta, .. } | CdcEvent::Unknown { meta, .. } => meta,
        }
    }

    pub fn offset(&self) -> i64 {
        self.meta().offset
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CdcEvent::Parsed { .. } => "parsed",
            CdcEvent::Unknown { .. } => "unknown",
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, CdcEvent::Parsed { .. })
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.meta()
            .timestamp
            .and_then(DateTime::from_timestamp_millis)
    }
}

fn decode(bytes: &Option<bytes::Bytes>) -> Option<String> {
    bytes
        .as_ref()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

/// Every record turns into exactly one event: anything that fails to decode
/// or validate becomes [`CdcEvent::Unknown`].
impl From<&RawMessage> for CdcEvent {
    fn from(message: &RawMessage) -> CdcEvent {
        let meta = EventMeta {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            timestamp: message.timestamp,
            headers: normalize_headers(&message.headers),
        };
        let key_raw = decode(&message.key);
        let value_raw = decode(&message.value);

        // keyless records are fine, a key that is present has to be valid
        let key = match key_raw.as_deref() {
            Some(raw) => validate_key(Some(raw)).map(Some),
            None => Ok(None),
        };
        let value = validate_value(value_raw.as_deref());

        match (key, value) {
            (Ok(key), Ok(value)) => CdcEvent::Parsed { meta, key, value },
            (key, value) => {
                let parse_error = [
                    key.err().map(|e| format!("key: {e}")),
                    value.err().map(|e| format!("value: {e}")),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("; ");

                CdcEvent::Unknown {
                    meta,
                    key_raw,
                    value_raw,
                    parse_error,
                }
            }
        }
    }
}
