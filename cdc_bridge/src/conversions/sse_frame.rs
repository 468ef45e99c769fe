use std::fmt;

use serde_json::json;

use crate::{
    conversions::cdc_event::CdcEvent,
    pipeline::bridge::{BridgeError, BridgeEvent},
};

pub const PARSED_EVENT: &str = "cdc";
pub const UNKNOWN_EVENT: &str = "cdc-unknown";
pub const ERROR_EVENT: &str = "error";

/// One server-sent-events message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn from_event(event: &BridgeEvent) -> Result<SseFrame, serde_json::Error> {
        let name = match event.event {
            CdcEvent::Parsed { .. } => PARSED_EVENT,
            CdcEvent::Unknown { .. } => UNKNOWN_EVENT,
        };
        Ok(SseFrame {
            id: Some(event.id.clone()),
            event: name.to_string(),
            data: serde_json::to_string(&event.event)?,
        })
    }

    /// Terminal frame sent before closing a stream that failed.
    pub fn error(error: &BridgeError) -> SseFrame {
        SseFrame {
            id: None,
            event: ERROR_EVENT.to_string(),
            data: json!({ "message": error.to_string() }).to_string(),
        }
    }
}

impl fmt::Display for SseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.id {
            writeln!(f, "id: {id}")?;
        }
        writeln!(f, "event: {}", self.event)?;
        for line in self.data.lines() {
            writeln!(f, "data: {line}")?;
        }
        writeln!(f)
    }
}
