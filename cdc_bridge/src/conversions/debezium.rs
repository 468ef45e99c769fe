use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Column name to value mapping of a captured row image.
pub type RowImage = Map<String, Value>;

/// Kind of row change carried by a Debezium value message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    /// Row emitted while the connector takes a snapshot.
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "t")]
    Truncate,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::Read,
        Operation::Truncate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "c",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::Read => "r",
            Operation::Truncate => "t",
        }
    }

    pub fn from_code(code: &str) -> Option<Operation> {
        Self::ALL.into_iter().find(|op| op.as_str() == code)
    }

    /// Snapshot reads do not change data, every other operation does.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Operation::Read)
    }
}

/// Debezium emits `snapshot` as a string (`"true"`, `"last"`, ...) for most
/// connectors but some versions send a plain boolean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotMarker {
    Flag(bool),
    Marker(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebeziumSourceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub connector: String,
    pub name: String,
    pub ts_ms: Number,
    pub db: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotMarker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,

    // mysql binlog position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    // postgres wal position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsn: Option<Number>,
    #[serde(default, rename = "txId", skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xmin: Option<Number>,

    /// Connector specific fields that are carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebeziumTransaction {
    pub id: String,
    pub total_order: Number,
    pub data_collection_order: Number,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuePayload {
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
    pub source: DebeziumSourceInfo,
    pub op: Operation,
    pub ts_ms: Number,
    #[serde(default)]
    pub transaction: Option<DebeziumTransaction>,
}

impl ValuePayload {
    /// The row image that describes the change: the new row for creates,
    /// updates and snapshot reads, the old row for deletes.
    pub fn row(&self) -> Option<&RowImage> {
        match self.op {
            Operation::Create | Operation::Update | Operation::Read => self.after.as_ref(),
            Operation::Delete => self.before.as_ref(),
            Operation::Truncate => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPayload {
    pub id: String,
}

/// Connect schema metadata attached to every message. Only its shape is
/// checked, the content is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Number>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaEnvelope<T> {
    pub schema: SchemaDescriptor,
    pub payload: T,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn operation_codes() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_code(op.as_str()), Some(op));
            assert_eq!(serde_json::to_value(op).unwrap(), json!(op.as_str()));
        }
        assert_eq!(Operation::from_code("x"), None);
        assert!(!Operation::Read.is_mutating());
        assert!(Operation::Truncate.is_mutating());
    }

    #[test]
    fn row_follows_operation() {
        let mut payload: ValuePayload = serde_json::from_value(json!({
            "before": {"id": 1, "name": "old"},
            "after": {"id": 1, "name": "new"},
            "source": {"connector": "mysql", "name": "db1", "ts_ms": 1, "db": "app", "table": "users"},
            "op": "u",
            "ts_ms": 2
        }))
        .unwrap();

        assert_eq!(payload.row().unwrap()["name"], "new");
        assert!(payload.transaction.is_none());

        payload.op = Operation::Delete;
        assert_eq!(payload.row().unwrap()["name"], "old");

        payload.op = Operation::Truncate;
        assert!(payload.row().is_none());
    }

    #[test]
    fn source_keeps_unknown_fields() {
        let source: DebeziumSourceInfo = serde_json::from_value(json!({
            "connector": "postgresql",
            "name": "pg",
            "ts_ms": 1699564800000u64,
            "db": "app",
            "table": "orders",
            "snapshot": "last",
            "lsn": 24023128,
            "txId": 555,
            "custom": {"a": 1}
        }))
        .unwrap();

        assert_eq!(source.snapshot, Some(SnapshotMarker::Marker("last".into())));
        assert_eq!(source.tx_id.as_ref().and_then(Number::as_u64), Some(555));
        assert_eq!(source.extra["custom"], json!({"a": 1}));

        let back = serde_json::to_value(&source).unwrap();
        assert_eq!(back["txId"], 555);
        assert_eq!(back["custom"]["a"], 1);
    }
}
