use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use super::debezium::{KeyPayload, Operation, SchemaEnvelope, ValuePayload};

/// Which message of a broker record is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePart {
    Key,
    Value,
}

impl fmt::Display for MessagePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessagePart::Key => f.write_str("key"),
            MessagePart::Value => f.write_str("value"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Empty {0}")]
    Empty(MessagePart),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("{}", .0.join("; "))]
    Schema(Vec<String>),
}

impl ValidationError {
    /// Field level issues, empty unless the JSON did not match the schema.
    pub fn issues(&self) -> &[String] {
        match self {
            ValidationError::Schema(issues) => issues,
            _ => &[],
        }
    }
}

/// Validates the value message of a Debezium record.
pub fn validate_value(
    raw: Option<&str>,
) -> Result<SchemaEnvelope<ValuePayload>, ValidationError> {
    validate(raw, MessagePart::Value, check_value_payload)
}

/// Validates the key message of a Debezium record.
pub fn validate_key(raw: Option<&str>) -> Result<SchemaEnvelope<KeyPayload>, ValidationError> {
    validate(raw, MessagePart::Key, check_key_payload)
}

fn validate<T: DeserializeOwned>(
    raw: Option<&str>,
    part: MessagePart,
    check_payload: fn(&mut Checker, &Map<String, Value>, &str),
) -> Result<SchemaEnvelope<T>, ValidationError> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(ValidationError::Empty(part)),
    };

    let json: Value = serde_json::from_str(raw).map_err(ValidationError::InvalidJson)?;

    let mut checker = Checker::default();
    checker.envelope(&json, check_payload);
    if !checker.issues.is_empty() {
        return Err(ValidationError::Schema(checker.issues));
    }

    // the shape has been checked, so this only fails on cases the checker
    // does not model
    serde_json::from_value(json).map_err(|e| ValidationError::Schema(vec![e.to_string()]))
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    String,
    Number,
    Boolean,
    Object,
    Array,
    StringOrBoolean,
}

impl Shape {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Shape::String => value.is_string(),
            Shape::Number => value.is_number(),
            Shape::Boolean => value.is_boolean(),
            Shape::Object => value.is_object(),
            Shape::Array => value.is_array(),
            Shape::StringOrBoolean => value.is_string() || value.is_boolean(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Shape::String => "string",
            Shape::Number => "number",
            Shape::Boolean => "boolean",
            Shape::Object => "object",
            Shape::Array => "array",
            Shape::StringOrBoolean => "string | boolean",
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Collects every field level issue instead of stopping at the first one.
#[derive(Debug, Default)]
struct Checker {
    issues: Vec<String>,
}

enum Presence {
    Required,
    Nullable,
    Optional,
}

impl Checker {
    fn issue(&mut self, path: &str, message: String) {
        if path.is_empty() {
            self.issues.push(message);
        } else {
            self.issues.push(format!("{path}: {message}"));
        }
    }

    fn field<'a>(
        &mut self,
        obj: &'a Map<String, Value>,
        path: &str,
        key: &str,
        shape: Shape,
        presence: Presence,
    ) -> Option<&'a Value> {
        let path = join(path, key);
        match (obj.get(key), presence) {
            (None, Presence::Optional) => None,
            (None, _) => {
                self.issue(&path, "Required".to_string());
                None
            }
            (Some(Value::Null), Presence::Nullable | Presence::Optional) => None,
            (Some(value), _) if shape.matches(value) => Some(value),
            (Some(value), _) => {
                self.issue(
                    &path,
                    format!("Expected {}, received {}", shape.name(), kind_of(value)),
                );
                None
            }
        }
    }

    fn required(&mut self, obj: &Map<String, Value>, path: &str, key: &str, shape: Shape) {
        self.field(obj, path, key, shape, Presence::Required);
    }

    fn optional(&mut self, obj: &Map<String, Value>, path: &str, key: &str, shape: Shape) {
        self.field(obj, path, key, shape, Presence::Optional);
    }

    fn envelope(&mut self, json: &Value, check_payload: fn(&mut Checker, &Map<String, Value>, &str)) {
        let Some(root) = json.as_object() else {
            self.issue("", format!("Expected object, received {}", kind_of(json)));
            return;
        };

        if let Some(schema) = self
            .field(root, "", "schema", Shape::Object, Presence::Required)
            .and_then(Value::as_object)
        {
            self.required(schema, "schema", "type", Shape::String);
            self.optional(schema, "schema", "fields", Shape::Array);
            self.optional(schema, "schema", "name", Shape::String);
            self.optional(schema, "schema", "optional", Shape::Boolean);
            self.optional(schema, "schema", "version", Shape::Number);
        }

        if let Some(payload) = self
            .field(root, "", "payload", Shape::Object, Presence::Required)
            .and_then(Value::as_object)
        {
            check_payload(self, payload, "payload");
        }
    }
}

fn check_key_payload(checker: &mut Checker, payload: &Map<String, Value>, path: &str) {
    checker.required(payload, path, "id", Shape::String);
}

fn check_value_payload(checker: &mut Checker, payload: &Map<String, Value>, path: &str) {
    checker.field(payload, path, "before", Shape::Object, Presence::Nullable);
    checker.field(payload, path, "after", Shape::Object, Presence::Nullable);

    if let Some(source) = checker
        .field(payload, path, "source", Shape::Object, Presence::Required)
        .and_then(Value::as_object)
    {
        check_source(checker, source, &join(path, "source"));
    }

    if let Some(op) = checker
        .field(payload, path, "op", Shape::String, Presence::Required)
        .and_then(Value::as_str)
    {
        if Operation::from_code(op).is_none() {
            let expected = Operation::ALL
                .iter()
                .map(|op| format!("'{}'", op.as_str()))
                .collect::<Vec<_>>()
                .join(" | ");
            checker.issue(
                &join(path, "op"),
                format!("Invalid enum value. Expected {expected}, received '{op}'"),
            );
        }
    }

    checker.required(payload, path, "ts_ms", Shape::Number);

    if let Some(transaction) = checker
        .field(payload, path, "transaction", Shape::Object, Presence::Optional)
        .and_then(Value::as_object)
    {
        let path = join(path, "transaction");
        checker.required(transaction, &path, "id", Shape::String);
        checker.required(transaction, &path, "total_order", Shape::Number);
        checker.required(transaction, &path, "data_collection_order", Shape::Number);
    }
}

fn check_source(checker: &mut Checker, source: &Map<String, Value>, path: &str) {
    for key in ["connector", "name", "db", "table"] {
        checker.required(source, path, key, Shape::String);
    }
    checker.required(source, path, "ts_ms", Shape::Number);

    checker.optional(source, path, "snapshot", Shape::StringOrBoolean);
    for key in ["version", "schema", "sequence", "gtid", "file", "query"] {
        checker.optional(source, path, key, Shape::String);
    }
    for key in ["server_id", "pos", "row", "thread", "lsn", "txId", "xmin"] {
        checker.optional(source, path, key, Shape::Number);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::conversions::debezium::DebeziumTransaction;

    const VALUE: &str = r#"{"schema":{"type":"struct"},"payload":{"before":null,"after":{"id":1,"name":"a"},"source":{"version":"2.1.0.Final","connector":"mysql","name":"dbserver1","ts_ms":1699564800000,"db":"mydb","table":"users"},"op":"c","ts_ms":1699564800123,"transaction":null}}"#;
    const KEY: &str = r#"{"schema":{"type":"struct"},"payload":{"id":"1"}}"#;

    fn value_with_payload(payload: Value) -> String {
        json!({"schema": {"type": "struct"}, "payload": payload}).to_string()
    }

    fn valid_payload() -> Value {
        let envelope: Value = serde_json::from_str(VALUE).unwrap();
        envelope["payload"].clone()
    }

    #[test]
    fn accepts_create_event() {
        let envelope = validate_value(Some(VALUE)).unwrap();

        assert_eq!(envelope.schema.kind, "struct");
        assert_eq!(envelope.payload.op, Operation::Create);
        assert!(envelope.payload.before.is_none());
        assert_eq!(envelope.payload.after.as_ref().unwrap()["name"], "a");
        assert_eq!(envelope.payload.source.table, "users");
        assert_eq!(envelope.payload.ts_ms.as_u64(), Some(1699564800123));
        assert!(envelope.payload.transaction.is_none());
    }

    #[test]
    fn accepts_key() {
        let envelope = validate_key(Some(KEY)).unwrap();
        assert_eq!(envelope.payload.id, "1");
    }

    #[test]
    fn empty_input() {
        let err = validate_value(None).unwrap_err();
        assert_eq!(err.to_string(), "Empty value");

        let err = validate_value(Some("")).unwrap_err();
        assert_eq!(err.to_string(), "Empty value");

        let err = validate_key(Some("")).unwrap_err();
        assert_eq!(err.to_string(), "Empty key");
    }

    #[test]
    fn invalid_json() {
        let err = validate_value(Some("not json")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidJson(_)));
        assert!(err.to_string().starts_with("invalid JSON: "));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn missing_op() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("op");

        let err = validate_value(Some(&value_with_payload(payload))).unwrap_err();
        assert_eq!(err.issues(), ["payload.op: Required"]);
    }

    #[test]
    fn op_outside_enumeration() {
        let mut payload = valid_payload();
        payload["op"] = json!("x");

        let err = validate_value(Some(&value_with_payload(payload))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "payload.op: Invalid enum value. Expected 'c' | 'u' | 'd' | 'r' | 't', received 'x'"
        );
    }

    #[test]
    fn reports_every_issue() {
        let mut payload = valid_payload();
        payload["before"] = json!([1, 2]);
        payload["ts_ms"] = json!("soon");
        payload["source"].as_object_mut().unwrap().remove("table");
        payload.as_object_mut().unwrap().remove("after");

        let err = validate_value(Some(&value_with_payload(payload))).unwrap_err();
        assert_eq!(
            err.issues(),
            [
                "payload.before: Expected object, received array",
                "payload.after: Required",
                "payload.source.table: Required",
                "payload.ts_ms: Expected number, received string",
            ]
        );
        assert_eq!(err.to_string(), err.issues().join("; "));
    }

    #[test]
    fn envelope_shape() {
        let err = validate_value(Some("[]")).unwrap_err();
        assert_eq!(err.to_string(), "Expected object, received array");

        let err = validate_value(Some(r#"{"payload":{}}"#)).unwrap_err();
        assert_eq!(err.issues()[0], "schema: Required");

        let err = validate_key(Some(r#"{"schema":{"type":"struct"},"payload":{"id":1}}"#))
            .unwrap_err();
        assert_eq!(err.issues(), ["payload.id: Expected string, received number"]);
    }

    #[test]
    fn numbers_are_not_range_checked() {
        let mut payload = valid_payload();
        payload["ts_ms"] = json!(-1.5);
        payload["source"]["ts_ms"] = json!(0);
        payload["transaction"] = json!({"id": "tx-1", "total_order": -3, "data_collection_order": 1e300});

        let envelope = validate_value(Some(&value_with_payload(payload))).unwrap();
        assert_eq!(envelope.payload.ts_ms.as_f64(), Some(-1.5));
        let transaction = envelope.payload.transaction.unwrap();
        assert_eq!(transaction.id, "tx-1");
        assert_eq!(transaction.total_order.as_i64(), Some(-3));
    }

    #[test]
    fn transaction_shape() {
        let mut payload = valid_payload();
        payload["transaction"] = json!({"id": "tx-1", "total_order": 1});

        let err = validate_value(Some(&value_with_payload(payload))).unwrap_err();
        assert_eq!(err.issues(), ["payload.transaction.data_collection_order: Required"]);

        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("transaction");
        assert!(validate_value(Some(&value_with_payload(payload))).is_ok());
    }

    #[test]
    fn typed_payload_round_trips() {
        let mut envelope = validate_value(Some(VALUE)).unwrap();
        envelope.payload.op = Operation::Update;
        envelope.payload.before = envelope.payload.after.clone();
        envelope.payload.transaction = Some(DebeziumTransaction {
            id: "571:53195829".into(),
            total_order: 1.into(),
            data_collection_order: 1.into(),
        });

        let raw = serde_json::to_string(&envelope).unwrap();
        assert_eq!(validate_value(Some(&raw)).unwrap(), envelope);
    }
}
