//! One line of a JSONL log file

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A self-contained log record; one per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// RFC 3339 with millisecond precision, UTC
    pub ts: String,
    pub level: String,
    /// Session instance name (`master`, `slave` or `session`)
    pub instance: String,
    pub target: String,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
    /// Enclosing spans, root first, joined with " > "
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl LogRecord {
    pub fn new(
        level: impl Into<String>,
        instance: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            instance: instance.into(),
            target: target.into(),
            msg: msg.into(),
            fields: None,
            span: None,
        }
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    /// Field value by name, if the record carries it
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.as_ref().and_then(|fields| fields.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_omits_empty_optionals() {
        let record = LogRecord::new("info", "master", "scenesync_core::sync", "Master server started");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"instance\":\"master\""));
        assert!(!json.contains("fields"));
        assert!(!json.contains("span"));
    }

    #[test]
    fn test_field_lookup() {
        let record = LogRecord::new("warn", "slave", "scenesync_core::sync", "Lifecycle command failed")
            .with_fields(serde_json::json!({ "op": "connect to master" }));
        assert_eq!(record.field("op").and_then(Value::as_str), Some("connect to master"));
        assert!(record.field("port").is_none());
    }
}
