//! Replicated records and the validity rule
//!
//! A [`Record`] is the unit written to the append log: the remote key as
//! `id`, followed by every field of the remote value. On disk it is one
//! compact JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entry::RemoteEntry;

/// A replicated record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Remote key, also the sort key
    pub id: String,
    /// Remote fields, flattened next to `id`
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record from an id and its fields
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a record from a remote entry.
    ///
    /// Returns `None` when the remote value is not a JSON object. A remote
    /// `id` field is dropped so the key always wins.
    pub fn from_entry(entry: RemoteEntry) -> Option<Self> {
        match entry.value {
            Value::Object(mut fields) => {
                fields.remove("id");
                Some(Self::new(entry.key, fields))
            }
            _ => None,
        }
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Serialize as a single log line, without the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a single log line
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// True when a value counts as present for the validity rule.
///
/// `null`, `""`, `false`, `0`, `{}` and `[]` are absent.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Names of the fields a record must carry to be persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSchema {
    /// Field holding the record timestamp
    pub timestamp_field: String,
    /// Field holding the measurement payload
    pub payload_field: String,
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            timestamp_field: "fechaHora".to_string(),
            payload_field: "sensores".to_string(),
        }
    }
}

impl RecordSchema {
    /// Create a schema with custom field names
    pub fn new(timestamp_field: impl Into<String>, payload_field: impl Into<String>) -> Self {
        Self {
            timestamp_field: timestamp_field.into(),
            payload_field: payload_field.into(),
        }
    }

    /// A record is eligible for persistence iff it has a non-empty id, a
    /// present timestamp and a present payload.
    pub fn is_valid(&self, record: &Record) -> bool {
        !record.id.is_empty()
            && record.field(&self.timestamp_field).is_some_and(is_present)
            && record.field(&self.payload_field).is_some_and(is_present)
    }

    /// The record timestamp, when it is a string
    pub fn timestamp<'a>(&self, record: &'a Record) -> Option<&'a str> {
        record.field(&self.timestamp_field).and_then(Value::as_str)
    }
}
