//! Custom metadata values.
//!
//! Sidecars carry an open bag of key/value metadata. Each value is one of a
//! closed set of kinds, and the catalog stores it as `(text, kind)` so the
//! original type can be rebuilt when results are read back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Custom metadata attached to an asset, keyed by field name.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A single custom metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(Number),
    Text(String),
    List(Vec<Value>),
    Object(Map<String, Value>),
}

/// Storage tag recorded next to an encoded value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
    Number,
    Boolean,
    List,
    Object,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::List => "list",
            ValueKind::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ValueKind::Text),
            "number" => Ok(ValueKind::Number),
            "boolean" => Ok(ValueKind::Boolean),
            "list" => Ok(ValueKind::List),
            "object" => Ok(ValueKind::Object),
            other => Err(format!("Unknown value kind: {}", other)),
        }
    }
}

impl MetadataValue {
    /// The storage tag for this value
    pub fn kind(&self) -> ValueKind {
        match self {
            MetadataValue::Bool(_) => ValueKind::Boolean,
            MetadataValue::Number(_) => ValueKind::Number,
            MetadataValue::Text(_) => ValueKind::Text,
            MetadataValue::List(_) => ValueKind::List,
            MetadataValue::Object(_) => ValueKind::Object,
        }
    }

    /// Encode to the catalog's portable text form.
    ///
    /// Booleans become `"1"`/`"0"`, lists and objects become JSON text.
    pub fn encode(&self) -> (String, ValueKind) {
        let text = match self {
            MetadataValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            MetadataValue::Number(n) => n.to_string(),
            MetadataValue::Text(s) => s.clone(),
            MetadataValue::List(items) => Value::Array(items.clone()).to_string(),
            MetadataValue::Object(map) => Value::Object(map.clone()).to_string(),
        };
        (text, self.kind())
    }

    /// Rebuild a value from its encoded text and kind tag
    pub fn decode(text: &str, kind: ValueKind) -> Result<Self, String> {
        match kind {
            ValueKind::Text => Ok(MetadataValue::Text(text.to_string())),
            ValueKind::Number => serde_json::from_str::<Number>(text)
                .map(MetadataValue::Number)
                .map_err(|e| format!("Invalid number '{}': {}", text, e)),
            ValueKind::Boolean => match text {
                "1" => Ok(MetadataValue::Bool(true)),
                "0" => Ok(MetadataValue::Bool(false)),
                other => Err(format!("Invalid boolean '{}'", other)),
            },
            ValueKind::List => serde_json::from_str::<Vec<Value>>(text)
                .map(MetadataValue::List)
                .map_err(|e| format!("Invalid list: {}", e)),
            ValueKind::Object => serde_json::from_str::<Map<String, Value>>(text)
                .map(MetadataValue::Object)
                .map_err(|e| format!("Invalid object: {}", e)),
        }
    }

    /// Plain words for the full-text index
    pub fn search_text(&self) -> String {
        match self {
            MetadataValue::Bool(b) => b.to_string(),
            MetadataValue::Number(n) => n.to_string(),
            MetadataValue::Text(s) => s.clone(),
            MetadataValue::List(items) => items.iter().map(plain_text).collect::<Vec<_>>().join(" "),
            MetadataValue::Object(map) => map.values().map(plain_text).collect::<Vec<_>>().join(" "),
        }
    }

    /// Human-readable rendering (strings unquoted, structures as JSON)
    pub fn display(&self) -> String {
        match self {
            MetadataValue::Text(s) => s.clone(),
            MetadataValue::Bool(b) => b.to_string(),
            MetadataValue::Number(n) => n.to_string(),
            MetadataValue::List(items) => Value::Array(items.clone()).to_string(),
            MetadataValue::Object(map) => Value::Object(map.clone()).to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            MetadataValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Parse a command-line value: JSON when it parses, plain text otherwise
    pub fn parse_loose(raw: &str) -> Self {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| MetadataValue::try_from(v).ok())
            .unwrap_or_else(|| MetadataValue::Text(raw.to_string()))
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(plain_text).collect::<Vec<_>>().join(" "),
        Value::Object(map) => map.values().map(plain_text).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

impl TryFrom<Value> for MetadataValue {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(MetadataValue::Bool(b)),
            Value::Number(n) => Ok(MetadataValue::Number(n)),
            Value::String(s) => Ok(MetadataValue::Text(s)),
            Value::Array(items) => Ok(MetadataValue::List(items)),
            Value::Object(map) => Ok(MetadataValue::Object(map)),
            Value::Null => Err("null is not a metadata value".to_string()),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Number(n.into())
    }
}

impl From<Vec<&str>> for MetadataValue {
    fn from(items: Vec<&str>) -> Self {
        MetadataValue::List(items.into_iter().map(|s| Value::String(s.to_string())).collect())
    }
}
