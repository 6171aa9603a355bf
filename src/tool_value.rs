//! Tool call arguments and results as they arrive from the toolset.
//!
//! Payloads are often JSON serialized into a string. Anything shaped like a
//! JSON object or array is decoded; everything else, including malformed
//! JSON, stays a raw string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolValue {
    Text(String),
    Structured(Value),
}

impl ToolValue {
    pub fn parse(input: &str) -> Self {
        let looks_structured = (input.starts_with('{') && input.ends_with('}'))
            || (input.starts_with('[') && input.ends_with(']'));
        if looks_structured {
            if let Ok(value) = serde_json::from_str::<Value>(input) {
                return Self::Structured(value);
            }
        }
        Self::Text(input.to_string())
    }

    /// Decode a raw value: strings go through [`Self::parse`], the rest is kept.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => Self::parse(&s),
            other => Self::Structured(other),
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(v) => Some(v),
            Self::Text(_) => None,
        }
    }

    /// Human-readable form: pretty JSON or the raw text.
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Structured(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
        }
    }
}
