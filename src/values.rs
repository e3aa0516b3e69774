use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed union of the value shapes an artifact or evidence item may carry.
///
/// The serde representation is untagged, so values round-trip through JSON as
/// their natural projections (a `Map` becomes a JSON object, and so on).
/// Mapping entries keep insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<ArtifactValue>),
    Map(IndexMap<String, ArtifactValue>),
}

impl ArtifactValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArtifactValue::String(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ArtifactValue::Bool(flag) => Value::Bool(*flag),
            ArtifactValue::Number(number) => Value::Number(number.clone()),
            ArtifactValue::String(text) => Value::String(text.clone()),
            ArtifactValue::List(items) => {
                Value::Array(items.iter().map(ArtifactValue::to_json).collect())
            }
            ArtifactValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// Convert a JSON value into an artifact value. JSON null has no
    /// counterpart in the union; a null returns `None` and null entries
    /// inside containers are dropped.
    pub fn from_json(value: &Value) -> Option<ArtifactValue> {
        match value {
            Value::Null => None,
            Value::Bool(flag) => Some(ArtifactValue::Bool(*flag)),
            Value::Number(number) => Some(ArtifactValue::Number(number.clone())),
            Value::String(text) => Some(ArtifactValue::String(text.clone())),
            Value::Array(items) => Some(ArtifactValue::List(
                items.iter().filter_map(ArtifactValue::from_json).collect(),
            )),
            Value::Object(entries) => Some(ArtifactValue::Map(
                entries
                    .iter()
                    .filter_map(|(key, value)| {
                        ArtifactValue::from_json(value).map(|value| (key.clone(), value))
                    })
                    .collect(),
            )),
        }
    }
}

impl From<&str> for ArtifactValue {
    fn from(text: &str) -> Self {
        ArtifactValue::String(text.to_string())
    }
}

impl From<String> for ArtifactValue {
    fn from(text: String) -> Self {
        ArtifactValue::String(text)
    }
}

impl From<bool> for ArtifactValue {
    fn from(flag: bool) -> Self {
        ArtifactValue::Bool(flag)
    }
}

impl From<i64> for ArtifactValue {
    fn from(number: i64) -> Self {
        ArtifactValue::Number(number.into())
    }
}

impl From<u64> for ArtifactValue {
    fn from(number: u64) -> Self {
        ArtifactValue::Number(number.into())
    }
}

impl From<Vec<ArtifactValue>> for ArtifactValue {
    fn from(items: Vec<ArtifactValue>) -> Self {
        ArtifactValue::List(items)
    }
}

impl From<IndexMap<String, ArtifactValue>> for ArtifactValue {
    fn from(entries: IndexMap<String, ArtifactValue>) -> Self {
        ArtifactValue::Map(entries)
    }
}
