use serde::{
    Deserialize,
    Serialize,
};

use crate::core::hash::HashMap;

/// An integer payload value.
pub type Integer = i64;

/// A floating-point payload value.
pub type Float = f64;

/// A dictionary of key-value pairs.
pub type Dictionary = HashMap<String, Value>;

/// A sequence of values.
pub type List = Vec<Value>;

/// A payload value carried in requests and responses.
///
/// Values map one-to-one onto the negotiated serialization: JSON types for
/// the `json` serializer, the equivalent MessagePack types for `pickle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(Integer),
    Float(Float),
    String(String),
    List(List),
    Dictionary(Dictionary),
}

impl Value {
    /// The value as an [`Integer`].
    pub fn integer(&self) -> Option<Integer> {
        match self {
            Self::Integer(val) => Some(*val),
            _ => None,
        }
    }

    /// The value as a [`Float`].
    pub fn float(&self) -> Option<Float> {
        match self {
            Self::Float(val) => Some(*val),
            Self::Integer(val) => Some(*val as Float),
            _ => None,
        }
    }

    /// The value as a [`str`].
    pub fn string(&self) -> Option<&str> {
        match self {
            Self::String(val) => Some(val),
            _ => None,
        }
    }

    /// The value as a [`bool`].
    pub fn bool(&self) -> Option<bool> {
        match self {
            Self::Bool(val) => Some(*val),
            _ => None,
        }
    }

    /// The value as a [`List`].
    pub fn list(&self) -> Option<&List> {
        match self {
            Self::List(val) => Some(val),
            _ => None,
        }
    }

    /// The value as a [`Dictionary`].
    pub fn dictionary(&self) -> Option<&Dictionary> {
        match self {
            Self::Dictionary(val) => Some(val),
            _ => None,
        }
    }

    /// Whether the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl From<Integer> for Value {
    fn from(value: Integer) -> Self {
        Self::Integer(value)
    }
}

impl From<Float> for Value {
    fn from(value: Float) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<List> for Value {
    fn from(value: List) -> Self {
        Self::List(value)
    }
}

impl From<Dictionary> for Value {
    fn from(value: Dictionary) -> Self {
        Self::Dictionary(value)
    }
}

#[cfg(test)]
mod types_test {
    use crate::core::types::{
        Dictionary,
        List,
        Value,
    };

    #[test]
    fn deserializes_json_scalars() {
        assert_eq!(serde_json::from_str::<Value>("null").unwrap(), Value::Null);
        assert_eq!(
            serde_json::from_str::<Value>("true").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            serde_json::from_str::<Value>("12").unwrap(),
            Value::Integer(12)
        );
        assert_eq!(
            serde_json::from_str::<Value>("0.5").unwrap(),
            Value::Float(0.5)
        );
        assert_eq!(
            serde_json::from_str::<Value>("\"abc\"").unwrap(),
            Value::String("abc".to_owned())
        );
    }

    #[test]
    fn deserializes_json_containers() {
        assert_eq!(
            serde_json::from_str::<Value>(r#"[1, "a", false]"#).unwrap(),
            Value::List(List::from_iter([
                Value::Integer(1),
                Value::String("a".to_owned()),
                Value::Bool(false),
            ]))
        );
        assert_eq!(
            serde_json::from_str::<Value>(r#"{"a": 1}"#).unwrap(),
            Value::Dictionary(Dictionary::from_iter([(
                "a".to_owned(),
                Value::Integer(1)
            )]))
        );
    }

    #[test]
    fn round_trips_through_message_pack() {
        let value = Value::List(List::from_iter([
            Value::Integer(1),
            Value::Float(2.0),
            Value::Bool(false),
            Value::List(List::from_iter([
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3),
            ])),
        ]));
        let bytes = rmp_serde::to_vec(&value).unwrap();
        assert_eq!(rmp_serde::from_slice::<Value>(&bytes).unwrap(), value);
    }

    #[test]
    fn whole_numbers_prefer_integer() {
        assert_eq!(
            serde_json::from_str::<Value>("3").unwrap(),
            Value::Integer(3)
        );
        assert_eq!(serde_json::from_str::<Value>("3").unwrap().float(), Some(3.0));
    }
}
