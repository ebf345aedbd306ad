use std::collections::BTreeMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Attributes of a dataset, group or variable.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// An attribute value.
///
/// Integers are preferred over floats when deserialising, so `3` is an [`AttributeValue::Int`] and `3.0` is an [`AttributeValue::Float`].
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, From)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string.
    Text(String),
    /// An integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// An array of integers.
    Ints(Vec<i64>),
    /// An array of floating point numbers.
    Floats(Vec<f64>),
    /// An array of strings.
    Texts(Vec<String>),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(value: Vec<&str>) -> Self {
        Self::Texts(value.into_iter().map(str::to_string).collect())
    }
}

impl AttributeValue {
    /// Return the value as a string slice if it is [`AttributeValue::Text`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        if let Self::Text(text) = self {
            Some(text)
        } else {
            None
        }
    }

    /// Return the value as an integer if it is [`AttributeValue::Int`].
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        if let Self::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    /// Return the value as a float if it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Return the value as a slice of integers.
    ///
    /// An empty array of any type is an empty slice.
    #[must_use]
    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Self::Ints(values) => Some(values),
            Self::Floats(values) if values.is_empty() => Some(&[]),
            Self::Texts(values) if values.is_empty() => Some(&[]),
            _ => None,
        }
    }

    /// Return the value as a slice of strings.
    ///
    /// An empty array of any type is an empty slice.
    #[must_use]
    pub fn as_texts(&self) -> Option<&[String]> {
        match self {
            Self::Texts(values) => Some(values),
            Self::Ints(values) if values.is_empty() => Some(&[]),
            Self::Floats(values) if values.is_empty() => Some(&[]),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Ints(values) => write!(f, "{values:?}"),
            Self::Floats(values) => write!(f, "{values:?}"),
            Self::Texts(values) => write!(f, "{values:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_value_untagged() {
        let value: AttributeValue = serde_json::from_str("3").unwrap();
        assert_eq!(value, AttributeValue::Int(3));
        let value: AttributeValue = serde_json::from_str("3.5").unwrap();
        assert_eq!(value, AttributeValue::Float(3.5));
        let value: AttributeValue = serde_json::from_str(r#""degrees""#).unwrap();
        assert_eq!(value.as_str(), Some("degrees"));
        let value: AttributeValue = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(value.as_ints(), Some([1, 2].as_slice()));
        let value: AttributeValue = serde_json::from_str("[1.5, 2]").unwrap();
        assert_eq!(value, AttributeValue::Floats(vec![1.5, 2.0]));
        let value: AttributeValue = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(value, AttributeValue::from(vec!["a", "b"]));
    }

    #[test]
    fn attribute_value_empty_arrays() {
        let value: AttributeValue = serde_json::from_str("[]").unwrap();
        assert_eq!(value.as_ints(), Some([].as_slice()));
        assert_eq!(value.as_texts().map(<[String]>::len), Some(0));
        assert!(AttributeValue::Int(1).as_texts().is_none());
        assert_eq!(AttributeValue::Int(2).as_f64(), Some(2.0));
    }
}
