//! Tagged enrichment values
//!
//! Rules read and write heterogeneous values into a job request's enrichment
//! bag. `Value` closes that set to the shapes the downstream script consumer
//! understands: booleans, integers, floats, strings, lists and nested maps.
//! The untagged serde representation keeps the egress JSON identical to plain
//! JSON values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single enrichment value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean toggle, e.g. `sum_runs`
    Bool(bool),
    /// Integer, e.g. a run number
    Int(i64),
    /// Float, e.g. a chopper phase
    Float(f64),
    /// String, e.g. a user file reference
    Str(String),
    /// Ordered list, e.g. the accumulated `input_runs`
    List(Vec<Value>),
    /// Nested mapping, e.g. a reflection -> calibration-run table
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric read; integers widen to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Vec<u32>> for Value {
    fn from(v: Vec<u32>) -> Self {
        Value::List(v.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::from).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip_is_untagged() {
        let mut map = BTreeMap::new();
        map.insert("002".to_string(), Value::from("00148587"));
        let value = Value::Map(map);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"002":"00148587"}"#);

        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_integers_deserialize_as_int_not_float() {
        let v: Value = serde_json::from_str("25581").unwrap();
        assert_eq!(v, Value::Int(25581));
        let v: Value = serde_json::from_str("50.5").unwrap();
        assert_eq!(v, Value::Float(50.5));
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(Value::Int(50).as_f64(), Some(50.0));
        assert_eq!(Value::Float(0.5).as_i64(), None);
    }
}
