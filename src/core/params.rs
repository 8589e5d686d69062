//! Subscription parameters
//!
//! A parameter object maps string keys to scalar values. Two parameter
//! objects that differ only in construction order must collapse to the same
//! subscription key, so the map is ordered (BTreeMap) and `canonical()`
//! serializes keys lexicographically with deterministic scalar encoding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Scalar parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// Ordered map of subscription parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, replacing any previous value for the key
    pub fn set(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Get a parameter value
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical serialization used for key equality
    ///
    /// Keys are emitted in lexicographic order; strings are quoted and
    /// escaped so structurally different maps never collide.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(key);
            out.push('=');
            match value {
                ParamValue::Bool(b) => {
                    let _ = write!(out, "{b}");
                }
                ParamValue::Int(n) => {
                    let _ = write!(out, "{n}");
                }
                ParamValue::Float(f) => {
                    let _ = write!(out, "{f:?}");
                }
                ParamValue::Str(s) => {
                    let _ = write!(out, "{s:?}");
                }
            }
        }
        out
    }
}

impl FromIterator<(String, ParamValue)> for Params {
    fn from_iter<T: IntoIterator<Item = (String, ParamValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_insertion_order_irrelevant() {
        let a = Params::new().set("tf", "1m").set("depth", 10i64);
        let b = Params::new().set("depth", 10i64).set("tf", "1m");
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_distinguishes_types() {
        let int = Params::new().set("v", 1i64);
        let float = Params::new().set("v", 1.0f64);
        let string = Params::new().set("v", "1");
        assert_ne!(int.canonical(), float.canonical());
        assert_ne!(int.canonical(), string.canonical());
        assert_ne!(float.canonical(), string.canonical());
    }

    #[test]
    fn test_canonical_escapes_strings() {
        // "a=1,b=2" as one string value must not collide with two entries
        let one = Params::new().set("a", "1,b=2");
        let two = Params::new().set("a", "1").set("b", "2");
        assert_ne!(one.canonical(), two.canonical());
    }

    #[test]
    fn test_empty_params() {
        assert_eq!(Params::new().canonical(), "");
        assert!(Params::new().is_empty());
    }

    #[test]
    fn test_wire_serialization() {
        let params = Params::new().set("tf", "1m").set("limit", 50i64);
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"limit":50,"tf":"1m"}"#);
        let back: Params = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    proptest! {
        #[test]
        fn prop_canonical_deterministic(
            entries in proptest::collection::vec(("[a-z]{1,6}", -1000i64..1000), 0..6)
        ) {
            let a: Params = entries
                .iter()
                .map(|(k, v)| (k.clone(), ParamValue::Int(*v)))
                .collect();
            let b: Params = entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), ParamValue::Int(*v)))
                .collect();
            // later duplicates win in both, but identical key sets must agree
            if a.len() == b.len() && a == b {
                prop_assert_eq!(a.canonical(), b.canonical());
            }
        }
    }
}
