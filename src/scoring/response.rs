//! Audit run responses.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An answer given to a single audit question.
///
/// On the wire responses are plain JSON values: the keywords `yes`, `no`,
/// `pass`, `fail` and `n/a`, integers for scale ratings, floats for numeric
/// measurements, and any other string as free text.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseValue {
    Yes,
    No,
    Pass,
    Fail,
    NotApplicable,
    Scale(i64),
    Number(f64),
    Text(String),
}

impl ResponseValue {
    fn from_keyword(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "yes" => ResponseValue::Yes,
            "no" => ResponseValue::No,
            "pass" => ResponseValue::Pass,
            "fail" => ResponseValue::Fail,
            "n/a" | "na" | "not_applicable" => ResponseValue::NotApplicable,
            _ => ResponseValue::Text(value.to_string()),
        }
    }

    pub fn is_not_applicable(&self) -> bool {
        matches!(self, ResponseValue::NotApplicable)
    }
}

impl fmt::Display for ResponseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseValue::Yes => f.write_str("yes"),
            ResponseValue::No => f.write_str("no"),
            ResponseValue::Pass => f.write_str("pass"),
            ResponseValue::Fail => f.write_str("fail"),
            ResponseValue::NotApplicable => f.write_str("n/a"),
            ResponseValue::Scale(v) => write!(f, "{}", v),
            ResponseValue::Number(v) => write!(f, "{}", v),
            ResponseValue::Text(t) => f.write_str(t),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawResponse {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl<'de> Deserialize<'de> for ResponseValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawResponse::deserialize(deserializer)? {
            RawResponse::Integer(v) => ResponseValue::Scale(v),
            RawResponse::Float(v) => ResponseValue::Number(v),
            RawResponse::Bool(true) => ResponseValue::Yes,
            RawResponse::Bool(false) => ResponseValue::No,
            RawResponse::Text(t) => ResponseValue::from_keyword(&t),
        })
    }
}

impl Serialize for ResponseValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ResponseValue::Scale(v) => serializer.serialize_i64(*v),
            ResponseValue::Number(v) => serializer.serialize_f64(*v),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

/// Responses of one audit run keyed by question id.
pub type Responses = BTreeMap<String, ResponseValue>;
