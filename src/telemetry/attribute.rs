//! Span and resource attribute values
//!
//! Attribute keys follow dotted namespacing (`user.id`, `order.id`,
//! `notification.recipient`). Values are restricted to the scalar types the
//! OTLP wire format carries directly.

use std::borrow::Cow;
use std::fmt;

/// A scalar attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 string
    String(Cow<'static, str>),
    /// Boolean flag
    Bool(bool),
    /// Signed 64-bit integer
    I64(i64),
    /// 64-bit float
    F64(f64),
}

impl Value {
    /// Borrow the value as a string slice if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I64(i) => write!(f, "{}", i),
            Value::F64(v) => write!(f, "{}", v),
        }
    }
}

impl From<&'static str> for Value {
    fn from(s: &'static str) -> Self {
        Value::String(Cow::Borrowed(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Cow::Owned(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::I64(i)
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Value::I64(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

/// A key/value attribute pair
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: Cow<'static, str>,
    pub value: Value,
}

impl KeyValue {
    /// Create a new attribute
    ///
    /// ```
    /// use traced_services::telemetry::KeyValue;
    ///
    /// let kv = KeyValue::new("user.id", "u1");
    /// assert_eq!(kv.value.as_str(), Some("u1"));
    /// ```
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: Into<Value>,
    {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Find the value for `key` in an attribute list
///
/// Later entries win, matching how a collector treats repeated keys.
pub fn find<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a Value> {
    attributes
        .iter()
        .rev()
        .find(|kv| kv.key == key)
        .map(|kv| &kv.value)
}
