//! Typed values and their declared types.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::decimal::Decimal;
use super::schema::Schema;

/// Wire type tags, one per [`ValueType`] variant.
pub mod tags {
    /// Signed 64-bit integer.
    pub const INTEGER: u8 = 1;
    /// Raw byte string.
    pub const BYTES: u8 = 2;
    /// UTF-8 text.
    pub const TEXT: u8 = 3;
    /// Boolean.
    pub const BOOLEAN: u8 = 4;
    /// IEEE-754 double.
    pub const FLOAT: u8 = 5;
    /// Arbitrary-precision decimal.
    pub const DECIMAL: u8 = 6;
    /// UTC timestamp.
    pub const TIMESTAMP: u8 = 7;
    /// Homogeneous list.
    pub const LIST: u8 = 8;
    /// Record with a declared field set.
    pub const RECORD: u8 = 9;

    /// Check whether a byte is a known type tag.
    #[inline]
    pub fn is_known(tag: u8) -> bool {
        (INTEGER..=RECORD).contains(&tag)
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    /// Signed 64-bit integer.
    Integer,
    /// Raw byte string.
    Bytes,
    /// Unicode text.
    Text,
    /// Boolean.
    Boolean,
    /// IEEE-754 double.
    Float,
    /// Arbitrary-precision decimal.
    Decimal,
    /// UTC timestamp with nanosecond precision.
    Timestamp,
    /// List whose elements all have the given type.
    List(Box<ValueType>),
    /// Record whose fields match the given schema exactly.
    Record(Schema),
}

impl ValueType {
    /// Shorthand for `ValueType::List(Box::new(element))`.
    pub fn list(element: ValueType) -> Self {
        ValueType::List(Box::new(element))
    }

    /// Wire tag of this type.
    pub fn tag(&self) -> u8 {
        match self {
            ValueType::Integer => tags::INTEGER,
            ValueType::Bytes => tags::BYTES,
            ValueType::Text => tags::TEXT,
            ValueType::Boolean => tags::BOOLEAN,
            ValueType::Float => tags::FLOAT,
            ValueType::Decimal => tags::DECIMAL,
            ValueType::Timestamp => tags::TIMESTAMP,
            ValueType::List(_) => tags::LIST,
            ValueType::Record(_) => tags::RECORD,
        }
    }

    /// Short name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Integer => "integer",
            ValueType::Bytes => "bytes",
            ValueType::Text => "text",
            ValueType::Boolean => "boolean",
            ValueType::Float => "float",
            ValueType::Decimal => "decimal",
            ValueType::Timestamp => "timestamp",
            ValueType::List(_) => "list",
            ValueType::Record(_) => "record",
        }
    }
}

/// A typed value.
///
/// Floats compare by bit pattern so that NaN payloads and signed zeros
/// survive an equality check after a round trip.
#[derive(Debug, Clone)]
pub enum Value {
    /// Signed integer.
    Integer(i64),
    /// Raw bytes.
    Bytes(Bytes),
    /// Unicode text.
    Text(String),
    /// Boolean.
    Boolean(bool),
    /// IEEE-754 double.
    Float(f64),
    /// Exact decimal.
    Decimal(Decimal),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Homogeneous list.
    List(Vec<Value>),
    /// Named fields.
    Record(Fields),
}

impl Value {
    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Boolean(_) => "boolean",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    /// Integer payload, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Fields> for Value {
    fn from(v: Fields) -> Self {
        Value::Record(v)
    }
}

/// Ordered list of named values.
///
/// Used for call arguments, response fields and record contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
    /// Create an empty field set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a field (builder style).
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    /// Append a field.
    pub fn push(&mut self, name: &str, value: impl Into<Value>) {
        self.0.push((name.to_string(), value.into()));
    }

    /// First value with the given name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
