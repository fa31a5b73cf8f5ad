//! Deterministic CBOR for the mdoc data model.
//!
//! The mdoc digest and signature rules are defined over exact byte strings,
//! so this codec gives full control over the wire form: shortest-form
//! integers and lengths, definite-length items only, and map entries kept in
//! insertion order. Embedded CBOR (tag 24) is carried as verbatim bytes via
//! [`DataItem`] and is never re-serialised.

mod data_item;
mod decode;
mod encode;
mod tag;

pub use data_item::DataItem;
pub use decode::{decode, decode_prefix};
pub use encode::encode;
pub use tag::{Codec, TagCodec, TAG_EMBEDDED_CBOR, TAG_ENCODED_DATETIME, TAG_FULL_DATE};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CborError {
    #[error("input ended before the end of the item")]
    TruncatedInput,
    #[error("malformed major type / additional information byte {0:#04x}")]
    InvalidMajorType(u8),
    #[error("indefinite-length items are not supported")]
    UnsupportedIndefiniteForm,
    #[error("integer argument does not fit the target type")]
    IntegerOverflow,
    #[error("text string is not valid UTF-8")]
    InvalidUtf8,
    #[error("{0} bytes left over after the top-level item")]
    TrailingBytes(usize),
    #[error("two-byte encoding used for simple value {0} < 32")]
    InvalidSimple(u8),
    #[error("nesting depth exceeds the supported maximum")]
    NestingTooDeep,
    #[error("invalid content for tag {tag}: {reason}")]
    InvalidTagContent { tag: u64, reason: &'static str },
}

/// A decoded CBOR item.
///
/// Maps preserve key order and may be keyed by any value; negative integers
/// store the encoded magnitude `n`, representing `-1 - n`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unsigned(u64),
    Negative(u64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Tag(u64, Box<Value>),
    Simple(u8),
    Float(f64),
    Bool(bool),
    Null,
    Undefined,
}

impl Value {
    pub fn integer(&self) -> Option<i128> {
        match self {
            Value::Unsigned(n) => Some(*n as i128),
            Value::Negative(n) => Some(-1 - *n as i128),
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            Value::Unsigned(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<Vec<(Value, Value)>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// First value under the given key, comparing by structural equality.
    pub fn map_get(&self, key: &Value) -> Option<&Value> {
        self.as_map()
            .and_then(|entries| entries.iter().find(|(k, _)| k == key).map(|(_, v)| v))
    }

    /// Lookup under an integer label, as used by COSE headers and COSE_Key.
    pub fn map_get_int(&self, label: i64) -> Option<&Value> {
        self.map_get(&Value::from(label))
    }

    /// Lookup under a text key, as used by the mdoc structures.
    pub fn map_get_text(&self, key: &str) -> Option<&Value> {
        self.as_map()
            .and_then(|entries| entries.iter().find(|(k, _)| k.as_text() == Some(key)))
            .map(|(_, v)| v)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Unsigned(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        if n >= 0 {
            Value::Unsigned(n as u64)
        } else {
            Value::Negative((-1 - n) as u64)
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Explicit schema walk between a model type and its CBOR form.
///
/// Model extraction never goes through reflection or serde: every type spells
/// out how it reads and writes its `Value` shape.
pub trait CborSchema: Sized {
    fn from_cbor(value: Value) -> Result<Self, crate::Error>;
    fn to_cbor(&self) -> Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_helpers() {
        assert_eq!(Value::from(0i64), Value::Unsigned(0));
        assert_eq!(Value::from(-1i64), Value::Negative(0));
        assert_eq!(Value::from(-24i64), Value::Negative(23));
        assert_eq!(Value::Negative(23).integer(), Some(-24));
        assert_eq!(Value::Unsigned(7).integer(), Some(7));
    }

    #[test]
    fn map_lookup_is_first_match_in_order() {
        let map = Value::Map(vec![
            (Value::from(1i64), Value::from("a")),
            (Value::from("x"), Value::from("b")),
            (Value::from(1i64), Value::from("shadowed")),
        ]);
        assert_eq!(map.map_get_int(1).and_then(Value::as_text), Some("a"));
        assert_eq!(map.map_get_text("x").and_then(Value::as_text), Some("b"));
        assert!(map.map_get_int(2).is_none());
    }
}
