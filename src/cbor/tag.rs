use std::collections::BTreeMap;

use super::{decode, encode, CborError, Value};

/// Embedded CBOR data item (RFC 8949 §3.4.5.1): tag content is the byte
/// string of another encoded item.
pub const TAG_EMBEDDED_CBOR: u64 = 24;
/// RFC 3339 date-time text (tdate), used by the MSO validity info.
pub const TAG_ENCODED_DATETIME: u64 = 0;
/// RFC 8943 full-date text, used by mDL date attributes.
pub const TAG_FULL_DATE: u64 = 1004;

/// Validation hook for a registered tag. `decode` sees the decoded tag
/// content and may reject or normalise it; `encode` may reject content that
/// must not be emitted under the tag.
pub trait TagCodec: Send + Sync {
    fn decode(&self, tag: u64, content: Value) -> Result<Value, CborError>;

    fn encode(&self, tag: u64, content: &Value) -> Result<(), CborError> {
        let _ = (tag, content);
        Ok(())
    }
}

/// A codec instance owning an extension-tag registry.
///
/// The built-in tags (24, 0, 1004) are always enforced. Additional tags are
/// registered during initialisation; afterwards the registry is read-only and
/// the codec can be shared freely.
#[derive(Default)]
pub struct Codec {
    tags: BTreeMap<u64, Box<dyn TagCodec>>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tag(&mut self, tag: u64, codec: Box<dyn TagCodec>) {
        self.tags.insert(tag, codec);
    }

    pub fn decode(&self, input: &[u8]) -> Result<Value, CborError> {
        let value = decode(input)?;
        self.apply(value)
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, CborError> {
        self.check_encode(value)?;
        Ok(encode(value))
    }

    fn apply(&self, value: Value) -> Result<Value, CborError> {
        match value {
            Value::Tag(tag, content) => {
                let content = self.apply(*content)?;
                let content = match self.tags.get(&tag) {
                    Some(codec) => codec.decode(tag, content)?,
                    None => content,
                };
                Ok(Value::Tag(tag, Box::new(content)))
            }
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.apply(item))
                .collect::<Result<_, _>>()
                .map(Value::Array),
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((self.apply(k)?, self.apply(v)?)))
                .collect::<Result<_, _>>()
                .map(Value::Map),
            other => Ok(other),
        }
    }

    fn check_encode(&self, value: &Value) -> Result<(), CborError> {
        match value {
            Value::Tag(tag, content) => {
                check_builtin(*tag, content)?;
                if let Some(codec) = self.tags.get(tag) {
                    codec.encode(*tag, content)?;
                }
                self.check_encode(content)
            }
            Value::Array(items) => items.iter().try_for_each(|item| self.check_encode(item)),
            Value::Map(entries) => entries.iter().try_for_each(|(k, v)| {
                self.check_encode(k)?;
                self.check_encode(v)
            }),
            _ => Ok(()),
        }
    }
}

/// Content-shape rules for the tags the mdoc model relies on, enforced on
/// every decode.
pub(super) fn check_builtin(tag: u64, content: &Value) -> Result<(), CborError> {
    match tag {
        TAG_EMBEDDED_CBOR => match content {
            Value::Bytes(_) => Ok(()),
            _ => Err(CborError::InvalidTagContent {
                tag,
                reason: "embedded CBOR must wrap a byte string",
            }),
        },
        TAG_FULL_DATE => match content.as_text() {
            Some(text) if is_full_date(text) => Ok(()),
            _ => Err(CborError::InvalidTagContent {
                tag,
                reason: "full-date must be a YYYY-MM-DD text string",
            }),
        },
        TAG_ENCODED_DATETIME => match content {
            Value::Text(_) => Ok(()),
            _ => Err(CborError::InvalidTagContent {
                tag,
                reason: "date-time must be a text string",
            }),
        },
        _ => Ok(()),
    }
}

fn is_full_date(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && [0, 1, 2, 3, 5, 6, 8, 9]
            .iter()
            .all(|&i| bytes[i].is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperTag;

    impl TagCodec for UpperTag {
        fn decode(&self, _tag: u64, content: Value) -> Result<Value, CborError> {
            match content {
                Value::Text(s) => Ok(Value::Text(s.to_ascii_uppercase())),
                _ => Err(CborError::InvalidTagContent {
                    tag: 4711,
                    reason: "expected text",
                }),
            }
        }
    }

    #[test]
    fn registered_tag_runs_on_decode() {
        let mut codec = Codec::new();
        codec.register_tag(4711, Box::new(UpperTag));
        let bytes = encode(&Value::Tag(4711, Box::new(Value::from("abc"))));
        let value = codec.decode(&bytes).unwrap();
        assert_eq!(value, Value::Tag(4711, Box::new(Value::from("ABC"))));
    }

    #[test]
    fn embedded_cbor_requires_byte_string() {
        let bad = encode(&Value::Tag(
            TAG_EMBEDDED_CBOR,
            Box::new(Value::from("not bytes")),
        ));
        assert!(matches!(
            decode(&bad),
            Err(CborError::InvalidTagContent { tag: 24, .. })
        ));
    }

    #[test]
    fn full_date_shape_is_checked() {
        let good = encode(&Value::Tag(
            TAG_FULL_DATE,
            Box::new(Value::from("2007-03-25")),
        ));
        assert!(decode(&good).is_ok());

        let bad = encode(&Value::Tag(TAG_FULL_DATE, Box::new(Value::from("2007/03/25"))));
        assert!(matches!(
            decode(&bad),
            Err(CborError::InvalidTagContent { tag: 1004, .. })
        ));
    }
}
