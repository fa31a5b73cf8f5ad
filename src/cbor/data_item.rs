use std::sync::OnceLock;

use super::{decode, encode, CborError, CborSchema, Value, TAG_EMBEDDED_CBOR};

/// A value whose canonical encoding *is* its bytes.
///
/// On the wire this is tag 24 wrapping the byte string of the deterministic
/// encoding of `T`. The bytes are held verbatim: decoding re-parses them
/// lazily, encoding always emits the cached bytes. Digests computed over a
/// `DataItem` therefore survive any number of decode/encode round trips.
pub struct DataItem<T> {
    bytes: Vec<u8>,
    cached: OnceLock<T>,
}

impl<T: CborSchema> DataItem<T> {
    /// Wrap a value, fixing its encoding now.
    pub fn new(value: T) -> Self {
        let bytes = encode(&value.to_cbor());
        let cached = OnceLock::new();
        let _ = cached.set(value);
        Self { bytes, cached }
    }

    /// Wrap already-encoded bytes; parsing happens on first access.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            cached: OnceLock::new(),
        }
    }

    /// Extract from a decoded `Tag(24, Bytes(..))` value.
    pub fn from_tagged_value(value: Value) -> Result<Self, CborError> {
        match value {
            Value::Tag(TAG_EMBEDDED_CBOR, content) => match *content {
                Value::Bytes(bytes) => Ok(Self::from_bytes(bytes)),
                _ => Err(CborError::InvalidTagContent {
                    tag: TAG_EMBEDDED_CBOR,
                    reason: "embedded CBOR must wrap a byte string",
                }),
            },
            _ => Err(CborError::InvalidTagContent {
                tag: TAG_EMBEDDED_CBOR,
                reason: "expected an embedded CBOR tag",
            }),
        }
    }

    /// The wrapped encoding of `T`, without the tag.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The full on-wire form: `Tag(24, Bytes(..))`.
    pub fn to_tagged_value(&self) -> Value {
        Value::Tag(
            TAG_EMBEDDED_CBOR,
            Box::new(Value::Bytes(self.bytes.clone())),
        )
    }

    /// The encoding of the tagged form, the input to mdoc digests.
    pub fn tagged_bytes(&self) -> Vec<u8> {
        encode(&self.to_tagged_value())
    }

    /// Parse (or fetch the cached parse of) the wrapped value.
    pub fn parsed(&self) -> Result<&T, crate::Error> {
        if let Some(value) = self.cached.get() {
            return Ok(value);
        }
        let value = T::from_cbor(decode(&self.bytes)?)?;
        Ok(self.cached.get_or_init(|| value))
    }

    pub fn into_parsed(self) -> Result<T, crate::Error> {
        self.parsed()?;
        Ok(self.cached.into_inner().expect("just parsed"))
    }
}

impl<T: CborSchema> CborSchema for DataItem<T> {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        Ok(Self::from_tagged_value(value)?)
    }

    fn to_cbor(&self) -> Value {
        self.to_tagged_value()
    }
}

impl<T: Clone> Clone for DataItem<T> {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            cached: self.cached.clone(),
        }
    }
}

impl<T> std::fmt::Debug for DataItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataItem")
            .field("bytes", &hex::encode(&self.bytes))
            .finish()
    }
}

impl<T> PartialEq for DataItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<T> Eq for DataItem<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Pair(u64, String);

    impl CborSchema for Pair {
        fn from_cbor(value: Value) -> Result<Self, crate::Error> {
            let mut items = value.into_array().ok_or(CborError::InvalidMajorType(0))?;
            let text = items
                .pop()
                .and_then(Value::into_text)
                .ok_or(CborError::TruncatedInput)?;
            let n = items
                .pop()
                .and_then(|v| v.as_unsigned())
                .ok_or(CborError::TruncatedInput)?;
            Ok(Pair(n, text))
        }

        fn to_cbor(&self) -> Value {
            Value::Array(vec![Value::Unsigned(self.0), Value::from(self.1.as_str())])
        }
    }

    #[test]
    fn bytes_survive_roundtrip_verbatim() {
        let item = DataItem::new(Pair(7, "seven".into()));
        let wire = encode(&item.to_tagged_value());

        let reparsed = DataItem::<Pair>::from_tagged_value(decode(&wire).unwrap()).unwrap();
        assert_eq!(reparsed.bytes(), item.bytes());
        assert_eq!(encode(&reparsed.to_tagged_value()), wire);
        assert_eq!(*reparsed.parsed().unwrap(), Pair(7, "seven".into()));
    }

    #[test]
    fn parse_is_lazy_and_fallible() {
        // Truncated inner payload only fails when first accessed.
        let item = DataItem::<Pair>::from_bytes(vec![0x82, 0x01]);
        assert!(item.parsed().is_err());
    }
}
