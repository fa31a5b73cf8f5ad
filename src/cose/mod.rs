//! COSE_Sign1 and COSE_Mac0 over the deterministic CBOR codec.
//!
//! Protected headers are carried as their original encoded bytes: the
//! signature input must reproduce them bit-exactly, so re-encoding the
//! parsed map is never an option once a message has been decoded.

pub mod key;
mod mac0;
mod sign1;

pub use key::{CoseKey, Curve, KeyType};
pub use mac0::CoseMac0;
pub use sign1::CoseSign1;

use crate::cbor::{encode, CborError, CborSchema, Value};
use crate::context::CapabilityError;
use crate::jose;

#[derive(thiserror::Error, Debug)]
pub enum CoseError {
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("unexpected shape: {0}")]
    InvalidStructure(&'static str),
    #[error("algorithm header missing")]
    MissingAlg,
    #[error("algorithm header must sit in the protected headers")]
    AlgNotProtected,
    #[error("unsupported algorithm label {0}")]
    UnsupportedAlg(i128),
    #[error("no payload present and no detached payload supplied")]
    MissingPayload,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("MAC verification failed")]
    MacInvalid,
    #[error("unsupported key: {0}")]
    Key(#[from] jose::KeyError),
    #[error(transparent)]
    Cbor(#[from] CborError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// COSE algorithms supported for mdoc issuer and device authentication
/// (RFC 9053 labels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Es256,
    Es384,
    Es512,
    EdDsa,
    /// HMAC 256/256, label 5.
    Hmac256,
    Hmac384,
    Hmac512,
}

impl Algorithm {
    pub fn label(&self) -> i64 {
        match self {
            Algorithm::Es256 => -7,
            Algorithm::Es384 => -35,
            Algorithm::Es512 => -36,
            Algorithm::EdDsa => -8,
            Algorithm::Hmac256 => 5,
            Algorithm::Hmac384 => 6,
            Algorithm::Hmac512 => 7,
        }
    }

    pub fn from_label(label: i128) -> Result<Self, CoseError> {
        match label {
            -7 => Ok(Algorithm::Es256),
            -35 => Ok(Algorithm::Es384),
            -36 => Ok(Algorithm::Es512),
            -8 => Ok(Algorithm::EdDsa),
            5 => Ok(Algorithm::Hmac256),
            6 => Ok(Algorithm::Hmac384),
            7 => Ok(Algorithm::Hmac512),
            other => Err(CoseError::UnsupportedAlg(other)),
        }
    }

    /// The JOSE algorithm driving the crypto capability.
    pub fn jose(&self) -> jose::Algorithm {
        match self {
            Algorithm::Es256 => jose::Algorithm::Es256,
            Algorithm::Es384 => jose::Algorithm::Es384,
            Algorithm::Es512 => jose::Algorithm::Es512,
            Algorithm::EdDsa => jose::Algorithm::EdDsa,
            Algorithm::Hmac256 => jose::Algorithm::Hs256,
            Algorithm::Hmac384 => jose::Algorithm::Hs384,
            Algorithm::Hmac512 => jose::Algorithm::Hs512,
        }
    }
}

/// Header labels used by this crate.
pub mod label {
    pub const ALG: i64 = 1;
    pub const KID: i64 = 4;
    pub const X5CHAIN: i64 = 33;
}

/// An ordered COSE header map. Unknown labels are preserved untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap(Vec<(Value, Value)>);

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: i64) -> Option<&Value> {
        let target = Value::from(target);
        self.0.iter().find(|(k, _)| *k == target).map(|(_, v)| v)
    }

    pub fn insert(&mut self, target: i64, value: Value) {
        let target = Value::from(target);
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == target) {
            entry.1 = value;
        } else {
            self.0.push((target, value));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn alg(&self) -> Option<Result<Algorithm, CoseError>> {
        self.get(label::ALG)
            .and_then(Value::integer)
            .map(Algorithm::from_label)
    }

    pub fn kid(&self) -> Option<&[u8]> {
        self.get(label::KID).and_then(Value::as_bytes)
    }

    /// The deterministic encoding, the form entering Sig/MAC structures.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.to_cbor())
    }
}

impl CborSchema for HeaderMap {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        value
            .into_map()
            .map(HeaderMap)
            .ok_or_else(|| CoseError::InvalidStructure("headers must be a map").into())
    }

    fn to_cbor(&self) -> Value {
        Value::Map(self.0.clone())
    }
}

/// The x5chain header accepts either a single bstr or an array of bstrs.
pub(crate) fn x5chain_from_value(value: &Value) -> Result<Vec<Vec<u8>>, CoseError> {
    match value {
        Value::Bytes(b) => Ok(vec![b.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_bytes()
                    .map(<[u8]>::to_vec)
                    .ok_or(CoseError::InvalidStructure("x5chain entry must be a bstr"))
            })
            .collect(),
        _ => Err(CoseError::InvalidStructure(
            "x5chain must be a bstr or array of bstrs",
        )),
    }
}

pub(crate) fn x5chain_to_value(chain: &[Vec<u8>]) -> Value {
    match chain {
        [single] => Value::Bytes(single.clone()),
        many => Value::Array(many.iter().cloned().map(Value::Bytes).collect()),
    }
}
