use crate::cbor::{decode, encode, CborSchema, Value};
use crate::context::CryptoContext;
use crate::jose::Jwk;

use super::{label, Algorithm, CoseError, HeaderMap};

/// COSE_Mac0 (RFC 9052 §6.2), the MAC-without-recipients form used for mdoc
/// device authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct CoseMac0 {
    protected_bytes: Vec<u8>,
    protected: HeaderMap,
    unprotected: HeaderMap,
    payload: Option<Vec<u8>>,
    tag: Vec<u8>,
}

impl CoseMac0 {
    /// MAC a detached payload with an HMAC key (`oct` JWK).
    pub fn mac_detached(
        mut protected: HeaderMap,
        unprotected: HeaderMap,
        detached_payload: &[u8],
        external_aad: &[u8],
        key: &Jwk,
        alg: Algorithm,
        crypto: &dyn CryptoContext,
    ) -> Result<Self, CoseError> {
        protected.insert(label::ALG, Value::from(alg.label()));
        let protected_bytes = protected.to_bytes();
        let to_mac = mac_structure(&protected_bytes, external_aad, detached_payload);
        let tag = crypto.sign(alg.jose(), key, &to_mac)?;
        Ok(Self {
            protected_bytes,
            protected,
            unprotected,
            payload: None,
            tag,
        })
    }

    pub fn verify(
        &self,
        key: &Jwk,
        external_aad: Option<&[u8]>,
        detached_payload: Option<&[u8]>,
        crypto: &dyn CryptoContext,
    ) -> Result<(), CoseError> {
        let alg = self.alg()?;
        let payload = self
            .payload
            .as_deref()
            .or(detached_payload)
            .ok_or(CoseError::MissingPayload)?;
        let to_mac = mac_structure(
            &self.protected_bytes,
            external_aad.unwrap_or_default(),
            payload,
        );
        if crypto.verify(alg.jose(), key, &to_mac, &self.tag)? {
            Ok(())
        } else {
            Err(CoseError::MacInvalid)
        }
    }

    /// The MAC algorithm. Rejected outright when the label sits outside the
    /// protected headers.
    pub fn alg(&self) -> Result<Algorithm, CoseError> {
        if let Some(alg) = self.protected.alg() {
            return alg;
        }
        if self.unprotected.alg().is_some() {
            return Err(CoseError::AlgNotProtected);
        }
        Err(CoseError::MissingAlg)
    }

    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    pub fn protected(&self) -> &HeaderMap {
        &self.protected
    }

    pub fn unprotected(&self) -> &HeaderMap {
        &self.unprotected
    }
}

impl CborSchema for CoseMac0 {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let items = value
            .into_array()
            .ok_or(CoseError::InvalidStructure("COSE_Mac0 must be an array"))?;
        let [protected, unprotected, payload, tag]: [Value; 4] = items
            .try_into()
            .map_err(|_| CoseError::InvalidStructure("COSE_Mac0 must hold four elements"))?;

        let protected_bytes = protected
            .into_bytes()
            .ok_or(CoseError::InvalidStructure("protected headers must be a bstr"))?;
        let protected = if protected_bytes.is_empty() {
            HeaderMap::new()
        } else {
            HeaderMap::from_cbor(decode(&protected_bytes)?)?
        };
        let unprotected = HeaderMap::from_cbor(unprotected)?;
        let payload = match payload {
            Value::Null => None,
            Value::Bytes(b) => Some(b),
            _ => {
                return Err(CoseError::InvalidStructure("payload must be a bstr or null").into())
            }
        };
        let tag = tag
            .into_bytes()
            .ok_or(CoseError::InvalidStructure("tag must be a bstr"))?;

        Ok(Self {
            protected_bytes,
            protected,
            unprotected,
            payload,
            tag,
        })
    }

    fn to_cbor(&self) -> Value {
        Value::Array(vec![
            Value::Bytes(self.protected_bytes.clone()),
            self.unprotected.to_cbor(),
            self.payload
                .as_ref()
                .map(|p| Value::Bytes(p.clone()))
                .unwrap_or(Value::Null),
            Value::Bytes(self.tag.clone()),
        ])
    }
}

/// `MAC_structure` for MAC0 (RFC 9052 §6.3).
fn mac_structure(protected_bytes: &[u8], external_aad: &[u8], payload: &[u8]) -> Vec<u8> {
    encode(&Value::Array(vec![
        Value::from("MAC0"),
        Value::Bytes(protected_bytes.to_vec()),
        Value::Bytes(external_aad.to_vec()),
        Value::Bytes(payload.to_vec()),
    ]))
}
