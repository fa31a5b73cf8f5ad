use crate::cbor::{decode, encode, CborSchema, Value};
use crate::context::CryptoContext;
use crate::jose::Jwk;

use super::{label, Algorithm, CoseError, HeaderMap};

/// COSE_Sign1 (RFC 9052 §4.2).
///
/// `protected_bytes` is the encoded protected-header map exactly as it
/// appeared on the wire (or as it was encoded at signing time); the parsed
/// map is kept alongside for lookups only.
#[derive(Debug, Clone, PartialEq)]
pub struct CoseSign1 {
    protected_bytes: Vec<u8>,
    protected: HeaderMap,
    unprotected: HeaderMap,
    payload: Option<Vec<u8>>,
    signature: Vec<u8>,
}

impl CoseSign1 {
    /// Sign an attached payload.
    pub fn sign(
        protected: HeaderMap,
        unprotected: HeaderMap,
        payload: Vec<u8>,
        external_aad: &[u8],
        key: &Jwk,
        alg: Algorithm,
        crypto: &dyn CryptoContext,
    ) -> Result<Self, CoseError> {
        Self::sign_inner(
            protected,
            unprotected,
            Some(payload),
            None,
            external_aad,
            key,
            alg,
            crypto,
        )
    }

    /// Sign a detached payload: the bytes are signed over but not carried.
    pub fn sign_detached(
        protected: HeaderMap,
        unprotected: HeaderMap,
        detached_payload: &[u8],
        external_aad: &[u8],
        key: &Jwk,
        alg: Algorithm,
        crypto: &dyn CryptoContext,
    ) -> Result<Self, CoseError> {
        Self::sign_inner(
            protected,
            unprotected,
            None,
            Some(detached_payload),
            external_aad,
            key,
            alg,
            crypto,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn sign_inner(
        mut protected: HeaderMap,
        unprotected: HeaderMap,
        payload: Option<Vec<u8>>,
        detached: Option<&[u8]>,
        external_aad: &[u8],
        key: &Jwk,
        alg: Algorithm,
        crypto: &dyn CryptoContext,
    ) -> Result<Self, CoseError> {
        protected.insert(label::ALG, Value::from(alg.label()));
        let protected_bytes = protected.to_bytes();
        let to_sign = sig_structure(
            &protected_bytes,
            external_aad,
            payload.as_deref().or(detached).ok_or(CoseError::MissingPayload)?,
        );
        let signature = crypto.sign(alg.jose(), key, &to_sign)?;
        Ok(Self {
            protected_bytes,
            protected,
            unprotected,
            payload,
            signature,
        })
    }

    /// Verify the signature. For a detached payload, pass the bytes that were
    /// signed over; otherwise the attached payload is used.
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
        let to_verify = sig_structure(
            &self.protected_bytes,
            external_aad.unwrap_or_default(),
            payload,
        );
        if crypto.verify(alg.jose(), key, &to_verify, &self.signature)? {
            Ok(())
        } else {
            Err(CoseError::SignatureInvalid)
        }
    }

    /// The signature algorithm; must be declared in the protected headers.
    pub fn alg(&self) -> Result<Algorithm, CoseError> {
        if let Some(alg) = self.protected.alg() {
            return alg;
        }
        if self.unprotected.alg().is_some() {
            return Err(CoseError::AlgNotProtected);
        }
        Err(CoseError::MissingAlg)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn protected(&self) -> &HeaderMap {
        &self.protected
    }

    pub fn unprotected(&self) -> &HeaderMap {
        &self.unprotected
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn kid(&self) -> Option<&[u8]> {
        self.protected.kid().or_else(|| self.unprotected.kid())
    }

    /// DER certificates from the x5chain header, protected or unprotected.
    pub fn x5chain(&self) -> Result<Option<Vec<Vec<u8>>>, CoseError> {
        self.protected
            .get(label::X5CHAIN)
            .or_else(|| self.unprotected.get(label::X5CHAIN))
            .map(super::x5chain_from_value)
            .transpose()
    }
}

impl CborSchema for CoseSign1 {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let items = value
            .into_array()
            .ok_or(CoseError::InvalidStructure("COSE_Sign1 must be an array"))?;
        let [protected, unprotected, payload, signature]: [Value; 4] = items
            .try_into()
            .map_err(|_| CoseError::InvalidStructure("COSE_Sign1 must hold four elements"))?;

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
        let signature = signature
            .into_bytes()
            .ok_or(CoseError::InvalidStructure("signature must be a bstr"))?;

        Ok(Self {
            protected_bytes,
            protected,
            unprotected,
            payload,
            signature,
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
            Value::Bytes(self.signature.clone()),
        ])
    }
}

/// `Sig_structure` for Signature1 (RFC 9052 §4.4).
fn sig_structure(protected_bytes: &[u8], external_aad: &[u8], payload: &[u8]) -> Vec<u8> {
    encode(&Value::Array(vec![
        Value::from("Signature1"),
        Value::Bytes(protected_bytes.to_vec()),
        Value::Bytes(external_aad.to_vec()),
        Value::Bytes(payload.to_vec()),
    ]))
}
