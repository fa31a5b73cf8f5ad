//! JOSE key material: the JWK model, the algorithm dispatch table, and
//! PEM / SPKI / PKCS#8 / X.509 key import.

mod algorithm;
pub mod compact;
pub(crate) mod der;
pub mod import;

pub use algorithm::{Algorithm, HashAlgorithm, KeyWrap, Scheme};
pub use compact::SoftwareJose;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum KeyError {
    #[error("invalid PEM: {0}")]
    InvalidPem(String),
    #[error("invalid ASN.1: {0}")]
    InvalidAsn1(&'static str),
    #[error("unsupported curve OID {0}")]
    UnsupportedCurveOid(String),
    #[error("unsupported algorithm {0:?}")]
    UnsupportedAlg(String),
    #[error("RSA modulus length {0} is below the 2048-bit minimum")]
    InvalidModulusLength(usize),
    #[error("key is not extractable")]
    KeyNotExtractable,
    #[error("key type mismatch: expected {expected}, found {found}")]
    KeyTypeMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("key is missing required parameter {0:?}")]
    MissingParameter(&'static str),
    #[error("invalid key parameter {0:?}")]
    InvalidParameter(&'static str),
}

/// JSON Web Key. Parameters not applicable to the key type stay `None` and
/// are skipped when serialising.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// Symmetric key value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    /// RSA modulus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Extractability; generated keys default to `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<bool>,
}

impl Jwk {
    pub fn parse(json: &str) -> Result<Self, KeyError> {
        serde_json::from_str(json).map_err(|_| KeyError::InvalidParameter("jwk"))
    }

    pub fn is_private(&self) -> bool {
        self.d.is_some() || self.k.is_some()
    }

    /// The public half: private parameters stripped.
    pub fn to_public(&self) -> Jwk {
        Jwk {
            d: None,
            k: None,
            ..self.clone()
        }
    }

    /// Decode a base64url parameter, by field name.
    pub fn param_bytes(&self, name: &'static str) -> Result<Vec<u8>, KeyError> {
        let value = match name {
            "x" => &self.x,
            "y" => &self.y,
            "d" => &self.d,
            "k" => &self.k,
            "n" => &self.n,
            "e" => &self.e,
            _ => &None,
        };
        let value = value.as_ref().ok_or(KeyError::MissingParameter(name))?;
        BASE64_URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| KeyError::InvalidParameter(name))
    }
}

/// Decode the protected header of a compact JWS/JWE without touching the
/// rest of the serialisation.
pub fn peek_protected_header(compact: &str) -> Result<serde_json::Value, KeyError> {
    let first = compact
        .split('.')
        .next()
        .ok_or(KeyError::InvalidParameter("protected header"))?;
    let raw = BASE64_URL_SAFE_NO_PAD
        .decode(first)
        .map_err(|_| KeyError::InvalidParameter("protected header"))?;
    serde_json::from_slice(&raw).map_err(|_| KeyError::InvalidParameter("protected header"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwk_roundtrip_skips_absent_parameters() {
        let jwk = Jwk {
            kty: "EC".into(),
            crv: Some("P-256".into()),
            x: Some("AQAB".into()),
            y: Some("AQAB".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&jwk).unwrap();
        assert!(!json.contains("\"d\""));
        assert!(!json.contains("\"use\""));
        assert_eq!(Jwk::parse(&json).unwrap(), jwk);
    }

    #[test]
    fn public_half_drops_private_material() {
        let jwk = Jwk {
            kty: "EC".into(),
            crv: Some("P-256".into()),
            x: Some("eA".into()),
            y: Some("eQ".into()),
            d: Some("ZA".into()),
            ..Default::default()
        };
        assert!(jwk.is_private());
        let public = jwk.to_public();
        assert!(!public.is_private());
        assert_eq!(public.x, jwk.x);
    }
}
