//! COSE_Key (RFC 9052 §7) and its JWK mapping.

use base64::prelude::*;

use crate::cbor::{CborSchema, Value};
use crate::jose::{Jwk, KeyError};

use super::CoseError;

/// Key type registry values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Okp,
    Ec2,
    Rsa,
    Symmetric,
}

impl KeyType {
    pub fn label(&self) -> i64 {
        match self {
            KeyType::Okp => 1,
            KeyType::Ec2 => 2,
            KeyType::Rsa => 3,
            KeyType::Symmetric => 4,
        }
    }

    fn from_label(label: i128) -> Result<Self, CoseError> {
        match label {
            1 => Ok(KeyType::Okp),
            2 => Ok(KeyType::Ec2),
            3 => Ok(KeyType::Rsa),
            4 => Ok(KeyType::Symmetric),
            other => Err(CoseError::UnsupportedAlg(other)),
        }
    }

    pub fn jwk_name(&self) -> &'static str {
        match self {
            KeyType::Okp => "OKP",
            KeyType::Ec2 => "EC",
            KeyType::Rsa => "RSA",
            KeyType::Symmetric => "oct",
        }
    }
}

/// Elliptic curve registry values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    P256,
    P384,
    P521,
    X25519,
    X448,
    Ed25519,
    Ed448,
}

impl Curve {
    pub fn label(&self) -> i64 {
        match self {
            Curve::P256 => 1,
            Curve::P384 => 2,
            Curve::P521 => 3,
            Curve::X25519 => 4,
            Curve::X448 => 5,
            Curve::Ed25519 => 6,
            Curve::Ed448 => 7,
        }
    }

    pub fn from_label(label: i128) -> Result<Self, CoseError> {
        match label {
            1 => Ok(Curve::P256),
            2 => Ok(Curve::P384),
            3 => Ok(Curve::P521),
            4 => Ok(Curve::X25519),
            5 => Ok(Curve::X448),
            6 => Ok(Curve::Ed25519),
            7 => Ok(Curve::Ed448),
            other => Err(CoseError::UnsupportedAlg(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
            Curve::P521 => "P-521",
            Curve::X25519 => "X25519",
            Curve::X448 => "X448",
            Curve::Ed25519 => "Ed25519",
            Curve::Ed448 => "Ed448",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, KeyError> {
        match name {
            "P-256" => Ok(Curve::P256),
            "P-384" => Ok(Curve::P384),
            "P-521" => Ok(Curve::P521),
            "X25519" => Ok(Curve::X25519),
            "X448" => Ok(Curve::X448),
            "Ed25519" => Ok(Curve::Ed25519),
            "Ed448" => Ok(Curve::Ed448),
            other => Err(KeyError::UnsupportedAlg(other.to_string())),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Curve::P256 | Curve::P384 | Curve::P521 => KeyType::Ec2,
            _ => KeyType::Okp,
        }
    }
}

mod key_label {
    pub const KTY: i64 = 1;
    pub const KID: i64 = 2;
    pub const ALG: i64 = 3;
    pub const CRV: i64 = -1;
    pub const X: i64 = -2;
    pub const Y: i64 = -3;
    pub const D: i64 = -4;
}

/// A COSE_Key for the EC2 and OKP key types used by mdoc device keys.
#[derive(Debug, Clone, PartialEq)]
pub struct CoseKey {
    pub kty: KeyType,
    pub crv: Curve,
    pub x: Vec<u8>,
    /// Present on EC2 keys only.
    pub y: Option<Vec<u8>>,
    /// Private scalar, when the key carries one.
    pub d: Option<Vec<u8>>,
    pub kid: Option<Vec<u8>>,
    pub alg: Option<i64>,
}

impl CoseKey {
    /// The raw ECDH input form: `0x04 || X || Y` for the P-curves, the raw
    /// point/scalar bytes for the OKP curves.
    pub fn to_raw(&self) -> Result<Vec<u8>, CoseError> {
        match self.kty {
            KeyType::Ec2 => {
                let y = self
                    .y
                    .as_ref()
                    .ok_or(CoseError::MissingField("y"))?;
                let mut out = Vec::with_capacity(1 + self.x.len() + y.len());
                out.push(0x04);
                out.extend_from_slice(&self.x);
                out.extend_from_slice(y);
                Ok(out)
            }
            KeyType::Okp => Ok(self.x.clone()),
            _ => Err(CoseError::InvalidStructure("raw form needs an EC2 or OKP key")),
        }
    }

    pub fn to_jwk(&self) -> Jwk {
        Jwk {
            kty: self.kty.jwk_name().into(),
            crv: Some(self.crv.name().into()),
            x: Some(BASE64_URL_SAFE_NO_PAD.encode(&self.x)),
            y: self.y.as_ref().map(|y| BASE64_URL_SAFE_NO_PAD.encode(y)),
            d: self.d.as_ref().map(|d| BASE64_URL_SAFE_NO_PAD.encode(d)),
            kid: self
                .kid
                .as_ref()
                .map(|kid| String::from_utf8_lossy(kid).into_owned()),
            alg: None,
            ..Default::default()
        }
    }

    pub fn from_jwk(jwk: &Jwk) -> Result<Self, KeyError> {
        let crv = Curve::from_name(
            jwk.crv
                .as_deref()
                .ok_or(KeyError::MissingParameter("crv"))?,
        )?;
        let kty = crv.key_type();
        if jwk.kty != kty.jwk_name() {
            return Err(KeyError::KeyTypeMismatch {
                expected: kty.jwk_name(),
                found: jwk.kty.clone(),
            });
        }
        let x = jwk.param_bytes("x")?;
        let y = match kty {
            KeyType::Ec2 => Some(jwk.param_bytes("y")?),
            _ => None,
        };
        let d = jwk
            .d
            .as_ref()
            .map(|_| jwk.param_bytes("d"))
            .transpose()?;
        Ok(Self {
            kty,
            crv,
            x,
            y,
            d,
            kid: jwk.kid.as_ref().map(|kid| kid.as_bytes().to_vec()),
            alg: None,
        })
    }
}

impl CborSchema for CoseKey {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let kty = value
            .map_get_int(key_label::KTY)
            .and_then(Value::integer)
            .ok_or(CoseError::MissingField("kty"))
            .and_then(KeyType::from_label)?;
        let crv = value
            .map_get_int(key_label::CRV)
            .and_then(Value::integer)
            .ok_or(CoseError::MissingField("crv"))
            .and_then(Curve::from_label)?;
        let x = value
            .map_get_int(key_label::X)
            .and_then(Value::as_bytes)
            .ok_or(CoseError::MissingField("x"))?
            .to_vec();
        let y = value
            .map_get_int(key_label::Y)
            .and_then(Value::as_bytes)
            .map(<[u8]>::to_vec);
        let d = value
            .map_get_int(key_label::D)
            .and_then(Value::as_bytes)
            .map(<[u8]>::to_vec);
        let kid = value
            .map_get_int(key_label::KID)
            .and_then(Value::as_bytes)
            .map(<[u8]>::to_vec);
        let alg = value
            .map_get_int(key_label::ALG)
            .and_then(Value::integer)
            .map(|a| a as i64);

        if kty == KeyType::Ec2 && y.is_none() {
            return Err(CoseError::MissingField("y").into());
        }
        Ok(Self {
            kty,
            crv,
            x,
            y,
            d,
            kid,
            alg,
        })
    }

    fn to_cbor(&self) -> Value {
        let mut entries = vec![
            (
                Value::from(key_label::KTY),
                Value::from(self.kty.label()),
            ),
            (
                Value::from(key_label::CRV),
                Value::from(self.crv.label()),
            ),
            (Value::from(key_label::X), Value::Bytes(self.x.clone())),
        ];
        if let Some(y) = &self.y {
            entries.push((Value::from(key_label::Y), Value::Bytes(y.clone())));
        }
        if let Some(d) = &self.d {
            entries.push((Value::from(key_label::D), Value::Bytes(d.clone())));
        }
        if let Some(kid) = &self.kid {
            entries.push((Value::from(key_label::KID), Value::Bytes(kid.clone())));
        }
        if let Some(alg) = self.alg {
            entries.push((Value::from(key_label::ALG), Value::from(alg)));
        }
        Value::Map(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::cbor::{decode, encode};

    use super::*;

    fn p256_key() -> CoseKey {
        CoseKey {
            kty: KeyType::Ec2,
            crv: Curve::P256,
            x: vec![0x11; 32],
            y: Some(vec![0x22; 32]),
            d: None,
            kid: Some(b"device-key-1".to_vec()),
            alg: None,
        }
    }

    #[test]
    fn jwk_conversion_is_an_identity() {
        let key = p256_key();
        let jwk = key.to_jwk();
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv.as_deref(), Some("P-256"));
        assert_eq!(CoseKey::from_jwk(&jwk).unwrap(), key);
        assert_eq!(CoseKey::from_jwk(&jwk).unwrap().to_jwk(), jwk);
    }

    #[test]
    fn jwk_roundtrip_for_okp() {
        let key = CoseKey {
            kty: KeyType::Okp,
            crv: Curve::Ed25519,
            x: vec![0x33; 32],
            y: None,
            d: None,
            kid: None,
            alg: None,
        };
        let jwk = key.to_jwk();
        assert_eq!(jwk.kty, "OKP");
        assert_eq!(CoseKey::from_jwk(&jwk).unwrap(), key);
    }

    #[test]
    fn cbor_roundtrip() {
        let key = p256_key();
        let bytes = encode(&key.to_cbor());
        let reparsed = CoseKey::from_cbor(decode(&bytes).unwrap()).unwrap();
        assert_eq!(reparsed, key);
    }

    #[test]
    fn raw_point_for_ecdh() {
        let raw = p256_key().to_raw().unwrap();
        assert_eq!(raw.len(), 65);
        assert_eq!(raw[0], 0x04);
        assert_eq!(&raw[1..33], &[0x11; 32]);
        assert_eq!(&raw[33..], &[0x22; 32]);
    }

    #[test]
    fn mismatched_kty_is_rejected() {
        let jwk = Jwk {
            kty: "OKP".into(),
            crv: Some("P-256".into()),
            x: Some(BASE64_URL_SAFE_NO_PAD.encode([0u8; 32])),
            y: Some(BASE64_URL_SAFE_NO_PAD.encode([0u8; 32])),
            ..Default::default()
        };
        assert!(matches!(
            CoseKey::from_jwk(&jwk),
            Err(KeyError::KeyTypeMismatch { .. })
        ));
    }
}
