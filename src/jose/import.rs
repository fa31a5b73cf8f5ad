//! Key import: PEM armor removal, then just enough ASN.1 to reach the key
//! material in SPKI, PKCS#8 and X.509 inputs.

use base64::prelude::*;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;

use super::der::{self, Tlv, TAG_BIT_STRING, TAG_INTEGER, TAG_OCTET_STRING, TAG_OID, TAG_SEQUENCE};
use super::{Jwk, KeyError};

const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_X25519: &str = "1.3.101.110";
const OID_X448: &str = "1.3.101.111";
const OID_ED25519: &str = "1.3.101.112";
const OID_ED448: &str = "1.3.101.113";

/// Named curve registry keyed by parameter OID.
fn ec_curve_from_oid(oid: &str) -> Result<(&'static str, usize), KeyError> {
    match oid {
        "1.2.840.10045.3.1.7" => Ok(("P-256", 32)),
        "1.3.132.0.34" => Ok(("P-384", 48)),
        "1.3.132.0.35" => Ok(("P-521", 66)),
        other => Err(KeyError::UnsupportedCurveOid(other.to_string())),
    }
}

fn okp_curve_from_oid(oid: &str) -> Option<&'static str> {
    match oid {
        OID_X25519 => Some("X25519"),
        OID_X448 => Some("X448"),
        OID_ED25519 => Some("Ed25519"),
        OID_ED448 => Some("Ed448"),
        _ => None,
    }
}

/// Import a key from PEM: the armor decides the parse (public key / private
/// key / certificate).
pub fn jwk_from_pem(pem: &str) -> Result<Jwk, KeyError> {
    let (label, der) = pem_rfc7468::decode_vec(pem.as_bytes())
        .map_err(|e| KeyError::InvalidPem(e.to_string()))?;
    match label {
        "PUBLIC KEY" => jwk_from_spki(&der),
        "PRIVATE KEY" => jwk_from_pkcs8(&der),
        "CERTIFICATE" => jwk_from_spki(&spki_from_x509(&der)?),
        other => Err(KeyError::InvalidPem(format!("unexpected label {other:?}"))),
    }
}

/// Import a public key from a SubjectPublicKeyInfo.
pub fn jwk_from_spki(der: &[u8]) -> Result<Jwk, KeyError> {
    let elems = der::children(der)?;
    let [alg_id, key_bits] = elems.as_slice() else {
        return Err(KeyError::InvalidAsn1("SPKI must hold two elements"));
    };
    if !key_bits.is_universal(TAG_BIT_STRING) {
        return Err(KeyError::InvalidAsn1("SPKI key must be a bit string"));
    }
    let key_bytes = bit_string_bytes(key_bits)?;
    let (alg_oid, params) = algorithm_identifier(alg_id)?;

    match alg_oid.as_str() {
        OID_EC_PUBLIC_KEY => {
            let params = params.ok_or(KeyError::InvalidAsn1("EC key without curve OID"))?;
            let (crv, coord_len) = ec_curve_from_oid(&der::oid_to_string(params.content)?)?;
            let (x, y) = split_ec_point(key_bytes, coord_len)?;
            Ok(Jwk {
                kty: "EC".into(),
                crv: Some(crv.into()),
                x: Some(BASE64_URL_SAFE_NO_PAD.encode(x)),
                y: Some(BASE64_URL_SAFE_NO_PAD.encode(y)),
                ..Default::default()
            })
        }
        OID_RSA_ENCRYPTION => {
            let elems = der::children(key_bytes)?;
            let [n, e] = elems.as_slice() else {
                return Err(KeyError::InvalidAsn1("RSA key must hold two integers"));
            };
            if !n.is_universal(TAG_INTEGER) || !e.is_universal(TAG_INTEGER) {
                return Err(KeyError::InvalidAsn1("RSA parameters must be integers"));
            }
            Ok(Jwk {
                kty: "RSA".into(),
                n: Some(BASE64_URL_SAFE_NO_PAD.encode(strip_leading_zero(n.content))),
                e: Some(BASE64_URL_SAFE_NO_PAD.encode(strip_leading_zero(e.content))),
                ..Default::default()
            })
        }
        okp if okp_curve_from_oid(okp).is_some() => Ok(Jwk {
            kty: "OKP".into(),
            crv: okp_curve_from_oid(okp).map(Into::into),
            x: Some(BASE64_URL_SAFE_NO_PAD.encode(key_bytes)),
            ..Default::default()
        }),
        other => Err(KeyError::UnsupportedCurveOid(other.to_string())),
    }
}

/// Import a private key from PKCS#8 PrivateKeyInfo.
pub fn jwk_from_pkcs8(der: &[u8]) -> Result<Jwk, KeyError> {
    let elems = der::children(der)?;
    let [version, alg_id, private_key, ..] = elems.as_slice() else {
        return Err(KeyError::InvalidAsn1("PrivateKeyInfo is too short"));
    };
    if !version.is_universal(TAG_INTEGER) || !private_key.is_universal(TAG_OCTET_STRING) {
        return Err(KeyError::InvalidAsn1("malformed PrivateKeyInfo"));
    }
    let (alg_oid, params) = algorithm_identifier(alg_id)?;

    match alg_oid.as_str() {
        OID_EC_PUBLIC_KEY => {
            let params = params.ok_or(KeyError::InvalidAsn1("EC key without curve OID"))?;
            let (crv, coord_len) = ec_curve_from_oid(&der::oid_to_string(params.content)?)?;
            ec_private_key(private_key.content, crv, coord_len)
        }
        okp if okp_curve_from_oid(okp).is_some() => {
            // CurvePrivateKey: one more octet-string layer around the scalar.
            let inner = der::elements(private_key.content)?;
            let [scalar] = inner.as_slice() else {
                return Err(KeyError::InvalidAsn1("malformed CurvePrivateKey"));
            };
            if !scalar.is_universal(TAG_OCTET_STRING) {
                return Err(KeyError::InvalidAsn1("malformed CurvePrivateKey"));
            }
            Ok(Jwk {
                kty: "OKP".into(),
                crv: okp_curve_from_oid(&alg_oid).map(Into::into),
                d: Some(BASE64_URL_SAFE_NO_PAD.encode(scalar.content)),
                ext: Some(false),
                ..Default::default()
            })
        }
        other => Err(KeyError::UnsupportedCurveOid(other.to_string())),
    }
}

/// SEC1 ECPrivateKey, as embedded in PKCS#8.
fn ec_private_key(der: &[u8], crv: &'static str, coord_len: usize) -> Result<Jwk, KeyError> {
    let elems = der::children(der)?;
    let mut iter = elems.iter();
    let version = iter.next().ok_or(KeyError::InvalidAsn1("empty ECPrivateKey"))?;
    if !version.is_universal(TAG_INTEGER) || version.content != [1] {
        return Err(KeyError::InvalidAsn1("unsupported ECPrivateKey version"));
    }
    let d = iter
        .next()
        .filter(|tlv| tlv.is_universal(TAG_OCTET_STRING))
        .ok_or(KeyError::InvalidAsn1("ECPrivateKey missing scalar"))?;

    // [1] publicKey, if the encoder included it.
    let embedded_point = elems
        .iter()
        .find(|tlv| tlv.is_context(1))
        .map(|tlv| -> Result<_, KeyError> {
            let inner = der::elements(tlv.content)?;
            let [bits] = inner.as_slice() else {
                return Err(KeyError::InvalidAsn1("malformed ECPrivateKey public key"));
            };
            bit_string_bytes(bits)
        })
        .transpose()?;

    let (x, y) = match embedded_point {
        Some(point) => {
            let (x, y) = split_ec_point(point, coord_len)?;
            (x.to_vec(), y.to_vec())
        }
        None if crv == "P-256" => {
            let secret = p256::SecretKey::from_slice(d.content)
                .map_err(|_| KeyError::InvalidParameter("d"))?;
            let point = secret.public_key().to_encoded_point(false);
            let (x, y) = split_ec_point(point.as_bytes(), coord_len)?;
            (x.to_vec(), y.to_vec())
        }
        None => return Err(KeyError::MissingParameter("public key")),
    };

    Ok(Jwk {
        kty: "EC".into(),
        crv: Some(crv.into()),
        x: Some(BASE64_URL_SAFE_NO_PAD.encode(x)),
        y: Some(BASE64_URL_SAFE_NO_PAD.encode(y)),
        d: Some(BASE64_URL_SAFE_NO_PAD.encode(d.content)),
        ext: Some(false),
        ..Default::default()
    })
}

/// Locate the SubjectPublicKeyInfo inside a DER certificate.
///
/// tbsCertificate leads with an explicit `[0]` version on v2/v3 certificates
/// and goes straight to the serial number on v1, shifting the SPKI from
/// index 6 to index 5. The leading-byte heuristic mirrors the original
/// implementation.
pub fn spki_from_x509(der: &[u8]) -> Result<Vec<u8>, KeyError> {
    let elems = der::children(der)?;
    let tbs = elems
        .first()
        .filter(|tlv| tlv.is_universal(TAG_SEQUENCE))
        .ok_or(KeyError::InvalidAsn1("certificate missing tbsCertificate"))?;
    let fields = der::elements(tbs.content)?;
    let index = if tbs.content.first() == Some(&0xa0) { 6 } else { 5 };
    let spki = fields
        .get(index)
        .ok_or(KeyError::InvalidAsn1("tbsCertificate is too short"))?;
    Ok(spki.raw.to_vec())
}

/// PKCS#8 export of a private JWK.
// TODO: at least one WebCrypto-based exporter labels this key material
// 'public', contradicting the PKCS#8 contract; we export it as the private
// key it is. Revisit if interop with such exporters ever matters.
pub fn to_pkcs8(jwk: &Jwk) -> Result<Vec<u8>, KeyError> {
    if jwk.ext == Some(false) {
        return Err(KeyError::KeyNotExtractable);
    }
    if jwk.kty != "EC" || jwk.crv.as_deref() != Some("P-256") {
        return Err(KeyError::KeyTypeMismatch {
            expected: "EC/P-256",
            found: format!("{}/{}", jwk.kty, jwk.crv.as_deref().unwrap_or("-")),
        });
    }
    let d = jwk.param_bytes("d")?;
    let secret =
        p256::SecretKey::from_slice(&d).map_err(|_| KeyError::InvalidParameter("d"))?;
    let doc = secret
        .to_pkcs8_der()
        .map_err(|_| KeyError::InvalidParameter("d"))?;
    Ok(doc.as_bytes().to_vec())
}

/// Reject RSA generation parameters below the interoperability floor.
pub fn check_rsa_modulus_length(modulus_length: usize) -> Result<(), KeyError> {
    if modulus_length < 2048 {
        return Err(KeyError::InvalidModulusLength(modulus_length));
    }
    Ok(())
}

fn algorithm_identifier<'a>(tlv: &Tlv<'a>) -> Result<(String, Option<Tlv<'a>>), KeyError> {
    if !tlv.is_universal(TAG_SEQUENCE) {
        return Err(KeyError::InvalidAsn1("expected AlgorithmIdentifier"));
    }
    let elems = der::elements(tlv.content)?;
    let oid = elems
        .first()
        .filter(|e| e.is_universal(TAG_OID))
        .ok_or(KeyError::InvalidAsn1("AlgorithmIdentifier missing OID"))?;
    let params = elems.get(1).filter(|e| e.is_universal(TAG_OID)).copied();
    Ok((der::oid_to_string(oid.content)?, params))
}

fn bit_string_bytes<'a>(tlv: &Tlv<'a>) -> Result<&'a [u8], KeyError> {
    if !tlv.is_universal(TAG_BIT_STRING) {
        return Err(KeyError::InvalidAsn1("expected a bit string"));
    }
    match tlv.content.split_first() {
        Some((0, rest)) => Ok(rest),
        _ => Err(KeyError::InvalidAsn1("bit string with unused bits")),
    }
}

fn split_ec_point(point: &[u8], coord_len: usize) -> Result<(&[u8], &[u8]), KeyError> {
    if point.len() != 1 + 2 * coord_len || point[0] != 0x04 {
        return Err(KeyError::InvalidAsn1("EC point must be uncompressed"));
    }
    Ok((&point[1..1 + coord_len], &point[1 + coord_len..]))
}

fn strip_leading_zero(content: &[u8]) -> &[u8] {
    match content.split_first() {
        Some((0, rest)) if !rest.is_empty() => rest,
        _ => content,
    }
}
