//! Software [`JoseContext`]: compact JWS (ES256, HS family) and compact JWE
//! with ECDH-ES direct key agreement and AES-GCM content encryption — the
//! envelope combination used for ISO 18013-7 / JARM responses.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::prelude::*;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde_json::{json, Value as Json};
use sha2::{Digest, Sha256};

use crate::context::{CapabilityError, CryptoContext, JoseContext, JweOptions};
use crate::crypto::{p256_public_from_jwk, p256_secret_from_jwk, RustCryptoContext};

use super::{Algorithm, Jwk, KeyError};

#[derive(Debug, Default, Clone)]
pub struct SoftwareJose {
    crypto: RustCryptoContext,
}

impl SoftwareJose {
    pub fn new() -> Self {
        Self::default()
    }
}

fn err(cause: impl Into<String>) -> CapabilityError {
    CapabilityError::msg("jose", cause)
}

fn b64(data: impl AsRef<[u8]>) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(data)
}

fn b64_decode(segment: &str) -> Result<Vec<u8>, CapabilityError> {
    BASE64_URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| err("segment is not base64url"))
}

impl JoseContext for SoftwareJose {
    fn encrypt_compact(
        &self,
        claims: &Json,
        key: &Jwk,
        alg: Algorithm,
        enc: Algorithm,
        options: &JweOptions,
    ) -> Result<String, CapabilityError> {
        if alg != Algorithm::EcdhEs {
            return Err(err(format!("unsupported JWE alg {alg}")));
        }
        let key_len = match enc {
            Algorithm::A128Gcm => 16,
            Algorithm::A256Gcm => 32,
            other => return Err(err(format!("unsupported JWE enc {other}"))),
        };

        let recipient = p256_public_from_jwk(key).map_err(|e| CapabilityError::new("jose", e))?;
        let ephemeral = p256::SecretKey::random(&mut rand::rngs::OsRng);
        let shared = p256::ecdh::diffie_hellman(
            ephemeral.to_nonzero_scalar(),
            recipient.as_affine(),
        );

        let epk_point = ephemeral.public_key().to_encoded_point(false);
        let epk = json!({
            "kty": "EC",
            "crv": "P-256",
            "x": b64(&epk_point.as_bytes()[1..33]),
            "y": b64(&epk_point.as_bytes()[33..]),
        });

        let mut header = serde_json::Map::new();
        header.insert("alg".into(), Json::String(alg.name().into()));
        header.insert("enc".into(), Json::String(enc.name().into()));
        header.insert("epk".into(), epk);
        if let Some(apu) = &options.apu {
            header.insert("apu".into(), Json::String(b64(apu)));
        }
        if let Some(apv) = &options.apv {
            header.insert("apv".into(), Json::String(b64(apv)));
        }
        if let Some(kid) = options.kid.as_ref().or(key.kid.as_ref()) {
            header.insert("kid".into(), Json::String(kid.clone()));
        }

        let cek = concat_kdf(
            shared.raw_secret_bytes().as_slice(),
            enc.name(),
            options.apu.as_deref().unwrap_or_default().as_bytes(),
            options.apv.as_deref().unwrap_or_default().as_bytes(),
            key_len,
        );

        let protected = b64(serde_json::to_vec(&Json::Object(header)).map_err(|e| {
            CapabilityError::new("jose", e)
        })?);
        let iv = self.crypto.random(12)?;
        let plaintext =
            serde_json::to_vec(claims).map_err(|e| CapabilityError::new("jose", e))?;

        let sealed = seal(enc, &cek, &iv, protected.as_bytes(), &plaintext)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - 16);

        Ok(format!(
            "{protected}..{}.{}.{}",
            b64(&iv),
            b64(ciphertext),
            b64(tag)
        ))
    }

    fn decrypt_compact(&self, jwe: &str, key: &Jwk) -> Result<Vec<u8>, CapabilityError> {
        let segments: Vec<&str> = jwe.split('.').collect();
        let [protected, encrypted_key, iv, ciphertext, tag] = segments.as_slice() else {
            return Err(err("compact JWE must have five segments"));
        };
        if !encrypted_key.is_empty() {
            return Err(err("direct key agreement carries no encrypted key"));
        }

        let header: Json = serde_json::from_slice(&b64_decode(protected)?)
            .map_err(|_| err("protected header is not JSON"))?;
        let alg = header_algorithm(&header, "alg")?;
        if alg != Algorithm::EcdhEs {
            return Err(err(format!("unsupported JWE alg {alg}")));
        }
        let enc = header_algorithm(&header, "enc")?;
        let key_len = match enc {
            Algorithm::A128Gcm => 16,
            Algorithm::A256Gcm => 32,
            other => return Err(err(format!("unsupported JWE enc {other}"))),
        };

        let epk: Jwk = header
            .get("epk")
            .cloned()
            .ok_or_else(|| err("JWE header is missing epk"))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|_| err("JWE epk is not a JWK"))
            })?;
        let secret = p256_secret_from_jwk(key).map_err(|e| CapabilityError::new("jose", e))?;
        let epk_point =
            p256_public_from_jwk(&epk).map_err(|e| CapabilityError::new("jose", e))?;
        let shared =
            p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), epk_point.as_affine());

        let apu = header_party_info(&header, "apu")?;
        let apv = header_party_info(&header, "apv")?;
        let cek = concat_kdf(
            shared.raw_secret_bytes().as_slice(),
            enc.name(),
            &apu,
            &apv,
            key_len,
        );

        let iv = b64_decode(iv)?;
        let mut sealed = b64_decode(ciphertext)?;
        sealed.extend(b64_decode(tag)?);
        open(enc, &cek, &iv, protected.as_bytes(), &sealed)
    }

    fn sign_compact(
        &self,
        claims: &Json,
        key: &Jwk,
        alg: Algorithm,
    ) -> Result<String, CapabilityError> {
        let mut header = serde_json::Map::new();
        header.insert("alg".into(), Json::String(alg.name().into()));
        header.insert("typ".into(), Json::String("JWT".into()));
        if let Some(kid) = &key.kid {
            header.insert("kid".into(), Json::String(kid.clone()));
        }

        let protected = b64(
            serde_json::to_vec(&Json::Object(header))
                .map_err(|e| CapabilityError::new("jose", e))?,
        );
        let payload = b64(
            serde_json::to_vec(claims).map_err(|e| CapabilityError::new("jose", e))?,
        );
        let signing_input = format!("{protected}.{payload}");
        let signature = self.crypto.sign(alg, key, signing_input.as_bytes())?;
        Ok(format!("{signing_input}.{}", b64(signature)))
    }

    fn verify_compact(&self, jws: &str, key: &Jwk) -> Result<Vec<u8>, CapabilityError> {
        let segments: Vec<&str> = jws.split('.').collect();
        let [protected, payload, signature] = segments.as_slice() else {
            return Err(err("compact JWS must have three segments"));
        };

        let header: Json = serde_json::from_slice(&b64_decode(protected)?)
            .map_err(|_| err("protected header is not JSON"))?;
        let alg = header_algorithm(&header, "alg")?;

        let signing_input = format!("{protected}.{payload}");
        let signature = b64_decode(signature)?;
        if !self
            .crypto
            .verify(alg, key, signing_input.as_bytes(), &signature)?
        {
            return Err(err("JWS signature verification failed"));
        }
        b64_decode(payload)
    }

    fn import_jwk(&self, json: &str) -> Result<Jwk, CapabilityError> {
        Jwk::parse(json).map_err(|e| CapabilityError::new("importJwk", e))
    }
}

fn header_algorithm(header: &Json, field: &'static str) -> Result<Algorithm, CapabilityError> {
    header
        .get(field)
        .and_then(Json::as_str)
        .ok_or_else(|| err(format!("JOSE header is missing {field}")))
        .and_then(|name| {
            Algorithm::from_name(name).map_err(|e: KeyError| CapabilityError::new("jose", e))
        })
}

/// Agreement party info: the KDF input is the decoded value of the header
/// parameter (RFC 7518 §4.6.2).
fn header_party_info(header: &Json, field: &str) -> Result<Vec<u8>, CapabilityError> {
    match header.get(field).and_then(Json::as_str) {
        Some(value) => b64_decode(value),
        None => Ok(Vec::new()),
    }
}

/// One-round Concat KDF (NIST SP 800-56A §5.8.1 as profiled by RFC 7518);
/// a single SHA-256 block covers both AES-GCM key sizes.
fn concat_kdf(z: &[u8], alg_id: &str, apu: &[u8], apv: &[u8], key_len: usize) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(z);
    hasher.update((alg_id.len() as u32).to_be_bytes());
    hasher.update(alg_id.as_bytes());
    hasher.update((apu.len() as u32).to_be_bytes());
    hasher.update(apu);
    hasher.update((apv.len() as u32).to_be_bytes());
    hasher.update(apv);
    hasher.update(((key_len * 8) as u32).to_be_bytes());
    hasher.finalize()[..key_len].to_vec()
}

fn seal(
    enc: Algorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CapabilityError> {
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    match enc {
        Algorithm::A128Gcm => Aes128Gcm::new_from_slice(cek)
            .map_err(|_| err("bad CEK length"))?
            .encrypt(Nonce::from_slice(iv), payload)
            .map_err(|_| err("encryption failed")),
        _ => Aes256Gcm::new_from_slice(cek)
            .map_err(|_| err("bad CEK length"))?
            .encrypt(Nonce::from_slice(iv), payload)
            .map_err(|_| err("encryption failed")),
    }
}

fn open(
    enc: Algorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    sealed: &[u8],
) -> Result<Vec<u8>, CapabilityError> {
    let payload = Payload { msg: sealed, aad };
    match enc {
        Algorithm::A128Gcm => Aes128Gcm::new_from_slice(cek)
            .map_err(|_| err("bad CEK length"))?
            .decrypt(Nonce::from_slice(iv), payload)
            .map_err(|_| err("decryption failed")),
        _ => Aes256Gcm::new_from_slice(cek)
            .map_err(|_| err("bad CEK length"))?
            .decrypt(Nonce::from_slice(iv), payload)
            .map_err(|_| err("decryption failed")),
    }
}
