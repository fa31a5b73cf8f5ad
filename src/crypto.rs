//! Software [`CryptoContext`] on the RustCrypto stack.
//!
//! Covers the algorithm set the pack of dependencies provides natively:
//! SHA-2 digests, ES256, the HS family, P-256 ECDH with the EMacKey
//! derivation, and CSPRNG output. Anything else reports `UnsupportedAlg`
//! through a capability error; hosts with wider needs supply their own
//! context.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::{Signer, Verifier};

use crate::context::{CapabilityError, CryptoContext};
use crate::jose::{Algorithm, HashAlgorithm, Jwk, KeyError};

#[derive(Debug, Default, Clone)]
pub struct RustCryptoContext;

impl RustCryptoContext {
    /// Fresh P-256 private JWK, marked non-extractable.
    pub fn generate_p256_jwk() -> Jwk {
        let secret = p256::SecretKey::random(&mut OsRng);
        let point = secret.public_key().to_encoded_point(false);
        use base64::prelude::*;
        Jwk {
            kty: "EC".into(),
            crv: Some("P-256".into()),
            x: Some(BASE64_URL_SAFE_NO_PAD.encode(&point.as_bytes()[1..33])),
            y: Some(BASE64_URL_SAFE_NO_PAD.encode(&point.as_bytes()[33..])),
            d: Some(BASE64_URL_SAFE_NO_PAD.encode(secret.to_bytes())),
            ext: Some(false),
            ..Default::default()
        }
    }
}

/// P-256 private scalar out of a JWK.
pub(crate) fn p256_secret_from_jwk(jwk: &Jwk) -> Result<p256::SecretKey, KeyError> {
    expect_p256(jwk)?;
    let d = jwk.param_bytes("d")?;
    p256::SecretKey::from_slice(&d).map_err(|_| KeyError::InvalidParameter("d"))
}

/// P-256 public point out of a JWK.
pub(crate) fn p256_public_from_jwk(jwk: &Jwk) -> Result<p256::PublicKey, KeyError> {
    expect_p256(jwk)?;
    let x = jwk.param_bytes("x")?;
    let y = jwk.param_bytes("y")?;
    if x.len() != 32 || y.len() != 32 {
        return Err(KeyError::InvalidParameter("x"));
    }
    let point = p256::EncodedPoint::from_affine_coordinates(
        p256::FieldBytes::from_slice(&x),
        p256::FieldBytes::from_slice(&y),
        false,
    );
    p256::PublicKey::from_sec1_bytes(point.as_bytes())
        .map_err(|_| KeyError::InvalidParameter("x"))
}

fn expect_p256(jwk: &Jwk) -> Result<(), KeyError> {
    if jwk.kty != "EC" || jwk.crv.as_deref() != Some("P-256") {
        return Err(KeyError::KeyTypeMismatch {
            expected: "EC/P-256",
            found: format!("{}/{}", jwk.kty, jwk.crv.as_deref().unwrap_or("-")),
        });
    }
    Ok(())
}

fn hmac_tag(alg: Algorithm, key: &[u8], data: &[u8]) -> Vec<u8> {
    match alg {
        Algorithm::Hs256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        Algorithm::Hs384 => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key).expect("any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        Algorithm::Hs512 => {
            let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key).expect("any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        _ => unreachable!("callers dispatch HS algorithms only"),
    }
}

fn unsupported(operation: &'static str, alg: Algorithm) -> CapabilityError {
    CapabilityError::new(operation, KeyError::UnsupportedAlg(alg.name().to_string()))
}

impl CryptoContext for RustCryptoContext {
    fn digest(&self, alg: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, CapabilityError> {
        match alg {
            HashAlgorithm::Sha256 => Ok(Sha256::digest(data).to_vec()),
            HashAlgorithm::Sha384 => Ok(Sha384::digest(data).to_vec()),
            HashAlgorithm::Sha512 => Ok(Sha512::digest(data).to_vec()),
            HashAlgorithm::Sha1 => Err(CapabilityError::msg(
                "digest",
                "SHA-1 is not available for content digests",
            )),
        }
    }

    fn sign(&self, alg: Algorithm, key: &Jwk, data: &[u8]) -> Result<Vec<u8>, CapabilityError> {
        match alg {
            Algorithm::Es256 => {
                let secret = p256_secret_from_jwk(key)
                    .map_err(|e| CapabilityError::new("sign", e))?;
                let signature: Signature = SigningKey::from(&secret).sign(data);
                Ok(signature.to_bytes().to_vec())
            }
            Algorithm::Hs256 | Algorithm::Hs384 | Algorithm::Hs512 => {
                let k = key
                    .param_bytes("k")
                    .map_err(|e| CapabilityError::new("sign", e))?;
                Ok(hmac_tag(alg, &k, data))
            }
            other => Err(unsupported("sign", other)),
        }
    }

    fn verify(
        &self,
        alg: Algorithm,
        key: &Jwk,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, CapabilityError> {
        match alg {
            Algorithm::Es256 => {
                let public = p256_public_from_jwk(key)
                    .map_err(|e| CapabilityError::new("verify", e))?;
                let Ok(signature) = Signature::from_slice(signature) else {
                    return Ok(false);
                };
                Ok(VerifyingKey::from(&public).verify(data, &signature).is_ok())
            }
            Algorithm::Hs256 | Algorithm::Hs384 | Algorithm::Hs512 => {
                let k = key
                    .param_bytes("k")
                    .map_err(|e| CapabilityError::new("verify", e))?;
                let matches = match alg {
                    Algorithm::Hs256 => {
                        let mut mac =
                            <Hmac<Sha256> as Mac>::new_from_slice(&k).expect("any key length");
                        mac.update(data);
                        mac.verify_slice(signature).is_ok()
                    }
                    Algorithm::Hs384 => {
                        let mut mac =
                            <Hmac<Sha384> as Mac>::new_from_slice(&k).expect("any key length");
                        mac.update(data);
                        mac.verify_slice(signature).is_ok()
                    }
                    _ => {
                        let mut mac =
                            <Hmac<Sha512> as Mac>::new_from_slice(&k).expect("any key length");
                        mac.update(data);
                        mac.verify_slice(signature).is_ok()
                    }
                };
                Ok(matches)
            }
            other => Err(unsupported("verify", other)),
        }
    }

    fn ephemeral_mac_key(
        &self,
        private_key: &Jwk,
        public_key: &Jwk,
        session_transcript_bytes: &[u8],
    ) -> Result<[u8; 32], CapabilityError> {
        let secret = p256_secret_from_jwk(private_key)
            .map_err(|e| CapabilityError::new("calculateEphemeralMacKey", e))?;
        let public = p256_public_from_jwk(public_key)
            .map_err(|e| CapabilityError::new("calculateEphemeralMacKey", e))?;

        let shared = p256::ecdh::diffie_hellman(
            secret.to_nonzero_scalar(),
            public.as_affine(),
        );
        let salt = Sha256::digest(session_transcript_bytes);

        let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), shared.raw_secret_bytes().as_slice());
        let mut okm = [0u8; 32];
        hk.expand(b"EMacKey", &mut okm)
            .map_err(|_| CapabilityError::msg("calculateEphemeralMacKey", "HKDF expand failed"))?;
        Ok(okm)
    }

    fn random(&self, len: usize) -> Result<Vec<u8>, CapabilityError> {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CryptoContext as _;

    #[test]
    fn digest_lengths() {
        let ctx = RustCryptoContext;
        assert_eq!(ctx.digest(HashAlgorithm::Sha256, b"x").unwrap().len(), 32);
        assert_eq!(ctx.digest(HashAlgorithm::Sha384, b"x").unwrap().len(), 48);
        assert_eq!(ctx.digest(HashAlgorithm::Sha512, b"x").unwrap().len(), 64);
    }

    #[test]
    fn es256_sign_verify() {
        let ctx = RustCryptoContext;
        let private = RustCryptoContext::generate_p256_jwk();
        let public = private.to_public();

        let sig = ctx.sign(Algorithm::Es256, &private, b"message").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(ctx.verify(Algorithm::Es256, &public, b"message", &sig).unwrap());
        assert!(!ctx.verify(Algorithm::Es256, &public, b"other", &sig).unwrap());
    }

    #[test]
    fn hmac_sign_verify() {
        use base64::prelude::*;
        let ctx = RustCryptoContext;
        let key = Jwk {
            kty: "oct".into(),
            k: Some(BASE64_URL_SAFE_NO_PAD.encode([1u8; 32])),
            ..Default::default()
        };
        let tag = ctx.sign(Algorithm::Hs256, &key, b"data").unwrap();
        assert_eq!(tag.len(), 32);
        assert!(ctx.verify(Algorithm::Hs256, &key, b"data", &tag).unwrap());
        assert!(!ctx.verify(Algorithm::Hs256, &key, b"tampered", &tag).unwrap());
    }

    #[test]
    fn emac_key_agrees_for_both_parties() {
        let ctx = RustCryptoContext;
        let device = RustCryptoContext::generate_p256_jwk();
        let reader = RustCryptoContext::generate_p256_jwk();
        let transcript = b"session transcript bytes";

        let device_side = ctx
            .ephemeral_mac_key(&device, &reader.to_public(), transcript)
            .unwrap();
        let reader_side = ctx
            .ephemeral_mac_key(&reader, &device.to_public(), transcript)
            .unwrap();
        assert_eq!(device_side, reader_side);

        let other = ctx
            .ephemeral_mac_key(&device, &reader.to_public(), b"different transcript")
            .unwrap();
        assert_ne!(device_side, other);
    }

    #[test]
    fn unsupported_algorithms_surface() {
        let ctx = RustCryptoContext;
        let key = RustCryptoContext::generate_p256_jwk();
        assert!(ctx.sign(Algorithm::Ps256, &key, b"data").is_err());
        assert!(ctx.verify(Algorithm::EdDsa, &key, b"data", &[]).is_err());
    }

    #[test]
    fn random_is_fresh() {
        let ctx = RustCryptoContext;
        let a = ctx.random(16).unwrap();
        let b = ctx.random(16).unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
