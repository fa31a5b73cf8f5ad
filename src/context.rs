//! Host capabilities.
//!
//! The core performs no I/O and ships no raw-crypto primitives of its own:
//! hashing, signing, certificate validation and JOSE envelope operations are
//! reached through these traits, injected by reference into the operations
//! that need them. In-crate software implementations live in [`crate::crypto`],
//! [`crate::x509`] and [`crate::jose::compact`].

use serde_json::{Map, Value as Json};
use time::OffsetDateTime;

use crate::jose::{Algorithm, HashAlgorithm, Jwk};

/// Failure inside a host capability, wrapping the host's own cause.
#[derive(thiserror::Error, Debug)]
#[error("{operation}: {cause}")]
pub struct CapabilityError {
    operation: &'static str,
    #[source]
    cause: Box<dyn std::error::Error + Send + Sync>,
}

impl CapabilityError {
    pub fn new(
        operation: &'static str,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            operation,
            cause: Box::new(cause),
        }
    }

    pub fn msg(operation: &'static str, cause: impl Into<String>) -> Self {
        Self {
            operation,
            cause: cause.into().into(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

/// Raw cryptographic operations.
pub trait CryptoContext: Send + Sync {
    fn digest(&self, alg: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, CapabilityError>;

    fn sign(&self, alg: Algorithm, key: &Jwk, data: &[u8]) -> Result<Vec<u8>, CapabilityError>;

    fn verify(
        &self,
        alg: Algorithm,
        key: &Jwk,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, CapabilityError>;

    /// ECDH over the two keys, then HKDF-SHA-256 with
    /// salt = SHA-256(session transcript bytes) and info = `"EMacKey"`.
    fn ephemeral_mac_key(
        &self,
        private_key: &Jwk,
        public_key: &Jwk,
        session_transcript_bytes: &[u8],
    ) -> Result<[u8; 32], CapabilityError>;

    /// CSPRNG output of the requested length.
    fn random(&self, len: usize) -> Result<Vec<u8>, CapabilityError>;
}

/// Subject fields extracted from a certificate's distinguished name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateData {
    pub common_name: Option<String>,
    pub country: Option<String>,
    pub state_or_province: Option<String>,
    pub organization: Option<String>,
}

/// X.509 operations, over DER-encoded certificates.
pub trait X509Context: Send + Sync {
    fn validate_chain(
        &self,
        certificates: &[Vec<u8>],
        trust_anchors: &[Vec<u8>],
    ) -> Result<(), CapabilityError>;

    fn public_key_jwk(&self, certificate: &[u8]) -> Result<Jwk, CapabilityError>;

    fn issuer_name(&self, certificate: &[u8]) -> Result<String, CapabilityError>;

    fn certificate_data(&self, certificate: &[u8]) -> Result<CertificateData, CapabilityError>;

    fn validity(
        &self,
        certificate: &[u8],
    ) -> Result<(OffsetDateTime, OffsetDateTime), CapabilityError>;
}

/// Options for compact JWE construction.
#[derive(Debug, Clone, Default)]
pub struct JweOptions {
    /// Agreement PartyUInfo, raw value (base64url-encoded into the header).
    pub apu: Option<String>,
    /// Agreement PartyVInfo, raw value.
    pub apv: Option<String>,
    pub kid: Option<String>,
}

/// JOSE envelope operations over compact serialisations.
pub trait JoseContext: Send + Sync {
    fn encrypt_compact(
        &self,
        claims: &Json,
        key: &Jwk,
        alg: Algorithm,
        enc: Algorithm,
        options: &JweOptions,
    ) -> Result<String, CapabilityError>;

    /// Returns the decrypted plaintext.
    fn decrypt_compact(&self, jwe: &str, key: &Jwk) -> Result<Vec<u8>, CapabilityError>;

    fn sign_compact(
        &self,
        claims: &Json,
        key: &Jwk,
        alg: Algorithm,
    ) -> Result<String, CapabilityError>;

    /// Returns the payload after signature verification.
    fn verify_compact(&self, jws: &str, key: &Jwk) -> Result<Vec<u8>, CapabilityError>;

    fn import_jwk(&self, json: &str) -> Result<Jwk, CapabilityError>;
}

/// Lookup of the original authorization request for a JARM response,
/// keyed by the response's `state` parameter.
pub trait AuthRequestResolver: Send + Sync {
    fn request_params(
        &self,
        response_params: &Map<String, Json>,
    ) -> Result<Map<String, Json>, CapabilityError>;
}
