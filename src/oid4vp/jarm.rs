//! JARM: JWT-secured authorization responses.
//!
//! A response string is encrypted (5 segments), signed (3 segments), or
//! both (a signed JWT inside the decrypted plaintext). Anything else is
//! rejected before any crypto runs. After unwrapping, the inner parameters
//! are bound back to the original authorization request by `state`.

use base64::prelude::*;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::context::{AuthRequestResolver, CapabilityError, JoseContext};
use crate::jose::{peek_protected_header, Jwk};

#[derive(thiserror::Error, Debug)]
pub enum JarmError {
    #[error("response is neither signed nor encrypted")]
    NotSignedOrEncrypted,
    #[error("response state does not match the authorization request state")]
    StateMismatch,
    #[error("authorization error response: {error}{}", description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    ReceivedErrorResponse {
        error: String,
        description: Option<String>,
    },
    #[error("response is missing required parameter {0:?}")]
    MissingParam(&'static str),
    #[error("response is expired")]
    Expired,
    #[error("JWE protected header carries no kid")]
    MissingKid,
    #[error("no key matches kid {0:?}")]
    NoMatchingKey(String),
    #[error("response payload is not a JSON object")]
    InvalidPayload,
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// How the response was secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JarmResponseType {
    Signed,
    Encrypted,
    SignedEncrypted,
}

impl std::fmt::Display for JarmResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JarmResponseType::Signed => "signed",
            JarmResponseType::Encrypted => "encrypted",
            JarmResponseType::SignedEncrypted => "signed encrypted",
        })
    }
}

/// The unwrapped response, with the matching request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedJarmResponse {
    pub auth_request_params: Map<String, Json>,
    pub auth_response_params: Map<String, Json>,
    pub response_type: JarmResponseType,
}

/// Validates JARM responses against configured key material and the stored
/// authorization requests.
pub struct JarmVerifier<'a> {
    decryption_keys: Vec<Jwk>,
    signer_keys: Vec<Jwk>,
    jose: &'a dyn JoseContext,
    requests: &'a dyn AuthRequestResolver,
}

impl<'a> JarmVerifier<'a> {
    pub fn new(jose: &'a dyn JoseContext, requests: &'a dyn AuthRequestResolver) -> Self {
        Self {
            decryption_keys: Vec::new(),
            signer_keys: Vec::new(),
            jose,
            requests,
        }
    }

    /// Add a private key for JWE decryption; matched by `kid`.
    pub fn with_decryption_key(mut self, key: Jwk) -> Self {
        self.decryption_keys.push(key);
        self
    }

    /// Add a trusted signer key for JWS verification.
    pub fn with_signer_key(mut self, key: Jwk) -> Self {
        self.signer_keys.push(key);
        self
    }

    /// Run the decrypt-then-verify state machine over a response string.
    pub fn validate(&self, response: &str) -> Result<ValidatedJarmResponse, crate::Error> {
        let (params, response_type) = if is_jwe(response) {
            debug!("JARM response is encrypted");
            let plaintext = self.decrypt(response)?;
            match inner_jws(&plaintext) {
                Some(inner) => {
                    debug!("decrypted JARM payload is a signed JWT");
                    let params = self.verify_signed(&inner)?;
                    (params, JarmResponseType::SignedEncrypted)
                }
                None => {
                    let params: Json = serde_json::from_slice(&plaintext)
                        .map_err(|_| JarmError::InvalidPayload)?;
                    let params = params
                        .as_object()
                        .cloned()
                        .ok_or(JarmError::InvalidPayload)?;
                    check_error_params(&params)?;
                    (params, JarmResponseType::Encrypted)
                }
            }
        } else if is_jws(response) {
            debug!("JARM response is signed");
            (self.verify_signed(response)?, JarmResponseType::Signed)
        } else {
            return Err(JarmError::NotSignedOrEncrypted.into());
        };

        let auth_request_params = self.requests.request_params(&params).map_err(JarmError::from)?;
        let request_state = auth_request_params.get("state").and_then(Json::as_str);
        let response_state = params.get("state").and_then(Json::as_str);
        if request_state.is_none() || request_state != response_state {
            return Err(JarmError::StateMismatch.into());
        }

        debug!(%response_type, "JARM response validated");
        Ok(ValidatedJarmResponse {
            auth_request_params,
            auth_response_params: params,
            response_type,
        })
    }

    fn decrypt(&self, jwe: &str) -> Result<Vec<u8>, crate::Error> {
        let header = peek_protected_header(jwe)
            .map_err(|e| JarmError::Capability(CapabilityError::new("jarm", e)))?;
        let kid = header
            .get("kid")
            .and_then(Json::as_str)
            .ok_or(JarmError::MissingKid)?;
        let key = self
            .decryption_keys
            .iter()
            .find(|key| key.kid.as_deref() == Some(kid))
            .ok_or_else(|| JarmError::NoMatchingKey(kid.to_string()))?;
        Ok(self.jose.decrypt_compact(jwe, key).map_err(JarmError::from)?)
    }

    /// Verify a signed response and enforce the strict parameter schema
    /// (`iss`, `aud`, `exp`).
    fn verify_signed(&self, jws: &str) -> Result<Map<String, Json>, crate::Error> {
        let header = peek_protected_header(jws)
            .map_err(|e| JarmError::Capability(CapabilityError::new("jarm", e)))?;
        let kid = header.get("kid").and_then(Json::as_str);

        let key = match kid {
            Some(kid) => self
                .signer_keys
                .iter()
                .find(|key| key.kid.as_deref() == Some(kid))
                .ok_or_else(|| JarmError::NoMatchingKey(kid.to_string()))?,
            None => self
                .signer_keys
                .first()
                .ok_or_else(|| JarmError::NoMatchingKey(String::new()))?,
        };

        let payload = self.jose.verify_compact(jws, key).map_err(JarmError::from)?;
        let params: Json =
            serde_json::from_slice(&payload).map_err(|_| JarmError::InvalidPayload)?;
        let params = params
            .as_object()
            .cloned()
            .ok_or(JarmError::InvalidPayload)?;

        check_error_params(&params)?;

        if !params.contains_key("iss") {
            return Err(JarmError::MissingParam("iss").into());
        }
        if !params.contains_key("aud") {
            return Err(JarmError::MissingParam("aud").into());
        }
        let exp = params
            .get("exp")
            .and_then(Json::as_i64)
            .ok_or(JarmError::MissingParam("exp"))?;
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        if exp <= now {
            return Err(JarmError::Expired.into());
        }

        Ok(params)
    }
}

/// An error response short-circuits before any structural enforcement.
fn check_error_params(params: &Map<String, Json>) -> Result<(), JarmError> {
    if let Some(error) = params.get("error").and_then(Json::as_str) {
        return Err(JarmError::ReceivedErrorResponse {
            error: error.to_string(),
            description: params
                .get("error_description")
                .and_then(Json::as_str)
                .map(str::to_string),
        });
    }
    Ok(())
}

fn is_compact_with(segments: usize, input: &str) -> bool {
    let parts: Vec<&str> = input.split('.').collect();
    parts.len() == segments
        && parts
            .iter()
            .enumerate()
            // The JWE encrypted-key segment (index 1) may be empty.
            .all(|(i, part)| {
                (!part.is_empty() || (segments == 5 && i == 1))
                    && part
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            })
}

fn is_jwe(input: &str) -> bool {
    is_compact_with(5, input)
}

/// A decrypted payload counts as signed when it is a compact JWS, either
/// bare or as a JSON-encoded string.
fn inner_jws(plaintext: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(plaintext).ok()?.trim();
    if is_jws(text) {
        return Some(text.to_string());
    }
    serde_json::from_str::<Json>(text)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .filter(|candidate| is_jws(candidate))
}

fn is_jws(input: &str) -> bool {
    is_compact_with(3, input) && BASE64_URL_SAFE_NO_PAD
        .decode(input.split('.').next().unwrap_or_default())
        .is_ok()
}
