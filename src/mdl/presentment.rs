//! Device-response assembly: selective disclosure under a presentation
//! definition, then device authentication by signature or ECDH-derived MAC.

use std::collections::HashSet;

use base64::prelude::*;
use tracing::debug;

use crate::cbor::{DataItem, Value};
use crate::context::CryptoContext;
use crate::cose::{self, label, CoseMac0, CoseSign1, HeaderMap};
use crate::jose::Jwk;
use crate::oid4vp::PresentationDefinition;

use super::{
    device_authentication_bytes, DeviceAuth, DeviceNameSpaces, DeviceResponse, DeviceSigned,
    Document, IssuerSigned, IssuerSignedItem, SessionTranscript, MDL_NAMESPACE,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BuilderError {
    #[error("presentation definition has no input descriptors")]
    EmptyPresentationDefinition,
    #[error("duplicate input descriptor id {0:?}")]
    DuplicateInputDescriptorId(String),
    #[error("handover has not been set")]
    HandoverNotSet,
    #[error("no signing or MAC key has been set")]
    KeyNotSet,
    #[error("no input descriptor matches doc type {0:?}")]
    DocTypeNotFound(String),
    #[error("field path {0:?} is not of the form $['namespace']['element']")]
    InvalidFieldPath(String),
    #[error("doc type has not been set")]
    DocTypeNotSet,
    #[error("validity info has not been set")]
    ValidityNotSet,
    #[error("no elements to sign")]
    EmptyNamespaces,
}

enum DeviceKeySource {
    Signature { key: Jwk, alg: cose::Algorithm },
    Mac { device_key: Jwk, reader_key: Jwk },
}

/// Consuming builder for a [`DeviceResponse`]; required inputs are checked
/// when [`build`](DeviceResponseBuilder::build) runs.
pub struct DeviceResponseBuilder {
    document: Document,
    presentation_definition: Option<PresentationDefinition>,
    handover: Option<SessionTranscript>,
    key: Option<DeviceKeySource>,
}

impl DeviceResponseBuilder {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            presentation_definition: None,
            handover: None,
            key: None,
        }
    }

    pub fn presentation_definition(mut self, definition: PresentationDefinition) -> Self {
        self.presentation_definition = Some(definition);
        self
    }

    pub fn handover(mut self, session_transcript: SessionTranscript) -> Self {
        self.handover = Some(session_transcript);
        self
    }

    /// Authenticate with a device signature.
    pub fn sign_with(mut self, key: Jwk, alg: cose::Algorithm) -> Self {
        self.key = Some(DeviceKeySource::Signature { key, alg });
        self
    }

    /// Authenticate with a MAC derived from ECDH with the reader's
    /// ephemeral key.
    pub fn mac_with(mut self, device_key: Jwk, reader_key: Jwk) -> Self {
        self.key = Some(DeviceKeySource::Mac {
            device_key,
            reader_key,
        });
        self
    }

    pub fn build(self, crypto: &dyn CryptoContext) -> Result<DeviceResponse, crate::Error> {
        let definition = self
            .presentation_definition
            .filter(|d| !d.input_descriptors.is_empty())
            .ok_or(BuilderError::EmptyPresentationDefinition)?;

        let mut seen = HashSet::new();
        for descriptor in &definition.input_descriptors {
            if !seen.insert(descriptor.id.as_str()) {
                return Err(
                    BuilderError::DuplicateInputDescriptorId(descriptor.id.clone()).into(),
                );
            }
        }

        let session_transcript = self.handover.ok_or(BuilderError::HandoverNotSet)?;
        let key = self.key.ok_or(BuilderError::KeyNotSet)?;

        let doc_type = self.document.doc_type.clone();
        let descriptor = definition
            .input_descriptors
            .iter()
            .find(|descriptor| descriptor.id == doc_type)
            .ok_or_else(|| BuilderError::DocTypeNotFound(doc_type.clone()))?;

        let mut disclosed: indexmap::IndexMap<String, Vec<DataItem<IssuerSignedItem>>> =
            indexmap::IndexMap::new();
        for field in &descriptor.constraints.fields {
            for path in &field.path {
                let (name_space, element) = parse_field_path(path)?;
                let Some(item) =
                    select_item(&self.document.issuer_signed, &name_space, &element)?
                else {
                    debug!(name_space = %name_space, element = %element, "requested element not disclosed");
                    continue;
                };
                let entries = disclosed.entry(name_space).or_default();
                if !entries.contains(&item) {
                    entries.push(item);
                }
            }
        }

        let device_name_spaces = DataItem::new(DeviceNameSpaces::default());
        let authentication_bytes =
            device_authentication_bytes(&session_transcript, &doc_type, &device_name_spaces);

        let device_auth = match key {
            DeviceKeySource::Signature { key, alg } => {
                let mut unprotected = HeaderMap::new();
                if let Some(kid) = &key.kid {
                    unprotected.insert(label::KID, Value::Bytes(kid.as_bytes().to_vec()));
                }
                let signature = CoseSign1::sign_detached(
                    HeaderMap::new(),
                    unprotected,
                    &authentication_bytes,
                    &[],
                    &key,
                    alg,
                    crypto,
                )?;
                DeviceAuth {
                    device_signature: Some(signature),
                    device_mac: None,
                }
            }
            DeviceKeySource::Mac {
                device_key,
                reader_key,
            } => {
                let mac_key = crypto.ephemeral_mac_key(
                    &device_key,
                    &reader_key,
                    &session_transcript.bytes(),
                )?;
                let mac_jwk = Jwk {
                    kty: "oct".into(),
                    k: Some(BASE64_URL_SAFE_NO_PAD.encode(mac_key)),
                    ..Default::default()
                };
                let mac = CoseMac0::mac_detached(
                    HeaderMap::new(),
                    HeaderMap::new(),
                    &authentication_bytes,
                    &[],
                    &mac_jwk,
                    cose::Algorithm::Hmac256,
                    crypto,
                )?;
                DeviceAuth {
                    device_signature: None,
                    device_mac: Some(mac),
                }
            }
        };

        Ok(DeviceResponse {
            version: DeviceResponse::VERSION.into(),
            documents: vec![Document {
                doc_type,
                issuer_signed: IssuerSigned {
                    name_spaces: disclosed,
                    issuer_auth: self.document.issuer_signed.issuer_auth.clone(),
                },
                device_signed: Some(DeviceSigned {
                    name_spaces: device_name_spaces,
                    device_auth,
                }),
            }],
            status: 0,
        })
    }
}

/// `$['namespace']['element']` into its two bracket groups.
fn parse_field_path(path: &str) -> Result<(String, String), BuilderError> {
    let invalid = || BuilderError::InvalidFieldPath(path.to_string());

    let rest = path.strip_prefix("$").ok_or_else(invalid)?;
    let mut groups = Vec::with_capacity(2);
    let mut rest = rest;
    while !rest.is_empty() {
        let inner = rest
            .strip_prefix("['")
            .and_then(|r| r.split_once("']"))
            .ok_or_else(invalid)?;
        groups.push(inner.0.to_string());
        rest = inner.1;
    }
    if groups.len() != 2 || groups.iter().any(String::is_empty) {
        return Err(invalid());
    }
    let element = groups.pop().ok_or_else(invalid)?;
    let name_space = groups.pop().ok_or_else(invalid)?;
    Ok((name_space, element))
}

/// Resolve a requested element to a disclosable item, applying the
/// ISO 18013-5 §7.2.5 rules for `age_over_NN` requests: the smallest
/// `age_over_k ≥ NN` that is true, else the largest `age_over_k ≤ NN` that
/// is false, else nothing.
fn select_item(
    issuer_signed: &IssuerSigned,
    name_space: &str,
    element: &str,
) -> Result<Option<DataItem<IssuerSignedItem>>, crate::Error> {
    if name_space == MDL_NAMESPACE {
        if let Some(requested_age) = parse_age_over(element) {
            return age_over_item(issuer_signed, requested_age);
        }
    }
    Ok(issuer_signed.item(name_space, element).cloned())
}

fn parse_age_over(element: &str) -> Option<u8> {
    let digits = element.strip_prefix("age_over_")?;
    if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn age_over_item(
    issuer_signed: &IssuerSigned,
    requested_age: u8,
) -> Result<Option<DataItem<IssuerSignedItem>>, crate::Error> {
    let Some(items) = issuer_signed.name_spaces.get(MDL_NAMESPACE) else {
        return Ok(None);
    };

    let mut attestations = Vec::new();
    for item in items {
        let parsed = item.parsed()?;
        if let (Some(age), Some(value)) = (
            parse_age_over(&parsed.element_identifier),
            parsed.element_value.as_bool(),
        ) {
            attestations.push((age, value, item));
        }
    }
    attestations.sort_by_key(|(age, _, _)| *age);

    let positive = attestations
        .iter()
        .filter(|(age, value, _)| *value && *age >= requested_age)
        .min_by_key(|(age, _, _)| *age);
    if let Some((_, _, item)) = positive {
        return Ok(Some((*item).clone()));
    }

    let negative = attestations
        .iter()
        .filter(|(age, value, _)| !*value && *age <= requested_age)
        .max_by_key(|(age, _, _)| *age);
    Ok(negative.map(|(_, _, item)| (*item).clone()))
}
