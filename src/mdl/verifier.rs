//! Multi-stage verification of a [`DeviceResponse`].
//!
//! Every check lands as a [`VerificationAssessment`] in a caller-supplied
//! sink; a failing check never aborts the run. Only parse-level faults,
//! missing trust anchors and broken crypto capabilities surface as errors.

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::context::{CryptoContext, X509Context};
use crate::jose::Jwk;

use super::{
    device_authentication_bytes, issuer_item_digest, DeviceResponse, Document,
    MobileSecurityObject, SessionTranscript, MDL_NAMESPACE,
};

#[derive(thiserror::Error, Debug)]
pub enum VerifierError {
    #[error("chain validation is enabled but no trust anchors are configured")]
    NoTrustAnchors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckCategory {
    DocumentFormat,
    IssuerAuth,
    DeviceAuth,
    DataIntegrity,
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CheckCategory::DocumentFormat => "DOCUMENT_FORMAT",
            CheckCategory::IssuerAuth => "ISSUER_AUTH",
            CheckCategory::DeviceAuth => "DEVICE_AUTH",
            CheckCategory::DataIntegrity => "DATA_INTEGRITY",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed,
}

/// One verification check outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationAssessment {
    pub category: CheckCategory,
    pub check: String,
    pub status: CheckStatus,
    pub reason: Option<String>,
}

impl VerificationAssessment {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }
}

/// Sink receiving assessments in emission order.
pub type AssessmentSink<'a> = &'a mut dyn FnMut(VerificationAssessment);

/// Inputs that depend on the presentation session rather than the response.
pub struct VerifyParams<'a> {
    pub session_transcript: &'a SessionTranscript,
    /// Reader's ephemeral *private* key; required to check MAC device auth.
    pub reader_ephemeral_key: Option<&'a Jwk>,
    pub now: OffsetDateTime,
}

/// Verifier configured with trust anchors (DER certificates).
pub struct Verifier {
    trust_anchors: Vec<Vec<u8>>,
    validate_chain: bool,
}

struct Emitter<'a, 'b> {
    sink: &'a mut (dyn FnMut(VerificationAssessment) + 'b),
    category: CheckCategory,
}

impl Emitter<'_, '_> {
    fn pass(&mut self, check: impl Into<String>) {
        (self.sink)(VerificationAssessment {
            category: self.category,
            check: check.into(),
            status: CheckStatus::Passed,
            reason: None,
        });
    }

    fn fail(&mut self, check: impl Into<String>, reason: impl Into<String>) {
        let check = check.into();
        let reason = reason.into();
        warn!(category = %self.category, %check, %reason, "verification check failed");
        (self.sink)(VerificationAssessment {
            category: self.category,
            check,
            status: CheckStatus::Failed,
            reason: Some(reason),
        });
    }

    fn check(&mut self, check: impl Into<String>, ok: bool, reason: impl Into<String>) {
        if ok {
            self.pass(check);
        } else {
            self.fail(check, reason);
        }
    }
}

impl Verifier {
    pub fn new(trust_anchors: Vec<Vec<u8>>) -> Self {
        Self {
            trust_anchors,
            validate_chain: true,
        }
    }

    /// Skip certificate-chain validation; the remaining issuer-auth checks
    /// still run.
    pub fn without_chain_validation(mut self) -> Self {
        self.validate_chain = false;
        self
    }

    /// Verify a whole response. Assessments stream into `sink` per document,
    /// category order preserved within each document.
    pub fn verify(
        &self,
        response: &DeviceResponse,
        params: &VerifyParams<'_>,
        crypto: &dyn CryptoContext,
        x509: &dyn X509Context,
        sink: AssessmentSink<'_>,
    ) -> Result<(), crate::Error> {
        let mut format = Emitter {
            sink: &mut *sink,
            category: CheckCategory::DocumentFormat,
        };
        // Presence and the version floor were enforced during parsing; a
        // response value in hand has passed both.
        format.pass("version present");
        format.pass("version is at least 1.0");
        format.check(
            "documents present",
            !response.documents.is_empty(),
            "response contains no documents",
        );

        drop(format);
        for document in &response.documents {
            self.verify_document(document, params, crypto, x509, &mut *sink)?;
        }
        Ok(())
    }

    /// Verify a single document: issuer auth, device auth, data integrity.
    pub fn verify_document(
        &self,
        document: &Document,
        params: &VerifyParams<'_>,
        crypto: &dyn CryptoContext,
        x509: &dyn X509Context,
        sink: AssessmentSink<'_>,
    ) -> Result<(), crate::Error> {
        debug!(doc_type = %document.doc_type, "verifying document");
        let mso = document.issuer_signed.mobile_security_object()?;

        let ds_certificate =
            self.issuer_auth_checks(document, &mso, params, crypto, x509, &mut *sink)?;
        self.device_auth_checks(document, &mso, params, crypto, &mut *sink)?;
        self.data_integrity_checks(
            document,
            &mso,
            ds_certificate.as_deref(),
            crypto,
            x509,
            sink,
        )?;
        Ok(())
    }

    /// Collect-into-a-vector view of [`verify`](Self::verify).
    pub fn verify_collect(
        &self,
        response: &DeviceResponse,
        params: &VerifyParams<'_>,
        crypto: &dyn CryptoContext,
        x509: &dyn X509Context,
    ) -> Result<Vec<VerificationAssessment>, crate::Error> {
        let mut assessments = Vec::new();
        self.verify(response, params, crypto, x509, &mut |assessment| {
            assessments.push(assessment)
        })?;
        Ok(assessments)
    }

    fn issuer_auth_checks(
        &self,
        document: &Document,
        mso: &MobileSecurityObject,
        params: &VerifyParams<'_>,
        crypto: &dyn CryptoContext,
        x509: &dyn X509Context,
        sink: AssessmentSink<'_>,
    ) -> Result<Option<Vec<u8>>, crate::Error> {
        let mut emit = Emitter {
            sink,
            category: CheckCategory::IssuerAuth,
        };
        let issuer_auth = &document.issuer_signed.issuer_auth;

        let chain = match issuer_auth.x5chain() {
            Ok(Some(chain)) if !chain.is_empty() => chain,
            Ok(_) => {
                emit.fail("issuer certificate present", "issuerAuth carries no x5chain");
                return Ok(None);
            }
            Err(e) => {
                emit.fail("issuer certificate present", e.to_string());
                return Ok(None);
            }
        };
        emit.pass("issuer certificate present");

        match issuer_auth.alg() {
            Ok(_) => emit.pass("issuer auth algorithm supported"),
            Err(e) => {
                emit.fail("issuer auth algorithm supported", e.to_string());
                return Ok(Some(chain[0].clone()));
            }
        }

        if self.validate_chain {
            if self.trust_anchors.is_empty() {
                return Err(VerifierError::NoTrustAnchors.into());
            }
            match x509.validate_chain(&chain, &self.trust_anchors) {
                Ok(()) => emit.pass("certificate chain trusted"),
                Err(e) => emit.fail("certificate chain trusted", e.to_string()),
            }
        }

        let ds_certificate = chain[0].clone();
        match x509.public_key_jwk(&ds_certificate) {
            Ok(ds_key) => match issuer_auth.verify(&ds_key, None, None, crypto) {
                Ok(()) => emit.pass("issuer signature valid"),
                Err(crate::cose::CoseError::Capability(e)) => return Err(e.into()),
                Err(e) => emit.fail("issuer signature valid", e.to_string()),
            },
            Err(e) => emit.fail("issuer signature valid", e.to_string()),
        }

        match x509.validity(&ds_certificate) {
            Ok((not_before, not_after)) => {
                emit.check(
                    "MSO signed within certificate validity",
                    mso.validity_info.signed >= not_before
                        && mso.validity_info.signed <= not_after,
                    format!(
                        "signed {} outside certificate validity {not_before} .. {not_after}",
                        mso.validity_info.signed
                    ),
                );
            }
            Err(e) => emit.fail("MSO signed within certificate validity", e.to_string()),
        }

        emit.check(
            "MSO currently valid",
            params.now >= mso.validity_info.valid_from
                && params.now <= mso.validity_info.valid_until,
            format!(
                "now {} outside MSO validity {} .. {}",
                params.now, mso.validity_info.valid_from, mso.validity_info.valid_until
            ),
        );

        match x509.certificate_data(&ds_certificate) {
            Ok(data) => emit.check(
                "issuer country present",
                data.country.is_some(),
                "DS certificate subject carries no countryName",
            ),
            Err(e) => emit.fail("issuer country present", e.to_string()),
        }

        Ok(Some(ds_certificate))
    }

    fn device_auth_checks(
        &self,
        document: &Document,
        mso: &MobileSecurityObject,
        params: &VerifyParams<'_>,
        crypto: &dyn CryptoContext,
        sink: AssessmentSink<'_>,
    ) -> Result<(), crate::Error> {
        let mut emit = Emitter {
            sink,
            category: CheckCategory::DeviceAuth,
        };

        let Some(device_signed) = &document.device_signed else {
            emit.fail("device auth present", "document carries no deviceSigned");
            return Ok(());
        };

        let auth = &device_signed.device_auth;
        match (&auth.device_signature, &auth.device_mac) {
            (Some(_), Some(_)) => {
                emit.fail(
                    "exactly one device auth method",
                    "both deviceSignature and deviceMac are present",
                );
                return Ok(());
            }
            (None, None) => {
                emit.fail(
                    "exactly one device auth method",
                    "neither deviceSignature nor deviceMac is present",
                );
                return Ok(());
            }
            _ => emit.pass("exactly one device auth method"),
        }

        let authentication_bytes = device_authentication_bytes(
            params.session_transcript,
            &document.doc_type,
            &device_signed.name_spaces,
        );

        if let Some(signature) = &auth.device_signature {
            let device_key = mso.device_key_info.device_key.to_jwk();
            match signature.verify(&device_key, None, Some(&authentication_bytes), crypto) {
                Ok(()) => emit.pass("device signature valid"),
                Err(crate::cose::CoseError::Capability(e)) => return Err(e.into()),
                Err(e) => emit.fail("device signature valid", e.to_string()),
            }
        }

        if let Some(mac) = &auth.device_mac {
            match mac.alg() {
                Ok(crate::cose::Algorithm::Hmac256) => {}
                _ => {
                    emit.fail(
                        "device MAC algorithm",
                        "Device MAC must use alg 5 (HMAC 256/256)",
                    );
                    return Ok(());
                }
            }
            let Some(reader_key) = params.reader_ephemeral_key else {
                emit.fail(
                    "device MAC valid",
                    "reader ephemeral private key not provided",
                );
                return Ok(());
            };

            let device_key = mso.device_key_info.device_key.to_jwk();
            let mac_key = crypto.ephemeral_mac_key(
                reader_key,
                &device_key,
                &params.session_transcript.bytes(),
            )?;
            let mac_jwk = Jwk {
                kty: "oct".into(),
                k: Some({
                    use base64::prelude::*;
                    BASE64_URL_SAFE_NO_PAD.encode(mac_key)
                }),
                ..Default::default()
            };
            match mac.verify(&mac_jwk, None, Some(&authentication_bytes), crypto) {
                Ok(()) => emit.pass("device MAC valid"),
                Err(crate::cose::CoseError::Capability(e)) => return Err(e.into()),
                Err(e) => emit.fail("device MAC valid", e.to_string()),
            }
        }

        Ok(())
    }

    fn data_integrity_checks(
        &self,
        document: &Document,
        mso: &MobileSecurityObject,
        ds_certificate: Option<&[u8]>,
        crypto: &dyn CryptoContext,
        x509: &dyn X509Context,
        sink: AssessmentSink<'_>,
    ) -> Result<(), crate::Error> {
        let mut emit = Emitter {
            sink,
            category: CheckCategory::DataIntegrity,
        };

        // Parsing already pinned the algorithm to the supported set.
        emit.pass("digest algorithm supported");

        for (name_space, items) in &document.issuer_signed.name_spaces {
            let Some(expected_digests) = mso.value_digests.get(name_space) else {
                emit.fail(
                    format!("digests present for {name_space}"),
                    format!("MSO carries no valueDigests for {name_space}"),
                );
                continue;
            };
            emit.pass(format!("digests present for {name_space}"));

            for item in items {
                let parsed = item.parsed()?;
                let identifier = parsed.element_identifier.clone();
                let digest = issuer_item_digest(crypto, mso.digest_algorithm, item)?;
                match expected_digests.get(&parsed.digest_id) {
                    Some(expected) if *expected == digest => {
                        emit.pass(format!("digest match for {identifier}"));
                    }
                    Some(_) => emit.fail(
                        format!("digest match for {identifier}"),
                        format!("{identifier} does not hash to the digest in the MSO"),
                    ),
                    None => emit.fail(
                        format!("digest match for {identifier}"),
                        format!(
                            "digest ID {} for {identifier} is absent from the MSO",
                            parsed.digest_id
                        ),
                    ),
                }
            }
        }

        self.mdl_country_checks(document, ds_certificate, x509, &mut emit)?;
        Ok(())
    }

    /// The MDL namespace couples disclosed issuing attributes to the DS
    /// certificate subject.
    fn mdl_country_checks(
        &self,
        document: &Document,
        ds_certificate: Option<&[u8]>,
        x509: &dyn X509Context,
        emit: &mut Emitter<'_, '_>,
    ) -> Result<(), crate::Error> {
        let disclosed = |element: &str| -> Result<Option<String>, crate::Error> {
            match document.issuer_signed.item(MDL_NAMESPACE, element) {
                Some(item) => Ok(item
                    .parsed()?
                    .element_value
                    .as_text()
                    .map(str::to_string)),
                None => Ok(None),
            }
        };

        let issuing_country = disclosed("issuing_country")?;
        let issuing_jurisdiction = disclosed("issuing_jurisdiction")?;
        if issuing_country.is_none() && issuing_jurisdiction.is_none() {
            return Ok(());
        }

        let Some(ds_certificate) = ds_certificate else {
            emit.fail(
                "issuing_country matches certificate",
                "no DS certificate to compare against",
            );
            return Ok(());
        };
        let data = match x509.certificate_data(ds_certificate) {
            Ok(data) => data,
            Err(e) => {
                emit.fail("issuing_country matches certificate", e.to_string());
                return Ok(());
            }
        };

        if let Some(country) = issuing_country {
            emit.check(
                "issuing_country matches certificate",
                data.country.as_deref() == Some(country.as_str()),
                format!(
                    "issuing_country {country:?} does not match certificate countryName {:?}",
                    data.country
                ),
            );
        }
        if let Some(jurisdiction) = issuing_jurisdiction {
            emit.check(
                "issuing_jurisdiction matches certificate",
                data.state_or_province.as_deref() == Some(jurisdiction.as_str()),
                format!(
                    "issuing_jurisdiction {jurisdiction:?} does not match certificate \
                     stateOrProvinceName {:?}",
                    data.state_or_province
                ),
            );
        }
        Ok(())
    }
}

/// Convenience predicate over a collected run.
pub fn all_passed(assessments: &[VerificationAssessment]) -> bool {
    assessments.iter().all(VerificationAssessment::passed)
}
