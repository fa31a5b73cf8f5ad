//! Software [`X509Context`] on `x509-cert`.
//!
//! Chain validation walks issuer/subject linkage, verifies each ES256
//! signature with the issuer's public key, and checks validity windows and
//! the anchor's certificate-signing key usage.

use p256::ecdsa::VerifyingKey;
use p256::pkcs8::DecodePublicKey;
use signature::Verifier;
use time::OffsetDateTime;
use x509_cert::der::asn1::{Ia5StringRef, PrintableStringRef, Utf8StringRef};
use x509_cert::der::oid::db::rfc4519;
use x509_cert::der::oid::ObjectIdentifier;
use x509_cert::der::{Decode, Encode};
use x509_cert::ext::pkix::KeyUsage;
use x509_cert::Certificate;

use crate::context::{CapabilityError, CertificateData, X509Context};
use crate::jose::{import, Jwk};

#[derive(Debug, Default, Clone)]
pub struct XCertContext;

fn err(cause: impl Into<String>) -> CapabilityError {
    CapabilityError::msg("x509", cause)
}

fn parse(der: &[u8]) -> Result<Certificate, CapabilityError> {
    Certificate::from_der(der).map_err(|e| err(format!("certificate does not parse: {e}")))
}

fn check_validity(certificate: &Certificate) -> Result<(), CapabilityError> {
    let validity = &certificate.tbs_certificate.validity;
    let now = std::time::SystemTime::now();
    if now < validity.not_before.to_system_time() || now > validity.not_after.to_system_time() {
        return Err(err(format!(
            "certificate outside its validity window ({} .. {})",
            validity.not_before, validity.not_after
        )));
    }
    Ok(())
}

/// Verify that `issuer` signed `subject` (ES256 over the TBS bytes).
fn check_link(subject: &Certificate, issuer: &Certificate) -> Result<(), CapabilityError> {
    if issuer.tbs_certificate.subject != subject.tbs_certificate.issuer {
        return Err(err(format!(
            "issuer mismatch: expected {}, found {}",
            subject.tbs_certificate.issuer, issuer.tbs_certificate.subject
        )));
    }

    let spki = issuer
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| err(format!("issuer SPKI does not re-encode: {e}")))?;
    let verifying_key = VerifyingKey::from_public_key_der(&spki)
        .map_err(|_| err("issuer key is not a P-256 key"))?;

    let tbs = subject
        .tbs_certificate
        .to_der()
        .map_err(|e| err(format!("tbsCertificate does not re-encode: {e}")))?;
    let signature_bytes = subject
        .signature
        .as_bytes()
        .ok_or_else(|| err("certificate signature has unused bits"))?;
    let signature = p256::ecdsa::Signature::from_der(signature_bytes)
        .map_err(|_| err("certificate signature is not DER ECDSA"))?;

    verifying_key
        .verify(&tbs, &signature)
        .map_err(|_| err("certificate signature does not verify"))
}

fn key_usage(certificate: &Certificate) -> Result<Option<KeyUsage>, CapabilityError> {
    let Some(extensions) = &certificate.tbs_certificate.extensions else {
        return Ok(None);
    };
    extensions
        .iter()
        .find(|ext| ext.extn_id == ObjectIdentifier::new_unwrap("2.5.29.15"))
        .map(|ext| {
            KeyUsage::from_der(ext.extn_value.as_bytes())
                .map_err(|e| err(format!("key usage does not parse: {e}")))
        })
        .transpose()
}

fn dn_string(value: &x509_cert::der::Any) -> Option<String> {
    if let Ok(s) = Utf8StringRef::try_from(value) {
        return Some(s.to_string());
    }
    if let Ok(s) = PrintableStringRef::try_from(value) {
        return Some(s.to_string());
    }
    if let Ok(s) = Ia5StringRef::try_from(value) {
        return Some(s.to_string());
    }
    None
}

fn subject_attribute(certificate: &Certificate, oid: ObjectIdentifier) -> Option<String> {
    certificate
        .tbs_certificate
        .subject
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == oid)
        .and_then(|atv| dn_string(&atv.value))
}

impl X509Context for XCertContext {
    fn validate_chain(
        &self,
        certificates: &[Vec<u8>],
        trust_anchors: &[Vec<u8>],
    ) -> Result<(), CapabilityError> {
        if certificates.is_empty() {
            return Err(err("empty certificate chain"));
        }
        if trust_anchors.is_empty() {
            return Err(err("no trust anchors configured"));
        }

        let chain: Vec<Certificate> = certificates
            .iter()
            .map(|der| parse(der))
            .collect::<Result<_, _>>()?;
        for cert in &chain {
            check_validity(cert)?;
        }
        for pair in chain.windows(2) {
            check_link(&pair[0], &pair[1])?;
        }

        let leaf_of_anchor = chain.last().expect("chain is non-empty");
        let anchors: Vec<Certificate> = trust_anchors
            .iter()
            .map(|der| parse(der))
            .collect::<Result<_, _>>()?;
        let anchor = anchors
            .iter()
            .find(|anchor| {
                anchor.tbs_certificate.subject == leaf_of_anchor.tbs_certificate.issuer
            })
            .ok_or_else(|| {
                err(format!(
                    "no trust anchor matches issuer {}",
                    leaf_of_anchor.tbs_certificate.issuer
                ))
            })?;

        check_validity(anchor)?;
        if let Some(usage) = key_usage(anchor)? {
            if !usage.key_cert_sign() {
                return Err(err("trust anchor cannot sign certificates"));
            }
        }
        check_link(leaf_of_anchor, anchor)
    }

    fn public_key_jwk(&self, certificate: &[u8]) -> Result<Jwk, CapabilityError> {
        let spki = import::spki_from_x509(certificate)
            .map_err(|e| CapabilityError::new("x509", e))?;
        import::jwk_from_spki(&spki).map_err(|e| CapabilityError::new("x509", e))
    }

    fn issuer_name(&self, certificate: &[u8]) -> Result<String, CapabilityError> {
        Ok(parse(certificate)?.tbs_certificate.issuer.to_string())
    }

    fn certificate_data(&self, certificate: &[u8]) -> Result<CertificateData, CapabilityError> {
        let certificate = parse(certificate)?;
        Ok(CertificateData {
            common_name: subject_attribute(&certificate, rfc4519::CN),
            country: subject_attribute(&certificate, rfc4519::C),
            state_or_province: subject_attribute(&certificate, rfc4519::ST),
            organization: subject_attribute(&certificate, rfc4519::O),
        })
    }

    fn validity(
        &self,
        certificate: &[u8],
    ) -> Result<(OffsetDateTime, OffsetDateTime), CapabilityError> {
        let certificate = parse(certificate)?;
        let validity = &certificate.tbs_certificate.validity;
        Ok((
            OffsetDateTime::from(validity.not_before.to_system_time()),
            OffsetDateTime::from(validity.not_after.to_system_time()),
        ))
    }
}
