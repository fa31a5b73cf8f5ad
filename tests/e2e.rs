//! End-to-end flows: issue → present → verify, and the JARM envelope
//! variants, all against the software contexts.

use std::time::Duration;

use anyhow::Result;
use base64::prelude::*;
use p256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use serde_json::{json, Map, Value as Json};
use sha1::{Digest, Sha1};
use time::macros::datetime;
use time::OffsetDateTime;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::asn1::OctetString;
use x509_cert::der::Encode;
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, KeyUsage, KeyUsages, SubjectKeyIdentifier};
use x509_cert::name::Name;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate;

use mdoc_core::cbor::Value;
use mdoc_core::context::{AuthRequestResolver, CapabilityError, JoseContext, JweOptions};
use mdoc_core::cose::{self, CoseKey, CoseMac0, Curve, HeaderMap, KeyType};
use mdoc_core::crypto::RustCryptoContext;
use mdoc_core::jose::{import, Algorithm, Jwk, SoftwareJose};
use mdoc_core::mdl::issuance::MdocBuilder;
use mdoc_core::mdl::presentment::DeviceResponseBuilder;
use mdoc_core::mdl::verifier::{
    all_passed, CheckCategory, CheckStatus, Verifier, VerifyParams,
};
use mdoc_core::mdl::{
    DeviceResponse, DigestAlgorithm, Document, SessionTranscript, ValidityInfo, MDL_NAMESPACE,
};
use mdoc_core::oid4vp::jarm::{JarmResponseType, JarmVerifier};
use mdoc_core::oid4vp::{ConstraintField, Constraints, InputDescriptor, PresentationDefinition};

/// IACA root + document signer chain, in the shape mDL verification
/// expects: the DS subject carries countryName and stateOrProvinceName.
struct TestChain {
    iaca_der: Vec<u8>,
    ds_der: Vec<u8>,
    ds_jwk: Jwk,
}

fn jwk_from_signing_key(key: &SigningKey) -> Jwk {
    let point = key.verifying_key().to_encoded_point(false);
    Jwk {
        kty: "EC".into(),
        crv: Some("P-256".into()),
        x: Some(BASE64_URL_SAFE_NO_PAD.encode(&point.as_bytes()[1..33])),
        y: Some(BASE64_URL_SAFE_NO_PAD.encode(&point.as_bytes()[33..])),
        d: Some(BASE64_URL_SAFE_NO_PAD.encode(key.to_bytes())),
        ..Default::default()
    }
}

fn build_certificate(
    subject: &str,
    issuer: &str,
    subject_key: &SigningKey,
    issuer_key: &SigningKey,
    cert_signing: bool,
) -> Result<Certificate> {
    let issuer_name: Name = issuer.parse()?;
    let subject_name: Name = subject.parse()?;

    let spki = SubjectPublicKeyInfoOwned::from_key(*subject_key.verifying_key())?;
    let ski_digest = Sha1::digest(spki.subject_public_key.raw_bytes());
    let apki = SubjectPublicKeyInfoOwned::from_key(*issuer_key.verifying_key())?;
    let aki_digest = Sha1::digest(apki.subject_public_key.raw_bytes());

    let mut builder = CertificateBuilder::new(
        Profile::Manual {
            issuer: Some(issuer_name),
        },
        rand::random::<u64>().into(),
        Validity::from_now(Duration::from_secs(60 * 60 * 24 * 60))?,
        subject_name,
        spki,
        issuer_key,
    )?;

    builder.add_extension(&SubjectKeyIdentifier(OctetString::new(
        ski_digest.to_vec(),
    )?))?;
    builder.add_extension(&AuthorityKeyIdentifier {
        key_identifier: Some(OctetString::new(aki_digest.to_vec())?),
        ..Default::default()
    })?;
    let usage = if cert_signing {
        KeyUsages::KeyCertSign
    } else {
        KeyUsages::DigitalSignature
    };
    builder.add_extension(&KeyUsage(usage.into()))?;

    Ok(builder.build::<p256::ecdsa::DerSignature>()?)
}

fn setup_chain() -> Result<TestChain> {
    let iaca_key = SigningKey::random(&mut OsRng);
    let ds_key = SigningKey::random(&mut OsRng);

    let iaca_name = "CN=Test IACA,C=US";
    let ds_name = "CN=Test DS,C=US,ST=US-NY";

    let iaca = build_certificate(iaca_name, iaca_name, &iaca_key, &iaca_key, true)?;
    let ds = build_certificate(ds_name, iaca_name, &ds_key, &iaca_key, false)?;

    Ok(TestChain {
        iaca_der: iaca.to_der()?,
        ds_der: ds.to_der()?,
        ds_jwk: jwk_from_signing_key(&ds_key),
    })
}

fn device_cose_key(device_jwk: &Jwk) -> CoseKey {
    CoseKey {
        kty: KeyType::Ec2,
        crv: Curve::P256,
        x: device_jwk.param_bytes("x").unwrap(),
        y: Some(device_jwk.param_bytes("y").unwrap()),
        d: None,
        kid: None,
        alg: None,
    }
}

fn full_date(date: &str) -> Value {
    Value::Tag(1004, Box::new(Value::Text(date.into())))
}

fn issue_mdl(
    crypto: &RustCryptoContext,
    chain: &TestChain,
    device_jwk: &Jwk,
    digest_algorithm: DigestAlgorithm,
    validity: ValidityInfo,
) -> Result<Document> {
    Ok(MdocBuilder::new()
        .doc_type("org.iso.18013.5.1.mDL")
        .add_element(MDL_NAMESPACE, "family_name", "Smith".into())
        .add_element(MDL_NAMESPACE, "given_name", "Alice".into())
        .add_element(MDL_NAMESPACE, "birth_date", full_date("2007-03-25"))
        .add_element(MDL_NAMESPACE, "issuing_country", "US".into())
        .add_element(MDL_NAMESPACE, "issuing_jurisdiction", "US-NY".into())
        .add_element(MDL_NAMESPACE, "age_over_18", Value::Bool(true))
        .add_element(MDL_NAMESPACE, "age_over_21", Value::Bool(true))
        .digest_algorithm(digest_algorithm)
        .validity_info(validity)
        .device_key(device_cose_key(device_jwk))
        .issue(crypto, &chain.ds_jwk, vec![chain.ds_der.clone()])?)
}

fn definition(paths: &[&str]) -> PresentationDefinition {
    PresentationDefinition {
        id: "mdl-request".into(),
        input_descriptors: vec![InputDescriptor {
            id: "org.iso.18013.5.1.mDL".into(),
            constraints: Constraints {
                fields: paths
                    .iter()
                    .map(|path| ConstraintField {
                        path: vec![(*path).to_string()],
                        intent_to_retain: false,
                        purpose: None,
                    })
                    .collect(),
            },
        }],
    }
}

fn long_validity(signed: OffsetDateTime) -> ValidityInfo {
    ValidityInfo {
        signed,
        valid_from: datetime!(2023-10-24 00:00:00 UTC),
        valid_until: datetime!(2050-10-24 00:00:00 UTC),
        expected_update: None,
    }
}

fn transcript(crypto: &RustCryptoContext) -> SessionTranscript {
    SessionTranscript::oid4vp(
        "verifier.example.com",
        "https://verifier.example.com/response",
        "request-nonce",
        "mdoc-generated-nonce",
        crypto,
    )
    .unwrap()
}

#[test]
fn issue_and_reparse_scenario() -> Result<()> {
    let crypto = RustCryptoContext::default();
    let chain = setup_chain()?;
    let device_jwk = RustCryptoContext::generate_p256_jwk();

    let document = issue_mdl(
        &crypto,
        &chain,
        &device_jwk,
        DigestAlgorithm::Sha512,
        long_validity(datetime!(2023-10-24 00:00:00 UTC)),
    )?;

    let mso = document.issuer_signed.mobile_security_object()?;
    assert_eq!(mso.validity_info.signed, datetime!(2023-10-24 00:00:00 UTC));
    assert_eq!(mso.digest_algorithm.name(), "SHA-512");

    let response = DeviceResponseBuilder::new(document)
        .presentation_definition(definition(&["$['org.iso.18013.5.1']['age_over_21']"]))
        .handover(transcript(&crypto))
        .sign_with(device_jwk, cose::Algorithm::Es256)
        .build(&crypto)?;

    let disclosed = &response.documents[0].issuer_signed.name_spaces[MDL_NAMESPACE];
    let item = disclosed
        .iter()
        .find(|item| item.parsed().unwrap().element_identifier == "age_over_21")
        .expect("age_over_21 disclosed");
    assert_eq!(item.parsed().unwrap().element_value, Value::Bool(true));
    Ok(())
}

#[test]
fn device_response_roundtrips_bit_exactly() -> Result<()> {
    let crypto = RustCryptoContext::default();
    let chain = setup_chain()?;
    let device_jwk = RustCryptoContext::generate_p256_jwk();
    let document = issue_mdl(
        &crypto,
        &chain,
        &device_jwk,
        DigestAlgorithm::Sha256,
        long_validity(OffsetDateTime::now_utc()),
    )?;

    let response = DeviceResponseBuilder::new(document)
        .presentation_definition(definition(&[
            "$['org.iso.18013.5.1']['family_name']",
            "$['org.iso.18013.5.1']['birth_date']",
        ]))
        .handover(transcript(&crypto))
        .sign_with(device_jwk, cose::Algorithm::Es256)
        .build(&crypto)?;

    let bytes = response.to_bytes();
    let reparsed = DeviceResponse::from_bytes(&bytes)?;
    assert_eq!(reparsed.to_bytes(), bytes);
    assert_eq!(reparsed, response);
    Ok(())
}

#[test]
fn fresh_document_verifies_clean() -> Result<()> {
    let crypto = RustCryptoContext::default();
    let x509 = mdoc_core::x509::XCertContext::default();
    let chain = setup_chain()?;
    let device_jwk = RustCryptoContext::generate_p256_jwk();
    let document = issue_mdl(
        &crypto,
        &chain,
        &device_jwk,
        DigestAlgorithm::Sha256,
        long_validity(OffsetDateTime::now_utc()),
    )?;

    let st = transcript(&crypto);
    let response = DeviceResponseBuilder::new(document)
        .presentation_definition(definition(&[
            "$['org.iso.18013.5.1']['family_name']",
            "$['org.iso.18013.5.1']['issuing_country']",
            "$['org.iso.18013.5.1']['issuing_jurisdiction']",
        ]))
        .handover(st.clone())
        .sign_with(device_jwk, cose::Algorithm::Es256)
        .build(&crypto)?;

    let verifier = Verifier::new(vec![chain.iaca_der.clone()]);
    let assessments = verifier.verify_collect(
        &response,
        &VerifyParams {
            session_transcript: &st,
            reader_ephemeral_key: None,
            now: OffsetDateTime::now_utc(),
        },
        &crypto,
        &x509,
    )?;

    assert!(
        all_passed(&assessments),
        "unexpected failures: {:#?}",
        assessments
            .iter()
            .filter(|a| !a.passed())
            .collect::<Vec<_>>()
    );
    assert!(assessments
        .iter()
        .any(|a| a.category == CheckCategory::IssuerAuth));
    assert!(assessments
        .iter()
        .any(|a| a.category == CheckCategory::DataIntegrity));
    Ok(())
}

#[test]
fn mac_device_auth_verifies_with_reader_key() -> Result<()> {
    let crypto = RustCryptoContext::default();
    let x509 = mdoc_core::x509::XCertContext::default();
    let chain = setup_chain()?;
    let device_jwk = RustCryptoContext::generate_p256_jwk();
    let reader_jwk = RustCryptoContext::generate_p256_jwk();
    let document = issue_mdl(
        &crypto,
        &chain,
        &device_jwk,
        DigestAlgorithm::Sha256,
        long_validity(OffsetDateTime::now_utc()),
    )?;

    let st = transcript(&crypto);
    let response = DeviceResponseBuilder::new(document)
        .presentation_definition(definition(&["$['org.iso.18013.5.1']['family_name']"]))
        .handover(st.clone())
        .mac_with(device_jwk, reader_jwk.to_public())
        .build(&crypto)?;

    let verifier = Verifier::new(vec![chain.iaca_der.clone()]);
    let assessments = verifier.verify_collect(
        &response,
        &VerifyParams {
            session_transcript: &st,
            reader_ephemeral_key: Some(&reader_jwk),
            now: OffsetDateTime::now_utc(),
        },
        &crypto,
        &x509,
    )?;
    assert!(all_passed(&assessments));
    Ok(())
}

#[test]
fn tampered_attribute_flips_exactly_its_digest_check() -> Result<()> {
    let crypto = RustCryptoContext::default();
    let x509 = mdoc_core::x509::XCertContext::default();
    let chain = setup_chain()?;
    let device_jwk = RustCryptoContext::generate_p256_jwk();
    let document = issue_mdl(
        &crypto,
        &chain,
        &device_jwk,
        DigestAlgorithm::Sha256,
        long_validity(OffsetDateTime::now_utc()),
    )?;

    let st = transcript(&crypto);
    let mut response = DeviceResponseBuilder::new(document)
        .presentation_definition(definition(&[
            "$['org.iso.18013.5.1']['family_name']",
            "$['org.iso.18013.5.1']['given_name']",
        ]))
        .handover(st.clone())
        .sign_with(device_jwk, cose::Algorithm::Es256)
        .build(&crypto)?;

    // Flip one byte inside the family_name item, keeping the CBOR shape.
    let spaces = &mut response.documents[0].issuer_signed.name_spaces;
    let items = spaces.get_mut(MDL_NAMESPACE).unwrap();
    let index = items
        .iter()
        .position(|item| item.parsed().unwrap().element_identifier == "family_name")
        .unwrap();
    let mut bytes = items[index].bytes().to_vec();
    let position = bytes.len() - 1;
    bytes[position] ^= 0x01;
    items[index] = mdoc_core::cbor::DataItem::from_bytes(bytes);

    let verifier = Verifier::new(vec![chain.iaca_der.clone()]);
    let assessments = verifier.verify_collect(
        &response,
        &VerifyParams {
            session_transcript: &st,
            reader_ephemeral_key: None,
            now: OffsetDateTime::now_utc(),
        },
        &crypto,
        &x509,
    )?;

    let failed: Vec<_> = assessments.iter().filter(|a| !a.passed()).collect();
    assert_eq!(failed.len(), 1, "exactly one check should fail: {failed:#?}");
    assert_eq!(failed[0].category, CheckCategory::DataIntegrity);
    assert!(failed[0].check.contains("family_name"));
    assert!(failed[0]
        .reason
        .as_deref()
        .unwrap_or_default()
        .contains("family_name"));
    Ok(())
}

#[test]
fn altered_issuing_country_fails_data_integrity() -> Result<()> {
    let crypto = RustCryptoContext::default();
    let x509 = mdoc_core::x509::XCertContext::default();
    let chain = setup_chain()?;
    let device_jwk = RustCryptoContext::generate_p256_jwk();
    let document = issue_mdl(
        &crypto,
        &chain,
        &device_jwk,
        DigestAlgorithm::Sha256,
        long_validity(OffsetDateTime::now_utc()),
    )?;

    let st = transcript(&crypto);
    let mut response = DeviceResponseBuilder::new(document)
        .presentation_definition(definition(&["$['org.iso.18013.5.1']['issuing_country']"]))
        .handover(st.clone())
        .sign_with(device_jwk, cose::Algorithm::Es256)
        .build(&crypto)?;

    // Substitute a re-encoded item claiming a different country.
    let spaces = &mut response.documents[0].issuer_signed.name_spaces;
    let items = spaces.get_mut(MDL_NAMESPACE).unwrap();
    let original = items[0].parsed().unwrap().clone();
    items[0] = mdoc_core::cbor::DataItem::new(mdoc_core::mdl::IssuerSignedItem {
        element_value: "DE".into(),
        ..original
    });

    let verifier = Verifier::new(vec![chain.iaca_der.clone()]);
    let assessments = verifier.verify_collect(
        &response,
        &VerifyParams {
            session_transcript: &st,
            reader_ephemeral_key: None,
            now: OffsetDateTime::now_utc(),
        },
        &crypto,
        &x509,
    )?;

    let digest_failure = assessments.iter().find(|a| {
        a.category == CheckCategory::DataIntegrity
            && a.status == CheckStatus::Failed
            && a.check.contains("issuing_country")
            && a.check.contains("digest")
    });
    assert!(
        digest_failure.is_some(),
        "expected a digest failure naming issuing_country: {assessments:#?}"
    );
    Ok(())
}

#[test]
fn non_hmac256_device_mac_is_rejected_with_the_policy_message() -> Result<()> {
    let crypto = RustCryptoContext::default();
    let x509 = mdoc_core::x509::XCertContext::default();
    let chain = setup_chain()?;
    let device_jwk = RustCryptoContext::generate_p256_jwk();
    let reader_jwk = RustCryptoContext::generate_p256_jwk();
    let document = issue_mdl(
        &crypto,
        &chain,
        &device_jwk,
        DigestAlgorithm::Sha256,
        long_validity(OffsetDateTime::now_utc()),
    )?;

    let st = transcript(&crypto);
    let mut response = DeviceResponseBuilder::new(document)
        .presentation_definition(definition(&["$['org.iso.18013.5.1']['family_name']"]))
        .handover(st.clone())
        .mac_with(device_jwk, reader_jwk.to_public())
        .build(&crypto)?;

    // Re-MAC with HMAC 384/384, which the profile forbids.
    let hmac_jwk = Jwk {
        kty: "oct".into(),
        k: Some(BASE64_URL_SAFE_NO_PAD.encode([9u8; 48])),
        ..Default::default()
    };
    let device_signed = response.documents[0].device_signed.as_mut().unwrap();
    let authentication_bytes = mdoc_core::mdl::device_authentication_bytes(
        &st,
        "org.iso.18013.5.1.mDL",
        &device_signed.name_spaces,
    );
    device_signed.device_auth.device_mac = Some(CoseMac0::mac_detached(
        HeaderMap::new(),
        HeaderMap::new(),
        &authentication_bytes,
        &[],
        &hmac_jwk,
        cose::Algorithm::Hmac384,
        &crypto,
    )?);

    let verifier = Verifier::new(vec![chain.iaca_der.clone()]);
    let assessments = verifier.verify_collect(
        &response,
        &VerifyParams {
            session_transcript: &st,
            reader_ephemeral_key: Some(&reader_jwk),
            now: OffsetDateTime::now_utc(),
        },
        &crypto,
        &x509,
    )?;

    let mac_failure = assessments
        .iter()
        .find(|a| a.category == CheckCategory::DeviceAuth && !a.passed())
        .expect("device auth must fail");
    assert_eq!(
        mac_failure.reason.as_deref(),
        Some("Device MAC must use alg 5 (HMAC 256/256)")
    );
    Ok(())
}

#[test]
fn ds_certificate_key_matches_jose_import() -> Result<()> {
    let chain = setup_chain()?;
    let jwk = import::jwk_from_spki(&import::spki_from_x509(&chain.ds_der)?)?;
    assert_eq!(jwk.x, chain.ds_jwk.x);
    assert_eq!(jwk.y, chain.ds_jwk.y);
    Ok(())
}

/// v1 certificates carry no explicit `[0]` version tag; the SPKI then sits
/// at tbsCertificate index 5.
#[test]
fn spki_heuristic_handles_v1_certificates() -> Result<()> {
    fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        assert!(content.len() < 128);
        out.push(content.len() as u8);
        out.extend_from_slice(content);
        out
    }

    let chain = setup_chain()?;
    let spki = import::spki_from_x509(&chain.ds_der)?;

    // tbsCertificate without a version element: serial, sigAlg, issuer,
    // validity, subject, SPKI.
    let serial = tlv(0x02, &[0x01]);
    let sig_alg = tlv(0x30, &tlv(0x06, &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02]));
    let name = tlv(0x30, &[]);
    let validity = tlv(0x30, &[]);

    let mut tbs_content = Vec::new();
    tbs_content.extend(&serial);
    tbs_content.extend(&sig_alg);
    tbs_content.extend(&name);
    tbs_content.extend(&validity);
    tbs_content.extend(&name);
    tbs_content.extend(&spki);

    let mut tbs = vec![0x30, 0x82];
    tbs.extend((tbs_content.len() as u16).to_be_bytes());
    tbs.extend(&tbs_content);

    let signature = tlv(0x03, &[0x00, 0xde, 0xad]);
    let mut cert_content = Vec::new();
    cert_content.extend(&tbs);
    cert_content.extend(&sig_alg);
    cert_content.extend(&signature);

    let mut cert = vec![0x30, 0x82];
    cert.extend((cert_content.len() as u16).to_be_bytes());
    cert.extend(&cert_content);

    assert_eq!(import::spki_from_x509(&cert)?, spki);
    Ok(())
}

struct InMemoryRequests(Map<String, Json>);

impl AuthRequestResolver for InMemoryRequests {
    fn request_params(
        &self,
        _response_params: &Map<String, Json>,
    ) -> Result<Map<String, Json>, CapabilityError> {
        Ok(self.0.clone())
    }
}

fn auth_request(state: &str) -> Map<String, Json> {
    json!({
        "client_id": "verifier.example.com",
        "response_uri": "https://verifier.example.com/response",
        "nonce": "request-nonce",
        "state": state,
    })
    .as_object()
    .cloned()
    .unwrap()
}

#[test]
fn jarm_encrypted_device_response_roundtrip() -> Result<()> {
    let crypto = RustCryptoContext::default();
    let jose = SoftwareJose::new();
    let chain = setup_chain()?;
    let device_jwk = RustCryptoContext::generate_p256_jwk();
    let document = issue_mdl(
        &crypto,
        &chain,
        &device_jwk,
        DigestAlgorithm::Sha256,
        long_validity(OffsetDateTime::now_utc()),
    )?;

    let response = DeviceResponseBuilder::new(document)
        .presentation_definition(definition(&["$['org.iso.18013.5.1']['family_name']"]))
        .handover(transcript(&crypto))
        .sign_with(device_jwk, cose::Algorithm::Es256)
        .build(&crypto)?;

    let vp_token = BASE64_URL_SAFE_NO_PAD.encode(response.to_bytes());
    let claims = json!({
        "state": "jarm-state",
        "vp_token": vp_token,
        "presentation_submission": {
            "id": "submission-1",
            "definition_id": "mdl-request",
            "descriptor_map": [{
                "id": "org.iso.18013.5.1.mDL",
                "format": "mso_mdoc",
                "path": "$"
            }]
        },
    });

    let mut reader = RustCryptoContext::generate_p256_jwk();
    reader.kid = Some("reader-enc-1".into());
    let jwe = jose.encrypt_compact(
        &claims,
        &reader.to_public(),
        Algorithm::EcdhEs,
        Algorithm::A256Gcm,
        &JweOptions {
            apu: Some("mdoc-generated-nonce".into()),
            apv: Some("request-nonce".into()),
            kid: None,
        },
    )?;

    let requests = InMemoryRequests(auth_request("jarm-state"));
    let validated = JarmVerifier::new(&jose, &requests)
        .with_decryption_key(reader)
        .validate(&jwe)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    assert_eq!(validated.response_type, JarmResponseType::Encrypted);
    assert_eq!(
        validated.auth_response_params.get("vp_token").and_then(Json::as_str),
        claims.get("vp_token").and_then(Json::as_str),
    );
    assert_eq!(
        validated.auth_response_params.get("presentation_submission"),
        claims.get("presentation_submission"),
    );

    // The transported device response survives the envelope bit-exactly.
    let recovered = BASE64_URL_SAFE_NO_PAD.decode(
        validated
            .auth_response_params
            .get("vp_token")
            .and_then(Json::as_str)
            .unwrap(),
    )?;
    assert_eq!(DeviceResponse::from_bytes(&recovered)?, response);
    Ok(())
}

#[test]
fn jarm_signed_then_encrypted_reports_the_combined_type() -> Result<()> {
    let jose = SoftwareJose::new();
    let mut signer = RustCryptoContext::generate_p256_jwk();
    signer.kid = Some("rp-1".into());
    let mut reader = RustCryptoContext::generate_p256_jwk();
    reader.kid = Some("reader-enc-1".into());

    let claims = json!({
        "iss": "https://wallet.example.com",
        "aud": "verifier.example.com",
        "exp": OffsetDateTime::now_utc().unix_timestamp() + 600,
        "state": "both-state",
        "vp_token": "tok",
    });
    let jws = jose.sign_compact(&claims, &signer, Algorithm::Es256)?;
    let jwe = jose.encrypt_compact(
        &Json::String(jws),
        &reader.to_public(),
        Algorithm::EcdhEs,
        Algorithm::A256Gcm,
        &JweOptions::default(),
    )?;

    let requests = InMemoryRequests(auth_request("both-state"));
    let validated = JarmVerifier::new(&jose, &requests)
        .with_decryption_key(reader)
        .with_signer_key(signer.to_public())
        .validate(&jwe)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    assert_eq!(validated.response_type, JarmResponseType::SignedEncrypted);
    assert_eq!(
        validated.auth_response_params.get("vp_token").and_then(Json::as_str),
        Some("tok")
    );
    Ok(())
}
