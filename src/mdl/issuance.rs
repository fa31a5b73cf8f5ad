//! Mdoc issuance: namespaces in, signed [`Document`] out.

use indexmap::IndexMap;
use tracing::debug;

use crate::cbor::{DataItem, Value};
use crate::context::CryptoContext;
use crate::cose::{self, label, CoseKey, CoseSign1, HeaderMap};
use crate::jose::Jwk;

use super::presentment::BuilderError;
use super::{
    issuer_item_digest, DeviceKeyInfo, DigestAlgorithm, Document, IssuerSigned, IssuerSignedItem,
    MobileSecurityObject, ValidityInfo,
};

/// Consuming builder assembling and signing an mdoc.
///
/// ```no_run
/// # use mdoc_core::mdl::issuance::MdocBuilder;
/// # use mdoc_core::mdl::{DigestAlgorithm, ValidityInfo};
/// # fn demo(validity: ValidityInfo, device_key: mdoc_core::cose::CoseKey,
/// #         ds_key: mdoc_core::jose::Jwk, ds_cert: Vec<u8>,
/// #         crypto: &dyn mdoc_core::context::CryptoContext) {
/// let document = MdocBuilder::new()
///     .doc_type("org.iso.18013.5.1.mDL")
///     .add_element("org.iso.18013.5.1", "family_name", "Doe".into())
///     .validity_info(validity)
///     .digest_algorithm(DigestAlgorithm::Sha256)
///     .device_key(device_key)
///     .issue(crypto, &ds_key, vec![ds_cert]);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MdocBuilder {
    doc_type: Option<String>,
    name_spaces: IndexMap<String, IndexMap<String, Value>>,
    validity_info: Option<ValidityInfo>,
    digest_algorithm: DigestAlgorithm,
    device_key: Option<CoseKey>,
}

impl Default for DigestAlgorithm {
    fn default() -> Self {
        DigestAlgorithm::Sha256
    }
}

impl MdocBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// Replace all namespaces at once.
    pub fn name_spaces(mut self, name_spaces: IndexMap<String, IndexMap<String, Value>>) -> Self {
        self.name_spaces = name_spaces;
        self
    }

    pub fn add_element(
        mut self,
        name_space: impl Into<String>,
        identifier: impl Into<String>,
        value: Value,
    ) -> Self {
        self.name_spaces
            .entry(name_space.into())
            .or_default()
            .insert(identifier.into(), value);
        self
    }

    pub fn validity_info(mut self, validity_info: ValidityInfo) -> Self {
        self.validity_info = Some(validity_info);
        self
    }

    pub fn digest_algorithm(mut self, digest_algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = digest_algorithm;
        self
    }

    pub fn device_key(mut self, device_key: CoseKey) -> Self {
        self.device_key = Some(device_key);
        self
    }

    /// Sign the assembled mdoc: per-item randoms and digests, the MSO as a
    /// tag-24 payload, and the DS certificate chain in the x5chain header.
    pub fn issue(
        self,
        crypto: &dyn CryptoContext,
        ds_key: &Jwk,
        x5chain: Vec<Vec<u8>>,
    ) -> Result<Document, crate::Error> {
        let doc_type = self.doc_type.ok_or(BuilderError::DocTypeNotSet)?;
        let validity_info = self.validity_info.ok_or(BuilderError::ValidityNotSet)?;
        let device_key = self.device_key.ok_or(BuilderError::KeyNotSet)?;
        if self.name_spaces.is_empty() {
            return Err(BuilderError::EmptyNamespaces.into());
        }

        let mut signed_spaces: IndexMap<String, Vec<DataItem<IssuerSignedItem>>> =
            IndexMap::new();
        let mut value_digests: IndexMap<String, IndexMap<u64, Vec<u8>>> = IndexMap::new();
        let mut digest_id: u64 = 0;

        for (name_space, elements) in self.name_spaces {
            let mut items = Vec::with_capacity(elements.len());
            let mut digests = IndexMap::with_capacity(elements.len());
            for (element_identifier, element_value) in elements {
                let item = IssuerSignedItem {
                    digest_id,
                    random: crypto.random(16)?,
                    element_identifier,
                    element_value,
                };
                let item = DataItem::new(item);
                digests.insert(
                    digest_id,
                    issuer_item_digest(crypto, self.digest_algorithm, &item)?,
                );
                items.push(item);
                digest_id += 1;
            }
            signed_spaces.insert(name_space.clone(), items);
            value_digests.insert(name_space, digests);
        }
        debug!(doc_type = %doc_type, elements = digest_id, "assembled issuer namespaces");

        let mso = MobileSecurityObject {
            version: "1.0".into(),
            digest_algorithm: self.digest_algorithm,
            value_digests,
            device_key_info: DeviceKeyInfo { device_key },
            doc_type: doc_type.clone(),
            validity_info,
        };
        let mso_payload = DataItem::new(mso).tagged_bytes();

        let mut unprotected = HeaderMap::new();
        unprotected.insert(label::X5CHAIN, cose::x5chain_to_value(&x5chain));
        let issuer_auth = CoseSign1::sign(
            HeaderMap::new(),
            unprotected,
            mso_payload,
            &[],
            ds_key,
            cose::Algorithm::Es256,
            crypto,
        )?;

        Ok(Document {
            doc_type,
            issuer_signed: IssuerSigned {
                name_spaces: signed_spaces,
                issuer_auth,
            },
            device_signed: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use crate::cose::{Curve, KeyType};
    use crate::crypto::RustCryptoContext;

    use super::*;

    fn device_key() -> CoseKey {
        CoseKey {
            kty: KeyType::Ec2,
            crv: Curve::P256,
            x: vec![0x01; 32],
            y: Some(vec![0x02; 32]),
            d: None,
            kid: None,
            alg: None,
        }
    }

    fn validity() -> ValidityInfo {
        ValidityInfo {
            signed: datetime!(2023-10-24 00:00:00 UTC),
            valid_from: datetime!(2023-10-24 00:00:00 UTC),
            valid_until: datetime!(2050-10-24 00:00:00 UTC),
            expected_update: None,
        }
    }

    #[test]
    fn issue_populates_mso_and_digests() {
        let crypto = RustCryptoContext::default();
        let ds_key = RustCryptoContext::generate_p256_jwk();

        let document = MdocBuilder::new()
            .doc_type("org.iso.18013.5.1.mDL")
            .add_element("org.iso.18013.5.1", "family_name", "Doe".into())
            .add_element("org.iso.18013.5.1", "birth_date", "2007-03-25".into())
            .digest_algorithm(DigestAlgorithm::Sha512)
            .validity_info(validity())
            .device_key(device_key())
            .issue(&crypto, &ds_key, vec![b"fake certificate".to_vec()])
            .unwrap();

        let mso = document.issuer_signed.mobile_security_object().unwrap();
        assert_eq!(mso.doc_type, "org.iso.18013.5.1.mDL");
        assert_eq!(mso.digest_algorithm, DigestAlgorithm::Sha512);
        assert_eq!(mso.validity_info.signed, datetime!(2023-10-24 00:00:00 UTC));

        let items = &document.issuer_signed.name_spaces["org.iso.18013.5.1"];
        assert_eq!(items.len(), 2);
        for item in items {
            let parsed = item.parsed().unwrap();
            assert_eq!(parsed.random.len(), 16);
            let expected = issuer_item_digest(&crypto, DigestAlgorithm::Sha512, item).unwrap();
            assert_eq!(
                mso.value_digests["org.iso.18013.5.1"][&parsed.digest_id],
                expected
            );
        }

        // Issuer signature verifies with the DS public key.
        document
            .issuer_signed
            .issuer_auth
            .verify(&ds_key.to_public(), None, None, &crypto)
            .unwrap();
    }

    #[test]
    fn issue_requires_the_core_fields() {
        let crypto = RustCryptoContext::default();
        let ds_key = RustCryptoContext::generate_p256_jwk();

        let err = MdocBuilder::new()
            .add_element("ns", "a", Value::Bool(true))
            .validity_info(validity())
            .device_key(device_key())
            .issue(&crypto, &ds_key, vec![])
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Builder(BuilderError::DocTypeNotSet)
        ));

        let err = MdocBuilder::new()
            .doc_type("dt")
            .validity_info(validity())
            .device_key(device_key())
            .issue(&crypto, &ds_key, vec![])
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Builder(BuilderError::EmptyNamespaces)
        ));
    }
}
