//! The ISO/IEC 18013-5 mdoc data model and its CBOR schema walks.
//!
//! Every embedded structure that feeds a digest or a signature — issuer
//! signed items, the MSO, device namespaces — is carried as a [`DataItem`]
//! so its bytes survive decode/encode round trips untouched.

pub mod issuance;
pub mod presentment;
pub mod verifier;

use indexmap::IndexMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::cbor::{decode, encode, CborSchema, DataItem, Value, TAG_ENCODED_DATETIME};
use crate::context::CryptoContext;
use crate::cose::{CoseKey, CoseMac0, CoseSign1};
use crate::jose::HashAlgorithm;

pub type NameSpace = String;
pub type DocType = String;
pub type DataElementIdentifier = String;
pub type DigestId = u64;

/// The mDL namespace, whose attributes are policy-coupled to the DS
/// certificate subject.
pub const MDL_NAMESPACE: &str = "org.iso.18013.5.1";
/// The mDL document type.
pub const MDL_DOC_TYPE: &str = "org.iso.18013.5.1.mDL";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MdlError {
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("field {0:?} has an unexpected type or value")]
    InvalidField(&'static str),
    #[error("unsupported digest algorithm {0:?}")]
    UnsupportedDigestAlgorithm(String),
    #[error("device response version {0:?} is not supported")]
    UnsupportedVersion(String),
    #[error("invalid date-time {0:?}")]
    InvalidDateTime(String),
    #[error("random must be at least 16 bytes")]
    RandomTooShort,
}

/// Digest algorithms admitted by the MSO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, MdlError> {
        match name {
            "SHA-256" => Ok(DigestAlgorithm::Sha256),
            "SHA-384" => Ok(DigestAlgorithm::Sha384),
            "SHA-512" => Ok(DigestAlgorithm::Sha512),
            other => Err(MdlError::UnsupportedDigestAlgorithm(other.to_string())),
        }
    }

    pub fn hash(&self) -> HashAlgorithm {
        match self {
            DigestAlgorithm::Sha256 => HashAlgorithm::Sha256,
            DigestAlgorithm::Sha384 => HashAlgorithm::Sha384,
            DigestAlgorithm::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

/// DeviceResponse (ISO 18013-5 §8.3.2.1.2.2).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceResponse {
    pub version: String,
    pub documents: Vec<Document>,
    pub status: u64,
}

impl DeviceResponse {
    pub const VERSION: &'static str = "1.0";

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::Error> {
        Self::from_cbor(decode(bytes)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.to_cbor())
    }
}

impl CborSchema for DeviceResponse {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let version = value
            .map_get_text("version")
            .and_then(Value::as_text)
            .ok_or(MdlError::MissingField("version"))?
            .to_string();
        if !version_at_least(&version, Self::VERSION) {
            return Err(MdlError::UnsupportedVersion(version).into());
        }
        let documents = value
            .map_get_text("documents")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| Document::from_cbor(item.clone()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();
        let status = value
            .map_get_text("status")
            .and_then(Value::as_unsigned)
            .ok_or(MdlError::MissingField("status"))?;
        Ok(Self {
            version,
            documents,
            status,
        })
    }

    fn to_cbor(&self) -> Value {
        Value::Map(vec![
            (Value::from("version"), Value::from(self.version.as_str())),
            (
                Value::from("documents"),
                Value::Array(self.documents.iter().map(Document::to_cbor).collect()),
            ),
            (Value::from("status"), Value::Unsigned(self.status)),
        ])
    }
}

/// A single document within a response. Issuer-signed data is always
/// present; device-signed data only once the holder has presented it.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub doc_type: DocType,
    pub issuer_signed: IssuerSigned,
    pub device_signed: Option<DeviceSigned>,
}

impl CborSchema for Document {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let doc_type = value
            .map_get_text("docType")
            .and_then(Value::as_text)
            .ok_or(MdlError::MissingField("docType"))?
            .to_string();
        let issuer_signed = value
            .map_get_text("issuerSigned")
            .cloned()
            .ok_or(MdlError::MissingField("issuerSigned"))
            .map_err(crate::Error::from)
            .and_then(IssuerSigned::from_cbor)?;
        let device_signed = value
            .map_get_text("deviceSigned")
            .cloned()
            .map(DeviceSigned::from_cbor)
            .transpose()?;
        Ok(Self {
            doc_type,
            issuer_signed,
            device_signed,
        })
    }

    fn to_cbor(&self) -> Value {
        let mut entries = vec![
            (Value::from("docType"), Value::from(self.doc_type.as_str())),
            (Value::from("issuerSigned"), self.issuer_signed.to_cbor()),
        ];
        if let Some(device_signed) = &self.device_signed {
            entries.push((Value::from("deviceSigned"), device_signed.to_cbor()));
        }
        Value::Map(entries)
    }
}

/// IssuerSigned: per-namespace signed items plus the issuer's Sign1 over
/// the MSO.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuerSigned {
    pub name_spaces: IndexMap<NameSpace, Vec<DataItem<IssuerSignedItem>>>,
    pub issuer_auth: CoseSign1,
}

impl IssuerSigned {
    /// Decode the MSO out of the issuer auth payload.
    pub fn mobile_security_object(&self) -> Result<MobileSecurityObject, crate::Error> {
        let payload = self
            .issuer_auth
            .payload()
            .ok_or(MdlError::MissingField("issuerAuth payload"))?;
        DataItem::<MobileSecurityObject>::from_tagged_value(decode(payload)?)?.into_parsed()
    }

    /// Find a disclosed item by namespace and element identifier.
    pub fn item(
        &self,
        name_space: &str,
        element: &str,
    ) -> Option<&DataItem<IssuerSignedItem>> {
        self.name_spaces.get(name_space)?.iter().find(|item| {
            item.parsed()
                .map(|parsed| parsed.element_identifier == element)
                .unwrap_or(false)
        })
    }
}

impl CborSchema for IssuerSigned {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let mut name_spaces = IndexMap::new();
        if let Some(spaces) = value.map_get_text("nameSpaces").and_then(Value::as_map) {
            for (ns, items) in spaces {
                let ns = ns
                    .as_text()
                    .ok_or(MdlError::InvalidField("nameSpaces"))?
                    .to_string();
                let items = items
                    .as_array()
                    .ok_or(MdlError::InvalidField("nameSpaces"))?
                    .iter()
                    .map(|item| DataItem::from_tagged_value(item.clone()))
                    .collect::<Result<Vec<_>, _>>()?;
                name_spaces.insert(ns, items);
            }
        }
        let issuer_auth = value
            .map_get_text("issuerAuth")
            .cloned()
            .ok_or(MdlError::MissingField("issuerAuth"))
            .map_err(crate::Error::from)
            .and_then(CoseSign1::from_cbor)?;
        Ok(Self {
            name_spaces,
            issuer_auth,
        })
    }

    fn to_cbor(&self) -> Value {
        let spaces = Value::Map(
            self.name_spaces
                .iter()
                .map(|(ns, items)| {
                    (
                        Value::from(ns.as_str()),
                        Value::Array(items.iter().map(DataItem::to_tagged_value).collect()),
                    )
                })
                .collect(),
        );
        Value::Map(vec![
            (Value::from("nameSpaces"), spaces),
            (Value::from("issuerAuth"), self.issuer_auth.to_cbor()),
        ])
    }
}

/// A single issuer-signed attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuerSignedItem {
    pub digest_id: DigestId,
    pub random: Vec<u8>,
    pub element_identifier: DataElementIdentifier,
    pub element_value: Value,
}

impl CborSchema for IssuerSignedItem {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let digest_id = value
            .map_get_text("digestID")
            .and_then(Value::as_unsigned)
            .ok_or(MdlError::MissingField("digestID"))?;
        let random = value
            .map_get_text("random")
            .and_then(Value::as_bytes)
            .ok_or(MdlError::MissingField("random"))?
            .to_vec();
        if random.len() < 16 {
            return Err(MdlError::RandomTooShort.into());
        }
        let element_identifier = value
            .map_get_text("elementIdentifier")
            .and_then(Value::as_text)
            .ok_or(MdlError::MissingField("elementIdentifier"))?
            .to_string();
        let element_value = value
            .map_get_text("elementValue")
            .cloned()
            .ok_or(MdlError::MissingField("elementValue"))?;
        Ok(Self {
            digest_id,
            random,
            element_identifier,
            element_value,
        })
    }

    fn to_cbor(&self) -> Value {
        Value::Map(vec![
            (Value::from("digestID"), Value::Unsigned(self.digest_id)),
            (Value::from("random"), Value::Bytes(self.random.clone())),
            (
                Value::from("elementIdentifier"),
                Value::from(self.element_identifier.as_str()),
            ),
            (Value::from("elementValue"), self.element_value.clone()),
        ])
    }
}

/// DeviceSigned: the (usually empty) device namespaces and the device auth.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSigned {
    pub name_spaces: DataItem<DeviceNameSpaces>,
    pub device_auth: DeviceAuth,
}

impl CborSchema for DeviceSigned {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let name_spaces = value
            .map_get_text("nameSpaces")
            .cloned()
            .ok_or(MdlError::MissingField("nameSpaces"))
            .map_err(crate::Error::from)
            .and_then(DataItem::from_cbor)?;
        let device_auth = value
            .map_get_text("deviceAuth")
            .cloned()
            .ok_or(MdlError::MissingField("deviceAuth"))
            .map_err(crate::Error::from)
            .and_then(DeviceAuth::from_cbor)?;
        Ok(Self {
            name_spaces,
            device_auth,
        })
    }

    fn to_cbor(&self) -> Value {
        Value::Map(vec![
            (Value::from("nameSpaces"), self.name_spaces.to_tagged_value()),
            (Value::from("deviceAuth"), self.device_auth.to_cbor()),
        ])
    }
}

/// DeviceNameSpaces; empty unless the device adds self-asserted elements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceNameSpaces(pub IndexMap<NameSpace, IndexMap<DataElementIdentifier, Value>>);

impl CborSchema for DeviceNameSpaces {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let entries = value.into_map().ok_or(MdlError::InvalidField("nameSpaces"))?;
        let mut spaces = IndexMap::new();
        for (ns, elements) in entries {
            let ns = ns
                .into_text()
                .ok_or(MdlError::InvalidField("nameSpaces"))?;
            let elements = elements
                .into_map()
                .ok_or(MdlError::InvalidField("nameSpaces"))?;
            let mut parsed = IndexMap::new();
            for (identifier, element) in elements {
                parsed.insert(
                    identifier
                        .into_text()
                        .ok_or(MdlError::InvalidField("nameSpaces"))?,
                    element,
                );
            }
            spaces.insert(ns, parsed);
        }
        Ok(Self(spaces))
    }

    fn to_cbor(&self) -> Value {
        Value::Map(
            self.0
                .iter()
                .map(|(ns, elements)| {
                    (
                        Value::from(ns.as_str()),
                        Value::Map(
                            elements
                                .iter()
                                .map(|(id, v)| (Value::from(id.as_str()), v.clone()))
                                .collect(),
                        ),
                    )
                })
                .collect(),
        )
    }
}

/// DeviceAuth: a signature or a MAC. Exactly-one is a verifier check, so the
/// model keeps both slots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceAuth {
    pub device_signature: Option<CoseSign1>,
    pub device_mac: Option<CoseMac0>,
}

impl CborSchema for DeviceAuth {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let device_signature = value
            .map_get_text("deviceSignature")
            .cloned()
            .map(CoseSign1::from_cbor)
            .transpose()?;
        let device_mac = value
            .map_get_text("deviceMac")
            .cloned()
            .map(CoseMac0::from_cbor)
            .transpose()?;
        Ok(Self {
            device_signature,
            device_mac,
        })
    }

    fn to_cbor(&self) -> Value {
        let mut entries = Vec::new();
        if let Some(signature) = &self.device_signature {
            entries.push((Value::from("deviceSignature"), signature.to_cbor()));
        }
        if let Some(mac) = &self.device_mac {
            entries.push((Value::from("deviceMac"), mac.to_cbor()));
        }
        Value::Map(entries)
    }
}

/// MobileSecurityObject: the payload of the issuer Sign1.
#[derive(Debug, Clone, PartialEq)]
pub struct MobileSecurityObject {
    pub version: String,
    pub digest_algorithm: DigestAlgorithm,
    pub value_digests: IndexMap<NameSpace, IndexMap<DigestId, Vec<u8>>>,
    pub device_key_info: DeviceKeyInfo,
    pub doc_type: DocType,
    pub validity_info: ValidityInfo,
}

impl CborSchema for MobileSecurityObject {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let version = value
            .map_get_text("version")
            .and_then(Value::as_text)
            .ok_or(MdlError::MissingField("version"))?
            .to_string();
        let digest_algorithm = value
            .map_get_text("digestAlgorithm")
            .and_then(Value::as_text)
            .ok_or(MdlError::MissingField("digestAlgorithm"))
            .map_err(crate::Error::from)
            .and_then(|name| DigestAlgorithm::from_name(name).map_err(Into::into))?;

        let mut value_digests = IndexMap::new();
        let spaces = value
            .map_get_text("valueDigests")
            .and_then(Value::as_map)
            .ok_or(MdlError::MissingField("valueDigests"))?;
        for (ns, digests) in spaces {
            let ns = ns
                .as_text()
                .ok_or(MdlError::InvalidField("valueDigests"))?
                .to_string();
            let digests = digests
                .as_map()
                .ok_or(MdlError::InvalidField("valueDigests"))?;
            let mut per_ns = IndexMap::new();
            for (id, digest) in digests {
                per_ns.insert(
                    id.as_unsigned()
                        .ok_or(MdlError::InvalidField("valueDigests"))?,
                    digest
                        .as_bytes()
                        .ok_or(MdlError::InvalidField("valueDigests"))?
                        .to_vec(),
                );
            }
            value_digests.insert(ns, per_ns);
        }

        let device_key_info = value
            .map_get_text("deviceKeyInfo")
            .cloned()
            .ok_or(MdlError::MissingField("deviceKeyInfo"))
            .map_err(crate::Error::from)
            .and_then(DeviceKeyInfo::from_cbor)?;
        let doc_type = value
            .map_get_text("docType")
            .and_then(Value::as_text)
            .ok_or(MdlError::MissingField("docType"))?
            .to_string();
        let validity_info = value
            .map_get_text("validityInfo")
            .cloned()
            .ok_or(MdlError::MissingField("validityInfo"))
            .map_err(crate::Error::from)
            .and_then(ValidityInfo::from_cbor)?;

        Ok(Self {
            version,
            digest_algorithm,
            value_digests,
            device_key_info,
            doc_type,
            validity_info,
        })
    }

    fn to_cbor(&self) -> Value {
        let digests = Value::Map(
            self.value_digests
                .iter()
                .map(|(ns, per_ns)| {
                    (
                        Value::from(ns.as_str()),
                        Value::Map(
                            per_ns
                                .iter()
                                .map(|(id, digest)| {
                                    (Value::Unsigned(*id), Value::Bytes(digest.clone()))
                                })
                                .collect(),
                        ),
                    )
                })
                .collect(),
        );
        Value::Map(vec![
            (Value::from("version"), Value::from(self.version.as_str())),
            (
                Value::from("digestAlgorithm"),
                Value::from(self.digest_algorithm.name()),
            ),
            (Value::from("valueDigests"), digests),
            (Value::from("deviceKeyInfo"), self.device_key_info.to_cbor()),
            (Value::from("docType"), Value::from(self.doc_type.as_str())),
            (Value::from("validityInfo"), self.validity_info.to_cbor()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceKeyInfo {
    pub device_key: CoseKey,
}

impl CborSchema for DeviceKeyInfo {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let device_key = value
            .map_get_text("deviceKey")
            .cloned()
            .ok_or(MdlError::MissingField("deviceKey"))
            .map_err(crate::Error::from)
            .and_then(CoseKey::from_cbor)?;
        Ok(Self { device_key })
    }

    fn to_cbor(&self) -> Value {
        Value::Map(vec![(
            Value::from("deviceKey"),
            self.device_key.to_cbor(),
        )])
    }
}

/// MSO validity window; `signed` must fall inside the DS certificate's
/// own validity.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidityInfo {
    pub signed: OffsetDateTime,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub expected_update: Option<OffsetDateTime>,
}

impl CborSchema for ValidityInfo {
    fn from_cbor(value: Value) -> Result<Self, crate::Error> {
        let field = |name: &'static str| -> Result<OffsetDateTime, crate::Error> {
            tdate_from_cbor(
                value
                    .map_get_text(name)
                    .ok_or(MdlError::MissingField(name))?,
            )
        };
        Ok(Self {
            signed: field("signed")?,
            valid_from: field("validFrom")?,
            valid_until: field("validUntil")?,
            expected_update: value
                .map_get_text("expectedUpdate")
                .map(tdate_from_cbor)
                .transpose()?,
        })
    }

    fn to_cbor(&self) -> Value {
        let mut entries = vec![
            (Value::from("signed"), tdate_to_cbor(self.signed)),
            (Value::from("validFrom"), tdate_to_cbor(self.valid_from)),
            (Value::from("validUntil"), tdate_to_cbor(self.valid_until)),
        ];
        if let Some(expected_update) = self.expected_update {
            entries.push((
                Value::from("expectedUpdate"),
                tdate_to_cbor(expected_update),
            ));
        }
        Value::Map(entries)
    }
}

/// SessionTranscript: engagement and reader key as verbatim embedded bytes
/// (null for the OpenID4VP flows), plus the transport-specific handover.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTranscript {
    pub device_engagement: Option<Vec<u8>>,
    pub e_reader_key: Option<Vec<u8>>,
    pub handover: Value,
}

impl SessionTranscript {
    pub fn new(
        device_engagement: Option<Vec<u8>>,
        e_reader_key: Option<Vec<u8>>,
        handover: Value,
    ) -> Self {
        Self {
            device_engagement,
            e_reader_key,
            handover,
        }
    }

    /// The OID4VP handover: engagement and reader key are null, the
    /// handover binds the client id, response uri and both nonces.
    pub fn oid4vp(
        client_id: &str,
        response_uri: &str,
        nonce: &str,
        mdoc_generated_nonce: &str,
        crypto: &dyn CryptoContext,
    ) -> Result<Self, crate::Error> {
        let client_id_hash = crypto.digest(
            HashAlgorithm::Sha256,
            &encode(&Value::Array(vec![
                Value::from(client_id),
                Value::from(mdoc_generated_nonce),
            ])),
        )?;
        let response_uri_hash = crypto.digest(
            HashAlgorithm::Sha256,
            &encode(&Value::Array(vec![
                Value::from(response_uri),
                Value::from(mdoc_generated_nonce),
            ])),
        )?;
        Ok(Self {
            device_engagement: None,
            e_reader_key: None,
            handover: Value::Array(vec![
                Value::Bytes(client_id_hash),
                Value::Bytes(response_uri_hash),
                Value::from(nonce),
            ]),
        })
    }

    pub fn to_cbor_value(&self) -> Value {
        let embedded = |bytes: &Option<Vec<u8>>| match bytes {
            Some(b) => Value::Tag(
                crate::cbor::TAG_EMBEDDED_CBOR,
                Box::new(Value::Bytes(b.clone())),
            ),
            None => Value::Null,
        };
        Value::Array(vec![
            embedded(&self.device_engagement),
            embedded(&self.e_reader_key),
            self.handover.clone(),
        ])
    }

    /// SessionTranscriptBytes: the tag-24 wrapped encoding, the MAC salt
    /// input.
    pub fn bytes(&self) -> Vec<u8> {
        encode(&Value::Tag(
            crate::cbor::TAG_EMBEDDED_CBOR,
            Box::new(Value::Bytes(encode(&self.to_cbor_value()))),
        ))
    }
}

/// DeviceAuthenticationBytes: the detached payload for device signatures
/// and MACs.
pub fn device_authentication_bytes(
    session_transcript: &SessionTranscript,
    doc_type: &str,
    device_name_spaces: &DataItem<DeviceNameSpaces>,
) -> Vec<u8> {
    let authentication = Value::Array(vec![
        Value::from("DeviceAuthentication"),
        session_transcript.to_cbor_value(),
        Value::from(doc_type),
        device_name_spaces.to_tagged_value(),
    ]);
    encode(&Value::Tag(
        crate::cbor::TAG_EMBEDDED_CBOR,
        Box::new(Value::Bytes(encode(&authentication))),
    ))
}

/// The digest the MSO records for an item: hash of the tag-24 wrapped
/// encoding.
pub fn issuer_item_digest(
    crypto: &dyn CryptoContext,
    algorithm: DigestAlgorithm,
    item: &DataItem<IssuerSignedItem>,
) -> Result<Vec<u8>, crate::Error> {
    Ok(crypto.digest(algorithm.hash(), &item.tagged_bytes())?)
}

/// Dotted-version comparison: `version >= minimum`, segment by segment.
pub fn version_at_least(version: &str, minimum: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|segment| segment.parse().unwrap_or(0))
            .collect()
    };
    let version = parse(version);
    let minimum = parse(minimum);
    for i in 0..version.len().max(minimum.len()) {
        let a = version.get(i).copied().unwrap_or(0);
        let b = minimum.get(i).copied().unwrap_or(0);
        if a != b {
            return a > b;
        }
    }
    true
}

fn tdate_to_cbor(datetime: OffsetDateTime) -> Value {
    let datetime = datetime.replace_nanosecond(0).unwrap_or(datetime);
    let text = datetime
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"));
    Value::Tag(TAG_ENCODED_DATETIME, Box::new(Value::Text(text)))
}

fn tdate_from_cbor(value: &Value) -> Result<OffsetDateTime, crate::Error> {
    let text = match value {
        Value::Tag(TAG_ENCODED_DATETIME, content) => content.as_text(),
        Value::Text(text) => Some(text.as_str()),
        _ => None,
    }
    .ok_or(MdlError::InvalidField("date-time"))?;
    OffsetDateTime::parse(text, &Rfc3339)
        .map_err(|_| MdlError::InvalidDateTime(text.to_string()).into())
}
