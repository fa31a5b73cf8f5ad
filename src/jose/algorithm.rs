use super::KeyError;

/// Hash functions appearing in algorithm parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, KeyError> {
        match name {
            "SHA-1" => Ok(HashAlgorithm::Sha1),
            "SHA-256" => Ok(HashAlgorithm::Sha256),
            "SHA-384" => Ok(HashAlgorithm::Sha384),
            "SHA-512" => Ok(HashAlgorithm::Sha512),
            other => Err(KeyError::UnsupportedAlg(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyWrap {
    A128Kw,
    A192Kw,
    A256Kw,
}

/// The scheme and parameters an algorithm name dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    RsaPss { hash: HashAlgorithm },
    RsaPkcs1 { hash: HashAlgorithm },
    RsaOaep { hash: HashAlgorithm },
    Ecdsa { curve: &'static str },
    /// Curve (Ed25519/Ed448) is taken from the key bytes.
    EdDsa,
    /// Curve (P-x, X25519, X448) is taken from the key bytes.
    Ecdh { wrap: Option<KeyWrap> },
    Hmac { hash: HashAlgorithm },
    AesGcm { key_bits: u16 },
    AesGcmKw { key_bits: u16 },
    AesKw { key_bits: u16 },
    AesCbcHmac { key_bits: u16, hash: HashAlgorithm },
}

macro_rules! algorithms {
    ($($(#[$meta:meta])* $variant:ident : $name:literal => $scheme:expr),* $(,)?) => {
        /// JOSE algorithm registry.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Algorithm {
            $($(#[$meta])* $variant),*
        }

        impl Algorithm {
            pub fn name(&self) -> &'static str {
                match self {
                    $(Algorithm::$variant => $name),*
                }
            }

            pub fn from_name(name: &str) -> Result<Self, KeyError> {
                match name {
                    $($name => Ok(Algorithm::$variant),)*
                    other => Err(KeyError::UnsupportedAlg(other.to_string())),
                }
            }

            pub fn scheme(&self) -> Scheme {
                match self {
                    $(Algorithm::$variant => $scheme),*
                }
            }
        }
    };
}

algorithms! {
    /// RSASSA-PSS using SHA-256 and MGF1 with SHA-256.
    Ps256: "PS256" => Scheme::RsaPss { hash: HashAlgorithm::Sha256 },
    /// RSASSA-PSS using SHA-384 and MGF1 with SHA-384.
    Ps384: "PS384" => Scheme::RsaPss { hash: HashAlgorithm::Sha384 },
    /// RSASSA-PSS using SHA-512 and MGF1 with SHA-512.
    Ps512: "PS512" => Scheme::RsaPss { hash: HashAlgorithm::Sha512 },
    /// RSASSA-PKCS1-v1_5 using SHA-256.
    Rs256: "RS256" => Scheme::RsaPkcs1 { hash: HashAlgorithm::Sha256 },
    /// RSASSA-PKCS1-v1_5 using SHA-384.
    Rs384: "RS384" => Scheme::RsaPkcs1 { hash: HashAlgorithm::Sha384 },
    /// RSASSA-PKCS1-v1_5 using SHA-512.
    Rs512: "RS512" => Scheme::RsaPkcs1 { hash: HashAlgorithm::Sha512 },
    /// RSAES-OAEP with its RFC 7518 default SHA-1 parameters.
    RsaOaep: "RSA-OAEP" => Scheme::RsaOaep { hash: HashAlgorithm::Sha1 },
    RsaOaep256: "RSA-OAEP-256" => Scheme::RsaOaep { hash: HashAlgorithm::Sha256 },
    RsaOaep384: "RSA-OAEP-384" => Scheme::RsaOaep { hash: HashAlgorithm::Sha384 },
    RsaOaep512: "RSA-OAEP-512" => Scheme::RsaOaep { hash: HashAlgorithm::Sha512 },
    /// ECDSA using P-256 and SHA-256.
    Es256: "ES256" => Scheme::Ecdsa { curve: "P-256" },
    /// ECDSA using P-384 and SHA-384.
    Es384: "ES384" => Scheme::Ecdsa { curve: "P-384" },
    /// ECDSA using P-521 and SHA-512.
    Es512: "ES512" => Scheme::Ecdsa { curve: "P-521" },
    /// Edwards-curve signatures; Ed25519 or Ed448 depending on the key.
    EdDsa: "EdDSA" => Scheme::EdDsa,
    /// ECDH-ES with direct key agreement.
    EcdhEs: "ECDH-ES" => Scheme::Ecdh { wrap: None },
    EcdhEsA128Kw: "ECDH-ES+A128KW" => Scheme::Ecdh { wrap: Some(KeyWrap::A128Kw) },
    EcdhEsA192Kw: "ECDH-ES+A192KW" => Scheme::Ecdh { wrap: Some(KeyWrap::A192Kw) },
    EcdhEsA256Kw: "ECDH-ES+A256KW" => Scheme::Ecdh { wrap: Some(KeyWrap::A256Kw) },
    /// HMAC using SHA-256.
    Hs256: "HS256" => Scheme::Hmac { hash: HashAlgorithm::Sha256 },
    /// HMAC using SHA-384.
    Hs384: "HS384" => Scheme::Hmac { hash: HashAlgorithm::Sha384 },
    /// HMAC using SHA-512.
    Hs512: "HS512" => Scheme::Hmac { hash: HashAlgorithm::Sha512 },
    A128Gcm: "A128GCM" => Scheme::AesGcm { key_bits: 128 },
    A192Gcm: "A192GCM" => Scheme::AesGcm { key_bits: 192 },
    A256Gcm: "A256GCM" => Scheme::AesGcm { key_bits: 256 },
    A128GcmKw: "A128GCMKW" => Scheme::AesGcmKw { key_bits: 128 },
    A192GcmKw: "A192GCMKW" => Scheme::AesGcmKw { key_bits: 192 },
    A256GcmKw: "A256GCMKW" => Scheme::AesGcmKw { key_bits: 256 },
    A128Kw: "A128KW" => Scheme::AesKw { key_bits: 128 },
    A192Kw: "A192KW" => Scheme::AesKw { key_bits: 192 },
    A256Kw: "A256KW" => Scheme::AesKw { key_bits: 256 },
    A128CbcHs256: "A128CBC-HS256" => Scheme::AesCbcHmac { key_bits: 128, hash: HashAlgorithm::Sha256 },
    A192CbcHs384: "A192CBC-HS384" => Scheme::AesCbcHmac { key_bits: 192, hash: HashAlgorithm::Sha384 },
    A256CbcHs512: "A256CBC-HS512" => Scheme::AesCbcHmac { key_bits: 256, hash: HashAlgorithm::Sha512 },
}

impl Algorithm {
    /// Content-encryption key length in bytes, for the AES families.
    pub fn key_length(&self) -> Option<usize> {
        match self.scheme() {
            Scheme::AesGcm { key_bits }
            | Scheme::AesGcmKw { key_bits }
            | Scheme::AesKw { key_bits } => Some(usize::from(key_bits) / 8),
            // CBC-HS composites take a double-length key.
            Scheme::AesCbcHmac { key_bits, .. } => Some(usize::from(key_bits) / 4),
            _ => None,
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
