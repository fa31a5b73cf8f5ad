//! Core engine for ISO/IEC 18013-5 mobile documents: deterministic CBOR,
//! COSE signing and MACs, mdoc issuance and selective disclosure, a
//! check-pipeline verifier, and JARM envelope handling for OpenID4VP
//! responses. Raw crypto, X.509 and JOSE primitives are injected through
//! the capability traits in [`context`]; software implementations ship in
//! [`crypto`], [`x509`] and [`jose::compact`].

pub mod cbor;
pub mod context;
pub mod cose;
pub mod crypto;
mod error;
pub mod jose;
pub mod mdl;
pub mod oid4vp;
pub mod x509;

pub use error::{Error, Result};
