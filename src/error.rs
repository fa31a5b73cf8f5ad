use crate::cbor::CborError;
use crate::context::CapabilityError;
use crate::cose::CoseError;
use crate::jose::KeyError;
use crate::mdl::presentment::BuilderError;
use crate::mdl::verifier::VerifierError;
use crate::mdl::MdlError;
use crate::oid4vp::jarm::JarmError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error: one machine-readable kind per failing subsystem, each
/// carrying its own cause chain.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("CBOR: {0}")]
    Cbor(#[from] CborError),
    #[error("COSE: {0}")]
    Cose(#[from] CoseError),
    #[error("key material: {0}")]
    Key(#[from] KeyError),
    #[error("mdoc: {0}")]
    Mdl(#[from] MdlError),
    #[error("device response builder: {0}")]
    Builder(#[from] BuilderError),
    #[error("verification: {0}")]
    Verification(#[from] VerifierError),
    #[error("JARM: {0}")]
    Jarm(#[from] JarmError),
    #[error("capability: {0}")]
    Capability(#[from] CapabilityError),
}
