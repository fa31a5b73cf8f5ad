//! OpenID4VP input shapes and the JARM response envelope.

pub mod jarm;

use serde::{Deserialize, Serialize};

/// Presentation Definition (DIF Presentation Exchange), reduced to the
/// fields the mdoc flow consumes: descriptor ids are doc types, field paths
/// select `(namespace, element)` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationDefinition {
    pub id: String,
    #[serde(default)]
    pub input_descriptors: Vec<InputDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDescriptor {
    pub id: String,
    #[serde(default)]
    pub constraints: Constraints,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub fields: Vec<ConstraintField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintField {
    pub path: Vec<String>,
    #[serde(default)]
    pub intent_to_retain: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}
