//! Error taxonomy shared by every engine crate.
//!
//! Engine errors report a class so the outer surface can map them to
//! transport-level codes without knowing every variant.

use serde::{Deserialize, Serialize};

/// Broad error class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rejected input or a failed precondition. Never retried automatically.
    Validation,
    /// Referenced clip, profile or request does not exist.
    NotFound,
    /// Missing reward rate or provider credentials. Fatal.
    Configuration,
    /// The external transfer provider failed.
    Provider,
    /// Storage or other internal failure. The enclosing transaction rolled back.
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Configuration => "configuration",
            Self::Provider => "provider",
            Self::Internal => "internal",
        }
    }
}
