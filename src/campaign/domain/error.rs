//! Error types for campaign domain parsing and metadata decoding.

use std::sync::Arc;
use thiserror::Error;

/// Error returned when a persisted enumeration value is not recognised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// Name of the enumeration being parsed.
    pub kind: &'static str,
    /// The rejected value.
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// Errors raised while encoding or decoding polymorphic metadata payloads.
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    /// The changeset names an external service without a metadata shape.
    #[error("unknown external service type: {0}")]
    UnknownServiceType(String),

    /// The event names a kind without a metadata shape.
    #[error("unknown changeset event kind: {0}")]
    UnknownEventKind(String),

    /// The metadata variant cannot describe the given event kind.
    #[error("metadata shape {shape} does not describe event kind {kind}")]
    KindMismatch {
        /// Event kind stored alongside the metadata.
        kind: String,
        /// Name of the metadata variant supplied.
        shape: &'static str,
    },

    /// The payload does not match the shape selected by its discriminator.
    #[error("malformed {discriminator} metadata: {source}")]
    Malformed {
        /// Service type or event kind that selected the shape.
        discriminator: String,
        /// Underlying JSON error.
        source: Arc<serde_json::Error>,
    },
}

impl MetadataError {
    pub(crate) fn malformed(discriminator: &str, err: serde_json::Error) -> Self {
        Self::Malformed {
            discriminator: discriminator.to_owned(),
            source: Arc::new(err),
        }
    }
}
