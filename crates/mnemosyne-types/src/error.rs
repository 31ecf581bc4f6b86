//! Shared error taxonomy for the data model.

use thiserror::Error;

use crate::name::Name;

/// Errors raised while encoding or decoding wire formats.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input does not follow the expected TLV layout.
    #[error("bad encoding: {0}")]
    BadEncoding(String),
}

impl CodecError {
    pub(crate) fn bad(msg: impl Into<String>) -> Self {
        CodecError::BadEncoding(msg.into())
    }
}

/// Errors raised by record construction and validation.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Underlying wire-format failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The name does not follow the `<producer>/RECORD/<seq>` convention.
    #[error("not a record name: {0}")]
    NotRecordName(Name),

    /// The record does not carry the configured number of preceding pointers.
    #[error("record carries {found} preceding pointers, {expected} required")]
    InsufficientPointers {
        /// Pointers present in the header.
        found: usize,
        /// Pointers required by configuration.
        expected: usize,
    },

    /// Two preceding pointers belong to the same producer.
    #[error("preceding pointers repeat producer {0}")]
    DuplicateProducer(Name),

    /// The record has been encoded and can no longer be modified.
    #[error("record is already built and cannot be modified")]
    AlreadyBuilt,
}

/// Raised when a data unit fails signature or policy validation.
#[derive(Debug, Error)]
#[error("verification failed for {name}: {reason}")]
pub struct ValidationError {
    /// Full name of the offending unit.
    pub name: Name,
    /// Human-readable failure description.
    pub reason: String,
}
