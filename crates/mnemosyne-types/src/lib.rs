#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **mnemosyne-types** – Core data model for the Mnemosyne event log.
//!
//! This crate sits at the very bottom of the crate graph and defines the
//! primitives every other crate builds on: hierarchical [`Name`]s, the
//! self-describing TLV wire codec, signed [`DataUnit`] packets, the
//! [`Record`] DAG node with its naming algebra, and the [`VersionVector`]
//! used for checkpointing sync progress. It makes no assumptions about
//! I/O, storage, or the network substrate.

pub mod data;
pub mod error;
pub mod name;
pub mod record;
pub mod tlv;
pub mod version_vector;

pub use data::{
    AcceptAllValidator, DataSigner, DataUnit, DataValidator, DigestSigner, DigestValidator,
    CONTENT_TYPE_BLOB, CONTENT_TYPE_ENCAPSULATED, SIGNATURE_TYPE_DIGEST,
};
pub use error::{CodecError, RecordError, ValidationError};
pub use name::{Component, Name};
pub use record::{Record, RECORD_KEYWORD};
pub use version_vector::VersionVector;
