//! Twin document store
//!
//! This crate provides the in-memory core of a device twin:
//! - Dual-sided (desired/reported) validated key-value property storage
//! - Three-phase JSON merge (version, fields, metadata) producing minimal
//!   diffs with tombstone (delete-by-null) semantics
//! - Per-key last-updated metadata and whole-set versioning
//! - Change-notification callbacks wired per document instance
//!
//! Transport concerns (topics, request correlation, reconnect) live in
//! consumers of this crate: they hand in decoded JSON text and receive
//! serialized state or diffs back.

pub mod document;
pub mod error;
pub mod metadata;
pub mod property_set;
pub mod tags;
pub mod validate;

pub use document::TwinDocument;
pub use error::{MalformedJsonError, ValidationError};
pub use metadata::MetadataRecord;
pub use property_set::{ChangeCallback, Diff, PropertyEntry, PropertySet};
pub use tags::TwinTags;
