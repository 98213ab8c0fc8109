//! Error taxonomy for the twin store
//!
//! Two families: shape failures on the direct add APIs, and parse or
//! dispatch failures on the JSON-accepting entry points.

use thiserror::Error;

/// Rejections from key/tag/value shape checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Key or tag name is empty
    #[error("key must not be empty")]
    EmptyKey,

    /// Key or tag name exceeds the 128 character wire limit
    #[error("key exceeds 128 characters")]
    KeyTooLong,

    /// Key or tag name contains '.', ' ' or '$'
    #[error("key contains an illegal character ('.', ' ' or '$')")]
    IllegalCharacter,

    /// Value supplied through the direct add API is null
    #[error("value must not be null")]
    NullValue,

    /// Value supplied through the direct add API stringifies to empty
    #[error("value must not be empty")]
    EmptyValue,
}

/// Failures from the JSON-accepting entry points.
#[derive(Debug, Error)]
pub enum MalformedJsonError {
    /// The input was not parseable JSON
    #[error("invalid json: {0}")]
    Parse(#[from] serde_json::Error),

    /// The input parsed but was not a JSON object where one is required
    #[error("expected a json object")]
    NotAnObject,

    /// An envelope field outside the twin document schema
    #[error("unrecognized field `{0}`")]
    UnknownField(String),

    /// A property or tag name in the incoming tree failed validation
    #[error("invalid key in json document: {0}")]
    InvalidKey(#[from] ValidationError),

    /// `$version` was present but not an integer
    #[error("`$version` must be an integer")]
    InvalidVersion,

    /// A `$metadata` entry was missing `$lastUpdated` or had the wrong shape
    #[error("malformed `$metadata` entry for key `{0}`")]
    InvalidMetadata(String),
}
