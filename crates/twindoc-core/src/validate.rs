//! Shape checks for property keys, tag names and direct-API values
//!
//! The same rules apply to property keys, tag names and tag keys. Names
//! are case-sensitive and never normalized.

use crate::error::ValidationError;
use serde_json::Value;

/// Maximum key/tag name length accepted on the wire.
pub const MAX_KEY_LENGTH: usize = 128;

const ILLEGAL_CHARS: [char; 3] = ['.', ' ', '$'];

/// Validate a property key or tag name.
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }
    if key.chars().count() > MAX_KEY_LENGTH {
        return Err(ValidationError::KeyTooLong);
    }
    if key.contains(&ILLEGAL_CHARS[..]) {
        return Err(ValidationError::IllegalCharacter);
    }
    Ok(())
}

/// Validate a value supplied through the direct (non-JSON) add API.
///
/// The JSON merge path bypasses this so a null can act as a tombstone.
pub fn validate_value(value: &Value) -> Result<(), ValidationError> {
    if value.is_null() {
        return Err(ValidationError::NullValue);
    }
    if coerce_string(value).is_empty() {
        return Err(ValidationError::EmptyValue);
    }
    Ok(())
}

/// Field names beginning with `$` are protocol metadata, never
/// application keys.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with('$')
}

/// String coercion used for diffs, property maps and tag values.
///
/// Strings render without quotes; everything else renders as its JSON
/// text.
pub fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
