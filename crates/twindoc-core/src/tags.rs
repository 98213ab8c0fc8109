//! Device tags: a two-level string map independent of the property sets
//!
//! Tags use the same name validation as property keys but carry plain
//! string values only.

use crate::error::{MalformedJsonError, ValidationError};
use crate::validate::{self, coerce_string};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Tag buckets keyed by tag name, each holding key/value strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwinTags {
    tags: BTreeMap<String, BTreeMap<String, String>>,
}

impl TwinTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one key/value into a tag bucket, creating the bucket when
    /// absent. An existing key is replaced.
    pub fn add_tag(&mut self, tag: &str, key: &str, value: &Value) -> Result<(), ValidationError> {
        validate::validate_key(tag)?;
        validate::validate_key(key)?;
        validate::validate_value(value)?;

        self.tags
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string(), coerce_string(value));

        Ok(())
    }

    /// Add a whole map of properties under one tag.
    pub fn add_tag_map(
        &mut self,
        tag: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<(), ValidationError> {
        for (key, value) in properties {
            self.add_tag(tag, key, value)?;
        }
        Ok(())
    }

    pub fn get_tag_property(&self, tag: &str, key: &str) -> Option<String> {
        self.tags.get(tag)?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Merge an incoming `"tags"` subtree.
    ///
    /// Mirrors the property fields phase: a null bucket removes the tag,
    /// a null value inside a bucket removes that key, scalars are stored
    /// string-coerced.
    pub fn merge_from_json(&mut self, tree: &Value) -> Result<(), MalformedJsonError> {
        let obj = tree.as_object().ok_or(MalformedJsonError::NotAnObject)?;

        for (tag, bucket_tree) in obj {
            validate::validate_key(tag)?;

            if bucket_tree.is_null() {
                self.tags.remove(tag);
                continue;
            }

            let bucket_obj = bucket_tree
                .as_object()
                .ok_or(MalformedJsonError::NotAnObject)?;
            let bucket = self.tags.entry(tag.clone()).or_default();
            for (key, value) in bucket_obj {
                validate::validate_key(key)?;
                if value.is_null() {
                    bucket.remove(key);
                } else {
                    bucket.insert(key.clone(), coerce_string(value));
                }
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (tag, bucket) in &self.tags {
            let mut bucket_obj = Map::new();
            for (key, value) in bucket {
                bucket_obj.insert(key.clone(), Value::String(value.clone()));
            }
            obj.insert(tag.clone(), Value::Object(bucket_obj));
        }
        Value::Object(obj)
    }
}
