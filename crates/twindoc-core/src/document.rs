//! The twin document: tags plus desired/reported property sets
//!
//! Assembles and dispatches the top-level JSON shape and owns the
//! per-side change callbacks. Transport hands this type decoded JSON
//! text; it hands back serialized state and forwards diffs to the
//! application.

use crate::error::{MalformedJsonError, ValidationError};
use crate::property_set::{ChangeCallback, PropertySet};
use crate::tags::TwinTags;
use crate::Diff;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A device's twin: optional tags and the two property sides.
///
/// Callbacks are owned per document instance and passed explicitly into
/// each merge; two documents never share notification state. Desired and
/// reported sets lock independently; there is no document-level lock, so
/// no ordering holds between concurrent operations on the two sides.
#[derive(Default)]
pub struct TwinDocument {
    tags: RwLock<Option<TwinTags>>,
    desired: PropertySet,
    reported: PropertySet,
    on_desired: Option<Box<ChangeCallback>>,
    on_reported: Option<Box<ChangeCallback>>,
}

impl TwinDocument {
    /// An empty document: no tags, no callbacks, both sides empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// A document that notifies on desired-side changes.
    pub fn with_desired_callback<F>(on_desired: F) -> Self
    where
        F: Fn(&Diff) + Send + Sync + 'static,
    {
        Self {
            on_desired: Some(Box::new(on_desired)),
            ..Self::default()
        }
    }

    /// A document that notifies on both sides.
    pub fn with_callbacks<D, R>(on_desired: D, on_reported: R) -> Self
    where
        D: Fn(&Diff) + Send + Sync + 'static,
        R: Fn(&Diff) + Send + Sync + 'static,
    {
        Self {
            on_desired: Some(Box::new(on_desired)),
            on_reported: Some(Box::new(on_reported)),
            ..Self::default()
        }
    }

    pub fn set_desired_callback<F>(&mut self, callback: F)
    where
        F: Fn(&Diff) + Send + Sync + 'static,
    {
        self.on_desired = Some(Box::new(callback));
    }

    pub fn set_reported_callback<F>(&mut self, callback: F)
    where
        F: Fn(&Diff) + Send + Sync + 'static,
    {
        self.on_reported = Some(Box::new(callback));
    }

    fn tags_read(&self) -> RwLockReadGuard<'_, Option<TwinTags>> {
        self.tags.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn tags_write(&self) -> RwLockWriteGuard<'_, Option<TwinTags>> {
        self.tags.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the empty tags container. Idempotent; once enabled, tags
    /// are always serialized, even when empty.
    pub fn enable_tags(&self) {
        self.tags_write().get_or_insert_with(TwinTags::new);
    }

    /// Turn on metadata tracking for both property sides.
    pub fn enable_metadata(&self) {
        self.desired.enable_metadata();
        self.reported.enable_metadata();
    }

    /// Add one tag property. Inserting a tag is explicit enablement, so
    /// the container is created on first use.
    pub fn add_tag(&self, tag: &str, key: &str, value: &Value) -> Result<(), ValidationError> {
        self.tags_write()
            .get_or_insert_with(TwinTags::new)
            .add_tag(tag, key, value)
    }

    pub fn get_tag_property(&self, tag: &str, key: &str) -> Option<String> {
        self.tags_read().as_ref()?.get_tag_property(tag, key)
    }

    pub fn desired(&self) -> &PropertySet {
        &self.desired
    }

    pub fn reported(&self) -> &PropertySet {
        &self.reported
    }

    pub fn get_desired_version(&self) -> Option<i64> {
        self.desired.version()
    }

    pub fn get_reported_version(&self) -> Option<i64> {
        self.reported.version()
    }

    /// Apply direct-API desired updates. The map overload fires no
    /// callback; the returned JSON is the changed subset for transport.
    pub fn update_desired(
        &self,
        properties: &BTreeMap<String, Value>,
    ) -> Result<Option<Value>, ValidationError> {
        self.desired.update(properties)
    }

    /// Apply direct-API reported updates, same contract as the desired
    /// side.
    pub fn update_reported(
        &self,
        properties: &BTreeMap<String, Value>,
    ) -> Result<Option<Value>, ValidationError> {
        self.reported.update(properties)
    }

    /// Merge a desired-properties JSON subtree received from transport.
    /// Empty input is a deliberate no-op. Fires the desired callback on a
    /// non-empty diff.
    pub fn update_desired_json(&self, json: &str) -> Result<(), MalformedJsonError> {
        if json.trim().is_empty() {
            return Ok(());
        }
        let tree: Value = serde_json::from_str(json)?;
        self.desired
            .merge_from_json(&tree, self.on_desired.as_deref())?;
        Ok(())
    }

    /// Merge a reported-properties JSON subtree, reported-side contract.
    pub fn update_reported_json(&self, json: &str) -> Result<(), MalformedJsonError> {
        if json.trim().is_empty() {
            return Ok(());
        }
        let tree: Value = serde_json::from_str(json)?;
        self.reported
            .merge_from_json(&tree, self.on_reported.as_deref())?;
        Ok(())
    }

    /// Merge a complete twin document.
    ///
    /// The envelope is validated before any state changes: only `"tags"`
    /// and `"properties"` at the top level, only `"desired"` and
    /// `"reported"` under `"properties"`. The two sides then merge
    /// independently; both run even if the first fails and the first
    /// error is returned, so a failure is not atomic across sides.
    pub fn update_twin(&self, json: &str) -> Result<(), MalformedJsonError> {
        if json.trim().is_empty() {
            return Ok(());
        }
        let tree: Value = serde_json::from_str(json)?;
        let obj = tree.as_object().ok_or(MalformedJsonError::NotAnObject)?;

        for key in obj.keys() {
            if key != "tags" && key != "properties" {
                return Err(MalformedJsonError::UnknownField(key.clone()));
            }
        }
        let properties = match obj.get("properties") {
            Some(subtree) => {
                let properties = subtree
                    .as_object()
                    .ok_or(MalformedJsonError::NotAnObject)?;
                for key in properties.keys() {
                    if key != "desired" && key != "reported" {
                        return Err(MalformedJsonError::UnknownField(key.clone()));
                    }
                }
                Some(properties)
            }
            None => None,
        };

        if let Some(tags_tree) = obj.get("tags") {
            // a tagged document enables tags implicitly
            self.tags_write()
                .get_or_insert_with(TwinTags::new)
                .merge_from_json(tags_tree)?;
        }

        if let Some(properties) = properties {
            tracing::trace!(
                desired = properties.contains_key("desired"),
                reported = properties.contains_key("reported"),
                "dispatching twin update"
            );
            let desired_result = properties
                .get("desired")
                .map(|subtree| self.desired.merge_from_json(subtree, self.on_desired.as_deref()));
            let reported_result = properties.get("reported").map(|subtree| {
                self.reported
                    .merge_from_json(subtree, self.on_reported.as_deref())
            });

            if let Some(Err(err)) = desired_result {
                return Err(err);
            }
            if let Some(Err(err)) = reported_result {
                return Err(err);
            }
        }

        Ok(())
    }

    /// Assemble the full document for transport. `tags` is omitted
    /// entirely when never enabled.
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        if let Some(tags) = self.tags_read().as_ref() {
            root.insert("tags".to_string(), tags.to_json());
        }

        let mut properties = Map::new();
        properties.insert("desired".to_string(), self.desired.to_json());
        properties.insert("reported".to_string(), self.reported.to_json());
        root.insert("properties".to_string(), Value::Object(properties));

        Value::Object(root)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document_shape() {
        let twin = TwinDocument::new();
        assert_eq!(
            twin.to_json_string(),
            r#"{"properties":{"desired":{},"reported":{}}}"#
        );
    }

    #[test]
    fn test_enable_tags_is_idempotent() {
        let twin = TwinDocument::new();
        twin.enable_tags();
        twin.add_tag("location", "building", &json!("43")).unwrap();
        twin.enable_tags();
        assert_eq!(
            twin.get_tag_property("location", "building"),
            Some("43".to_string())
        );
    }

    #[test]
    fn test_tags_serialized_once_enabled() {
        let twin = TwinDocument::new();
        twin.enable_tags();
        assert_eq!(
            twin.to_json(),
            json!({"properties": {"desired": {}, "reported": {}}, "tags": {}})
        );
    }

    #[test]
    fn test_unknown_top_level_field() {
        let twin = TwinDocument::new();
        let err = twin.update_twin(r#"{"bogus": {}}"#).unwrap_err();
        assert!(matches!(err, MalformedJsonError::UnknownField(field) if field == "bogus"));
    }

    #[test]
    fn test_unknown_second_level_field() {
        let twin = TwinDocument::new();
        let err = twin
            .update_twin(r#"{"properties": {"wished": {}}}"#)
            .unwrap_err();
        assert!(matches!(err, MalformedJsonError::UnknownField(field) if field == "wished"));
    }

    #[test]
    fn test_empty_input_is_a_no_op() {
        let twin = TwinDocument::new();
        twin.update_twin("").unwrap();
        twin.update_desired_json("  ").unwrap();
        twin.update_reported_json("").unwrap();
        assert_eq!(twin.desired().size(), 0);
    }

    #[test]
    fn test_envelope_rejected_before_state_change() {
        let twin = TwinDocument::new();
        let err = twin
            .update_twin(r#"{"properties": {"desired": {"key1": "value1"}}, "bogus": 1}"#)
            .unwrap_err();
        assert!(matches!(err, MalformedJsonError::UnknownField(_)));
        assert_eq!(twin.desired().size(), 0);
    }
}
