//! One side (desired or reported) of the twin document
//!
//! A `PropertySet` holds validated key/value entries, the whole-set
//! `$version`, and optional per-key metadata. It implements the
//! three-phase merge (version, fields, metadata) that turns an incoming
//! JSON subtree into a minimal diff for change notification.

use crate::error::{MalformedJsonError, ValidationError};
use crate::metadata::MetadataRecord;
use crate::validate::{self, coerce_string};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Minimal set of changes produced by one merge.
///
/// `None` marks a deletion (tombstone); `Some` carries the new value in
/// string-coerced form.
pub type Diff = BTreeMap<String, Option<String>>;

/// Change-notification callback, invoked once per non-empty merge on the
/// caller's thread.
pub type ChangeCallback = dyn Fn(&Diff) + Send + Sync;

/// A stored property: its value plus optional update metadata.
///
/// Values are never stored as JSON null; a null in an incoming merge
/// deletes the entry instead. Metadata is present exactly when the owning
/// set has metadata enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    value: Value,
    metadata: Option<MetadataRecord>,
}

impl PropertyEntry {
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn metadata(&self) -> Option<&MetadataRecord> {
        self.metadata.as_ref()
    }
}

/// State guarded by the set's lock.
#[derive(Debug, Default)]
struct SetInner {
    entries: BTreeMap<String, PropertyEntry>,
    version: Option<i64>,
    metadata_enabled: bool,
}

impl SetInner {
    /// Direct-API insert: full key and value validation, fresh metadata
    /// stamp. Returns whether the set observably changed.
    fn add_entry(
        &mut self,
        key: &str,
        value: &Value,
        version: Option<i64>,
    ) -> Result<bool, ValidationError> {
        validate::validate_key(key)?;
        validate::validate_value(value)?;

        // Metadata counts as a change even for an identical value: the
        // refreshed timestamp must propagate to observers.
        let changed = match self.entries.get(key) {
            None => true,
            Some(existing) => existing.value != *value || self.metadata_enabled,
        };

        let metadata = self
            .metadata_enabled
            .then(|| MetadataRecord::stamped(version));
        self.entries.insert(
            key.to_string(),
            PropertyEntry {
                value: value.clone(),
                metadata,
            },
        );

        Ok(changed)
    }

    /// The three-phase merge. Phases commit in order with no rollback: a
    /// failure in a later phase leaves earlier phases applied.
    fn merge_tree(&mut self, obj: &Map<String, Value>) -> Result<Diff, MalformedJsonError> {
        // Phase 1: $version overwrites unconditionally, no comparison.
        if let Some(incoming) = obj.get("$version") {
            let version = incoming
                .as_i64()
                .ok_or(MalformedJsonError::InvalidVersion)?;
            self.version = Some(version);
        }

        let mut diff = Diff::new();

        // Phase 2: application fields. Null deletes, unchanged values are
        // not recorded.
        for (key, value) in obj {
            if validate::is_reserved(key) {
                continue;
            }
            validate::validate_key(key)?;

            if value.is_null() {
                if self.entries.remove(key).is_some() {
                    diff.insert(key.clone(), None);
                }
            } else if let Some(entry) = self.entries.get_mut(key) {
                if entry.value != *value {
                    entry.value = value.clone();
                    if let Some(record) = &mut entry.metadata {
                        record.stamp(None);
                    }
                    diff.insert(key.clone(), Some(coerce_string(value)));
                }
            } else {
                let metadata = self.metadata_enabled.then(|| MetadataRecord::stamped(None));
                self.entries.insert(
                    key.clone(),
                    PropertyEntry {
                        value: value.clone(),
                        metadata,
                    },
                );
                diff.insert(key.clone(), Some(coerce_string(value)));
            }
        }

        // Phase 3: service-side $metadata. A metadata-only change still
        // has to reach observers, so it joins the diff with the current
        // value.
        if let Some(metadata_tree) = obj.get("$metadata") {
            let metadata_obj = metadata_tree
                .as_object()
                .ok_or(MalformedJsonError::NotAnObject)?;
            for (key, entry_tree) in metadata_obj {
                let (last_updated, version) = parse_metadata_entry(key, entry_tree)?;
                if let Some(entry) = self.entries.get_mut(key) {
                    if let Some(record) = &mut entry.metadata {
                        let changed = record.apply(last_updated, version);
                        if changed && self.metadata_enabled && !diff.contains_key(key) {
                            diff.insert(key.clone(), Some(coerce_string(&entry.value)));
                        }
                    }
                }
            }
        }

        Ok(diff)
    }

    fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (key, entry) in &self.entries {
            obj.insert(key.clone(), entry.value.clone());
        }
        if self.metadata_enabled {
            let mut metadata_obj = Map::new();
            for (key, entry) in &self.entries {
                if let Some(record) = &entry.metadata {
                    metadata_obj.insert(key.clone(), record.to_json());
                }
            }
            obj.insert("$metadata".to_string(), Value::Object(metadata_obj));
        }
        if let Some(version) = self.version {
            obj.insert("$version".to_string(), version.into());
        }
        Value::Object(obj)
    }
}

/// Parse one `$metadata` entry: `$lastUpdated` is required, the version
/// is optional.
fn parse_metadata_entry<'a>(
    key: &str,
    tree: &'a Value,
) -> Result<(&'a str, Option<i64>), MalformedJsonError> {
    let obj = tree
        .as_object()
        .ok_or_else(|| MalformedJsonError::InvalidMetadata(key.to_string()))?;
    let last_updated = obj
        .get("$lastUpdated")
        .and_then(Value::as_str)
        .ok_or_else(|| MalformedJsonError::InvalidMetadata(key.to_string()))?;
    let version = match obj.get("$lastUpdatedVersion") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_i64()
                .ok_or_else(|| MalformedJsonError::InvalidMetadata(key.to_string()))?,
        ),
    };
    Ok((last_updated, version))
}

/// One side of the twin: desired or reported properties.
///
/// All mutation goes through an exclusive lock held for the full
/// multi-phase merge, so merges on the same set are atomic with respect
/// to each other and to reads. The desired and reported sets of a
/// document are fully independent.
#[derive(Debug, Default)]
pub struct PropertySet {
    inner: RwLock<SetInner>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, SetInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SetInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Turn on per-key metadata tracking. Monotonic: there is no way to
    /// turn it back off. Entries already present are stamped now, so
    /// every entry of an enabled set carries a record.
    pub fn enable_metadata(&self) {
        let mut inner = self.write();
        if inner.metadata_enabled {
            return;
        }
        inner.metadata_enabled = true;
        for entry in inner.entries.values_mut() {
            entry.metadata = Some(MetadataRecord::stamped(None));
        }
    }

    pub fn is_metadata_enabled(&self) -> bool {
        self.read().metadata_enabled
    }

    /// Add or replace a property through the direct API.
    ///
    /// Returns `Ok(true)` when the set observably changed: the key is
    /// new, the value differs, or metadata is enabled (a fresh timestamp
    /// is itself a change).
    pub fn add_property(
        &self,
        key: &str,
        value: &Value,
        version: Option<i64>,
    ) -> Result<bool, ValidationError> {
        self.write().add_entry(key, value, version)
    }

    /// Apply a map of direct-API updates and serialize what changed.
    ///
    /// Returns `Ok(None)` when the input is empty or nothing changed,
    /// else the JSON object of the changed entries (no `$version`
    /// wrapper; the caller supplies that context). Not atomic: a
    /// validation failure mid-map leaves earlier pairs applied.
    pub fn update(
        &self,
        incoming: &BTreeMap<String, Value>,
    ) -> Result<Option<Value>, ValidationError> {
        if incoming.is_empty() {
            return Ok(None);
        }

        let mut inner = self.write();
        let mut scratch = SetInner {
            metadata_enabled: inner.metadata_enabled,
            ..SetInner::default()
        };

        for (key, value) in incoming {
            if inner.add_entry(key, value, None)? {
                scratch.add_entry(key, value, None)?;
            }
        }

        if scratch.entries.is_empty() {
            Ok(None)
        } else {
            Ok(Some(scratch.to_json()))
        }
    }

    /// Merge a decoded JSON subtree into this set.
    ///
    /// Runs the version, fields and metadata phases in order under one
    /// exclusive lock; the phases are not rolled back on a later-phase
    /// failure. The callback fires after the lock is released, iff the
    /// diff is non-empty.
    pub fn merge_from_json(
        &self,
        tree: &Value,
        on_change: Option<&ChangeCallback>,
    ) -> Result<Diff, MalformedJsonError> {
        let obj = tree.as_object().ok_or(MalformedJsonError::NotAnObject)?;

        let diff = self.write().merge_tree(obj)?;

        if !diff.is_empty() {
            tracing::debug!(changed = diff.len(), "property merge produced changes");
            if let Some(callback) = on_change {
                callback(&diff);
            }
        }

        Ok(diff)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().entries.get(key).map(|entry| entry.value.clone())
    }

    /// Value and metadata for one key as a single snapshot.
    pub fn entry(&self, key: &str) -> Option<PropertyEntry> {
        self.read().entries.get(key).cloned()
    }

    pub fn size(&self) -> usize {
        self.read().entries.len()
    }

    pub fn version(&self) -> Option<i64> {
        self.read().version
    }

    /// Metadata for one key, when tracked.
    pub fn metadata(&self, key: &str) -> Option<MetadataRecord> {
        self.read()
            .entries
            .get(key)
            .and_then(|entry| entry.metadata.clone())
    }

    /// All live entries with string-coerced values, `None` when empty.
    /// Tombstoned keys were removed at merge time and never surface here.
    pub fn property_map(&self) -> Option<BTreeMap<String, String>> {
        let inner = self.read();
        if inner.entries.is_empty() {
            return None;
        }
        Some(
            inner
                .entries
                .iter()
                .map(|(key, entry)| (key.clone(), coerce_string(&entry.value)))
                .collect(),
        )
    }

    /// Serialize the current state for transport.
    ///
    /// Emits `$metadata` whenever metadata is enabled (even empty) and
    /// `$version` whenever one has been set.
    pub fn to_json(&self) -> Value {
        self.read().to_json()
    }
}
