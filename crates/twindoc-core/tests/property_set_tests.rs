//! Tests for the property set merge/diff engine

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use twindoc_core::{Diff, MalformedJsonError, PropertySet, ValidationError};

fn map(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect()
}

#[test]
fn test_update_returns_changed_subset() {
    let set = PropertySet::new();
    set.add_property("key1", &json!("value1"), None).unwrap();

    let result = set
        .update(&map(&[("key1", json!("value1")), ("key2", json!(1234))]))
        .unwrap();

    // key1 is unchanged, only key2 is reported back
    assert_eq!(result, Some(json!({"key2": 1234})));
    assert_eq!(set.size(), 2);
}

#[test]
fn test_update_is_idempotent() {
    let set = PropertySet::new();
    let incoming = map(&[("key1", json!("value1")), ("key2", json!(1234))]);

    let first = set.update(&incoming).unwrap();
    assert_eq!(first, Some(json!({"key1": "value1", "key2": 1234})));

    let second = set.update(&incoming).unwrap();
    assert_eq!(second, None);
}

#[test]
fn test_update_empty_input_is_none() {
    let set = PropertySet::new();
    assert_eq!(set.update(&BTreeMap::new()).unwrap(), None);
}

#[test]
fn test_update_with_metadata_always_reports() {
    let set = PropertySet::new();
    set.enable_metadata();
    let incoming = map(&[("key1", json!("value1"))]);

    set.update(&incoming).unwrap();

    // same value, but the refreshed stamp makes it a change again
    let second = set.update(&incoming).unwrap().unwrap();
    assert_eq!(second["key1"], json!("value1"));
    assert!(second["$metadata"]["key1"]["$lastUpdated"].is_string());
    // the scratch set carries no version
    assert!(second.get("$version").is_none());
}

#[test]
fn test_update_propagates_validation_failures() {
    let set = PropertySet::new();
    let err = set
        .update(&map(&[("bad key", json!("value1"))]))
        .unwrap_err();
    assert_eq!(err, ValidationError::IllegalCharacter);
}

#[test]
fn test_tombstone_removes_entry() {
    let set = PropertySet::new();
    set.add_property("key3", &json!("value3"), None).unwrap();
    set.add_property("keep", &json!("kept"), None).unwrap();
    assert_eq!(set.size(), 2);

    let diff = set.merge_from_json(&json!({"key3": null}), None).unwrap();

    assert_eq!(set.size(), 1);
    assert_eq!(set.get("key3"), None);
    assert_eq!(diff.get("key3"), Some(&None));
    assert_eq!(set.get("keep"), Some(json!("kept")));
}

#[test]
fn test_merge_diff_is_minimal() {
    let set = PropertySet::new();
    set.merge_from_json(&json!({"a": 1, "b": 2}), None).unwrap();

    let diff = set
        .merge_from_json(&json!({"a": 1, "b": 3, "c": 4}), None)
        .unwrap();

    assert_eq!(diff.len(), 2);
    assert_eq!(diff.get("b"), Some(&Some("3".to_string())));
    assert_eq!(diff.get("c"), Some(&Some("4".to_string())));
    assert!(!diff.contains_key("a"));
}

#[test]
fn test_metadata_only_change_yields_diff() {
    let set = PropertySet::new();
    set.enable_metadata();
    set.merge_from_json(&json!({"key1": "value1"}), None).unwrap();

    // identical value, refreshed service metadata
    let diff = set
        .merge_from_json(
            &json!({
                "key1": "value1",
                "$metadata": {
                    "key1": {
                        "$lastUpdated": "2017-02-09T17:10:12.3456Z",
                        "$lastUpdatedVersion": 5
                    }
                }
            }),
            None,
        )
        .unwrap();

    assert_eq!(diff.get("key1"), Some(&Some("value1".to_string())));
    let record = set.metadata("key1").unwrap();
    assert_eq!(record.last_updated(), "2017-02-09T17:10:12.3456Z");
    assert_eq!(record.last_updated_version(), Some(5));
}

#[test]
fn test_metadata_phase_silent_when_disabled() {
    let set = PropertySet::new();
    set.merge_from_json(&json!({"key1": "value1"}), None).unwrap();

    let diff = set
        .merge_from_json(
            &json!({
                "key1": "value1",
                "$metadata": {"key1": {"$lastUpdated": "2017-02-09T17:10:12.3456Z"}}
            }),
            None,
        )
        .unwrap();

    assert!(diff.is_empty());
}

#[test]
fn test_round_trip_without_reserved_keys() {
    let incoming = json!({"key1": "value1", "key2": 1234, "key3": true});
    let set = PropertySet::new();
    set.merge_from_json(&incoming, None).unwrap();

    assert_eq!(set.to_json(), incoming);
}

#[test]
fn test_to_json_with_version_and_metadata() {
    let set = PropertySet::new();
    set.enable_metadata();
    set.merge_from_json(&json!({"key1": "value1", "$version": 3}), None)
        .unwrap();

    let out = set.to_json();
    assert_eq!(out["key1"], json!("value1"));
    assert_eq!(out["$version"], json!(3));
    assert!(out["$metadata"]["key1"]["$lastUpdated"].is_string());
    // the merge path stamps without a version
    assert!(out["$metadata"]["key1"].get("$lastUpdatedVersion").is_none());
}

#[test]
fn test_version_phase_applies_before_fields_failure() {
    let set = PropertySet::new();

    // "bad key" fails the fields phase after $version and "abc" commit;
    // nothing is rolled back
    let err = set
        .merge_from_json(
            &json!({"$version": 9, "abc": "applied", "bad key": "x"}),
            None,
        )
        .unwrap_err();

    assert!(matches!(
        err,
        MalformedJsonError::InvalidKey(ValidationError::IllegalCharacter)
    ));
    assert_eq!(set.version(), Some(9));
    assert_eq!(set.get("abc"), Some(json!("applied")));
}

#[test]
fn test_callback_receives_diff() {
    let seen: Arc<Mutex<Option<Diff>>> = Arc::new(Mutex::new(None));
    let seen_inner = seen.clone();
    let on_change = move |diff: &Diff| {
        *seen_inner.lock().unwrap() = Some(diff.clone());
    };

    let set = PropertySet::new();
    set.add_property("key3", &json!("value3"), None).unwrap();
    set.merge_from_json(&json!({"key1": "value4", "key3": null}), Some(&on_change))
        .unwrap();

    let diff = seen.lock().unwrap().clone().unwrap();
    assert_eq!(diff.get("key1"), Some(&Some("value4".to_string())));
    assert_eq!(diff.get("key3"), Some(&None));
}

#[test]
fn test_callback_skipped_on_empty_diff() {
    let count = Arc::new(Mutex::new(0u32));
    let count_inner = count.clone();
    let on_change = move |_: &Diff| {
        *count_inner.lock().unwrap() += 1;
    };

    let set = PropertySet::new();
    set.merge_from_json(&json!({"key1": "value1"}), Some(&on_change))
        .unwrap();
    set.merge_from_json(&json!({"key1": "value1"}), Some(&on_change))
        .unwrap();

    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn test_merge_rejects_non_object() {
    let set = PropertySet::new();
    let err = set.merge_from_json(&json!([1, 2, 3]), None).unwrap_err();
    assert!(matches!(err, MalformedJsonError::NotAnObject));
}

#[test]
fn test_case_sensitive_keys() {
    let set = PropertySet::new();
    set.add_property("Key", &json!("upper"), None).unwrap();
    set.add_property("key", &json!("lower"), None).unwrap();

    assert_eq!(set.size(), 2);
    assert_eq!(set.get("Key"), Some(json!("upper")));
    assert_eq!(set.get("key"), Some(json!("lower")));
}
