//! Property-based test generators using proptest.

use corvus_core::JsonObject;
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for document keys such as `users/42`.
pub fn document_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}/[0-9]{1,6}").expect("Invalid regex")
}

/// Strategy for JSON scalars.
pub fn json_scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[ -~]{0,24}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for JSON values nested up to three levels.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    json_scalar_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Strategy for document bodies with plain property names.
pub fn document_body_strategy() -> impl Strategy<Value = JsonObject> {
    prop::collection::btree_map("[a-zA-Z][a-zA-Z0-9]{0,11}", json_value_strategy(), 0..8)
        .prop_map(|map| map.into_iter().collect())
}

/// Strategy for caller metadata, some of whose names carry the reserved
/// `@` prefix.
pub fn metadata_strategy() -> impl Strategy<Value = JsonObject> {
    prop::collection::btree_map("@?[A-Z][a-zA-Z-]{0,15}", json_scalar_strategy(), 0..6)
        .prop_map(|map| map.into_iter().collect())
}

/// Strategy for attachment contents.
pub fn attachment_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}
