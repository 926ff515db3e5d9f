//! Benchmark utilities.

#![deny(unsafe_code)]

use corvus_core::JsonObject;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

/// Generate a document body whose `payload` string is `size` characters long.
pub fn random_document(size: usize) -> JsonObject {
    let payload: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(size)
        .map(char::from)
        .collect();
    let mut body = JsonObject::new();
    body.insert("payload".to_string(), Value::String(payload));
    body.insert("rank".to_string(), Value::from(rand::thread_rng().gen::<u32>()));
    body
}

/// Generate random attachment content of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` keys under `collection`.
pub fn generate_keys(collection: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{collection}/{i}")).collect()
}

/// Generate test documents with the specified payload size.
pub fn generate_documents(count: usize, payload_size: usize) -> Vec<(String, JsonObject)> {
    generate_keys("bench", count)
        .into_iter()
        .map(|key| (key, random_document(payload_size)))
        .collect()
}
