//! Golden canonical-encoding and save-hash vectors.
//!
//! Any client that talks to the same remote store must produce these exact
//! bytes and hashes for the same instruction sets.

use serde::{Deserialize, Serialize};

/// A canonical-hash vector that can be shared with other clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// The instruction set as JSON (integers, text, booleans, null, arrays, objects).
    pub instructions_json: String,
    /// Expected canonical CBOR encoding (hex-encoded).
    pub canonical_hex: String,
    /// Expected SHA-256 save hash (hex-encoded).
    pub save_hash_hex: String,
}

fn vector(id: &str, description: &str, json: &str, canonical: &str, hash: &str) -> HashVector {
    HashVector {
        id: id.into(),
        description: description.into(),
        instructions_json: json.into(),
        canonical_hex: canonical.into(),
        save_hash_hex: hash.into(),
    }
}

/// Canonical hash vectors.
pub fn save_hash_vectors() -> Vec<HashVector> {
    vec![
        vector(
            "empty",
            "Empty instruction set",
            "{}",
            "a0",
            "c19a797fa1fd590cd2e5b42d1cf5f246e29b91684e2f87404b81dc345c7a56a0",
        ),
        vector(
            "gold_5",
            "Single small integer",
            r#"{"gold":5}"#,
            "a164676f6c6405",
            "a9ce1c1674b2b2348476e339f4b1f35b74b882d0d4411e15ba2681c34c8ac406",
        ),
        vector(
            "gold_level",
            "Two keys in sorted order",
            r#"{"level":2,"gold":5}"#,
            "a264676f6c6405656c6576656c02",
            "47bcee1c075720267da1c7b66e98f59497c74bc9b0d8df18d30decfdc1c6fb1b",
        ),
        vector(
            "hearts_negative",
            "Negative integer",
            r#"{"hearts":-1}"#,
            "a16668656172747320",
            "57b634fcdca6ee2e4cfce1594fbca2ab2599015fa483bab36e36b069904b18c0",
        ),
        vector(
            "mixed",
            "Text, list and nested map values",
            r#"{"title":"Knight","flags":[true,null],"inventory":{"sword":1,"bow":0}}"#,
            "a365666c61677382f5f6657469746c65664b6e6967687469696e76656e746f7279a263626f77006573776f726401",
            "add5dd4d4e6ea8917864e91c67f6089d92012f11e632e44f630087c5c9b4dc89",
        ),
    ]
}

/// Serializes all vectors as pretty JSON.
pub fn all_vectors_json() -> String {
    serde_json::to_string_pretty(&save_hash_vectors()).unwrap_or_default()
}

/// Encodes bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
