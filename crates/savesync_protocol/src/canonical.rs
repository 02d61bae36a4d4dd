//! Canonical CBOR encoding of save instructions.
//!
//! The expected save hash of a batch is computed over these bytes, so the
//! encoding must be deterministic:
//! - Map keys are sorted length-first, then bytewise
//! - Integers use the shortest encoding
//! - All lengths are definite
//!
//! `InstructionValue` has no floats, which makes encoding infallible.

use crate::instructions::Instructions;
use crate::value::InstructionValue;
use std::cmp::Ordering;

/// Encodes a set of instructions to canonical CBOR bytes.
#[must_use]
pub fn to_canonical_bytes(instructions: &Instructions) -> Vec<u8> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode_instructions(instructions);
    encoder.into_bytes()
}

/// A canonical CBOR encoder for instruction values.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Encode a full instruction set as a map of field path to value.
    pub fn encode_instructions(&mut self, instructions: &Instructions) {
        self.encode_text_map(instructions.iter());
    }

    /// Encode a single value.
    pub fn encode_value(&mut self, value: &InstructionValue) {
        match value {
            // null is simple value 22
            InstructionValue::Null => self.buffer.push(0xf6),
            InstructionValue::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            InstructionValue::Integer(n) => self.encode_integer(*n),
            InstructionValue::Text(s) => self.encode_text(s),
            InstructionValue::Bytes(b) => {
                self.encode_head(2, b.len() as u64);
                self.buffer.extend_from_slice(b);
            }
            InstructionValue::List(items) => {
                self.encode_head(4, items.len() as u64);
                for item in items {
                    self.encode_value(item);
                }
            }
            InstructionValue::Map(entries) => self.encode_text_map(entries.iter()),
        }
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_head(0, n as u64);
        } else {
            // -1 encodes as 0, -2 as 1, ...
            self.encode_head(1, (-(n + 1)) as u64);
        }
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_head(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_text_map<'a>(&mut self, entries: impl Iterator<Item = (&'a String, &'a InstructionValue)>) {
        let mut sorted: Vec<_> = entries.collect();
        // Text keys: a longer string never has a shorter encoded head, so
        // comparing string lengths matches comparing encoded lengths.
        sorted.sort_by(|a, b| match a.0.len().cmp(&b.0.len()) {
            Ordering::Equal => a.0.as_bytes().cmp(b.0.as_bytes()),
            other => other,
        });

        self.encode_head(5, sorted.len() as u64);
        for (key, value) in sorted {
            self.encode_text(key);
            self.encode_value(value);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_head(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}
