//! Values carried by save instructions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The new value a save instruction assigns to a field path.
///
/// There are no floats: every value has exactly one canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionValue {
    /// Clears the field.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<InstructionValue>),
    /// Nested map with text keys.
    Map(BTreeMap<String, InstructionValue>),
}

/// The type class of an [`InstructionValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueKind {
    /// `Null`.
    Null,
    /// `Bool`.
    Bool,
    /// `Integer`.
    Integer,
    /// `Text`.
    Text,
    /// `Bytes`.
    Bytes,
    /// `List`.
    List,
    /// `Map`.
    Map,
}

impl InstructionValue {
    /// Returns the type class of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            InstructionValue::Null => ValueKind::Null,
            InstructionValue::Bool(_) => ValueKind::Bool,
            InstructionValue::Integer(_) => ValueKind::Integer,
            InstructionValue::Text(_) => ValueKind::Text,
            InstructionValue::Bytes(_) => ValueKind::Bytes,
            InstructionValue::List(_) => ValueKind::List,
            InstructionValue::Map(_) => ValueKind::Map,
        }
    }

    /// Returns true if a last-writer-wins choice between `self` and `other`
    /// is meaningful.
    ///
    /// Values are comparable when they share a type class or when either
    /// one clears the field.
    #[must_use]
    pub fn is_comparable_with(&self, other: &Self) -> bool {
        let (a, b) = (self.kind(), other.kind());
        a == b || a == ValueKind::Null || b == ValueKind::Null
    }

    /// Returns the integer value, if this is an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            InstructionValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text value, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            InstructionValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Text => "text",
            ValueKind::Bytes => "bytes",
            ValueKind::List => "list",
            ValueKind::Map => "map",
        };
        f.write_str(name)
    }
}

impl fmt::Display for InstructionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionValue::Null => f.write_str("null"),
            InstructionValue::Bool(b) => write!(f, "{b}"),
            InstructionValue::Integer(n) => write!(f, "{n}"),
            InstructionValue::Text(s) => write!(f, "{s:?}"),
            InstructionValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            InstructionValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            InstructionValue::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for InstructionValue {
    fn from(b: bool) -> Self {
        InstructionValue::Bool(b)
    }
}

impl From<i64> for InstructionValue {
    fn from(n: i64) -> Self {
        InstructionValue::Integer(n)
    }
}

impl From<i32> for InstructionValue {
    fn from(n: i32) -> Self {
        InstructionValue::Integer(i64::from(n))
    }
}

impl From<u32> for InstructionValue {
    fn from(n: u32) -> Self {
        InstructionValue::Integer(i64::from(n))
    }
}

impl From<&str> for InstructionValue {
    fn from(s: &str) -> Self {
        InstructionValue::Text(s.to_string())
    }
}

impl From<String> for InstructionValue {
    fn from(s: String) -> Self {
        InstructionValue::Text(s)
    }
}

impl From<Vec<u8>> for InstructionValue {
    fn from(b: Vec<u8>) -> Self {
        InstructionValue::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparability() {
        let gold = InstructionValue::from(5);
        let more_gold = InstructionValue::from(7);
        let name = InstructionValue::from("hero");

        assert!(gold.is_comparable_with(&more_gold));
        assert!(!gold.is_comparable_with(&name));
        assert!(gold.is_comparable_with(&InstructionValue::Null));
        assert!(InstructionValue::Null.is_comparable_with(&name));
    }

    #[test]
    fn display_nested() {
        let mut map = BTreeMap::new();
        map.insert("hp".to_string(), InstructionValue::from(3));
        let value = InstructionValue::List(vec![
            InstructionValue::Map(map),
            InstructionValue::Bool(true),
        ]);
        assert_eq!(value.to_string(), "[{hp: 3}, true]");
    }
}
