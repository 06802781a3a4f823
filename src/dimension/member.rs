//! Member, attribute and subset types.
//!
//! Members carry a small stable integer id, a display name, aliases
//! (sharing the name namespace), typed attributes and an optional
//! display format. Names are case-insensitive within a dimension;
//! whitespace is preserved for display but ignored in equality.

use crate::address::MemberId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Case-fold a member name for lookup: trim, collapse internal
/// whitespace, lowercase.
pub(crate) fn fold_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Typed per-member attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl AttributeValue {
    /// Canonical key used by the per-attribute lookup index.
    pub(crate) fn index_key(&self) -> String {
        match self {
            AttributeValue::Text(s) => format!("t:{}", fold_name(s)),
            AttributeValue::Number(n) => format!("n:{n}"),
            AttributeValue::Flag(b) => format!("b:{b}"),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(s) => write!(f, "{s}"),
            AttributeValue::Number(n) => write!(f, "{n}"),
            AttributeValue::Flag(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::Number(n)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Flag(b)
    }
}

/// Typed per-dimension attribute field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Display name
    pub name: String,
    /// Maintain a value -> members index for fast lookup
    pub indexed: bool,
}

/// A member of a dimension.
///
/// `id` is stable for the member's lifetime; renames and attribute edits
/// never change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    /// Alternative names, sharing the name namespace of the dimension
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    /// Attribute values keyed by folded attribute name
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Optional display format hint, e.g. `"{:.2}"`
    #[serde(default)]
    pub format: Option<String>,
}

impl Member {
    pub fn new(id: MemberId, name: impl Into<String>) -> Self {
        Member {
            id,
            name: name.into(),
            aliases: BTreeSet::new(),
            attributes: BTreeMap::new(),
            format: None,
        }
    }
}

/// Named ordered list of members inside a dimension. A plain selection,
/// not an aggregation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subset {
    pub name: String,
    pub members: Vec<MemberId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_name_normalization() {
        assert_eq!(fold_name("Model S"), "model s");
        assert_eq!(fold_name("  Model   S  "), "model s");
        assert_eq!(fold_name("TOTAL"), "total");
        // folded forms compare equal even when display forms differ
        assert_eq!(fold_name("North  America"), fold_name("north america"));
    }

    #[test]
    fn test_attribute_index_keys_distinguish_types() {
        assert_ne!(
            AttributeValue::Text("1".into()).index_key(),
            AttributeValue::Number(1.0).index_key()
        );
        assert_eq!(
            AttributeValue::Text("Red".into()).index_key(),
            AttributeValue::Text("red".into()).index_key()
        );
    }

    #[test]
    fn test_member_construction() {
        let m = Member::new(3, "Model X");
        assert_eq!(m.id, 3);
        assert_eq!(m.name, "Model X");
        assert!(m.aliases.is_empty());
        assert!(m.format.is_none());
    }
}
