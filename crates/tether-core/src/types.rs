//! Core domain types shared by the store adapter and the relation engine.
//!
//! Documents are schemaless field maps owned by the surrounding application.
//! Tether only reads tenant ids and relation fields out of them, and only
//! ever writes single reference values back.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── References ────────────────────────────────────────────────────

/// Opaque pointer to a stored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub collection: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

// ── Relation Descriptors ──────────────────────────────────────────

/// How many ids a relation field may hold.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// A single id stored as a scalar string.
    One,
    /// A deduplicated array of ids.
    #[default]
    Many,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => f.write_str("one"),
            Self::Many => f.write_str("many"),
        }
    }
}

/// One endpoint's declaration of a relation.
///
/// Descriptors are only built by [`crate::SchemaRegistry`], which fills in the
/// inverse endpoint details after validating both sides.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Relation name callers use (e.g. `primaryContact`).
    pub name: String,
    /// Document field holding the referenced id(s).
    pub field: String,
    pub target_collection: String,
    pub cardinality: Cardinality,
    pub bidirectional: bool,
    /// Field on the target document that mirrors this relation.
    pub inverse_field: Option<String>,
    /// Cardinality of the inverse field, resolved at load time.
    pub inverse_cardinality: Option<Cardinality>,
    /// Relation name of the inverse endpoint, resolved at load time.
    pub inverse_relation: Option<String>,
}

impl RelationDescriptor {
    /// The inverse field and its cardinality, present only for validated
    /// bidirectional relations.
    pub fn inverse(&self) -> Option<(&str, Cardinality)> {
        if !self.bidirectional {
            return None;
        }
        match (&self.inverse_field, self.inverse_cardinality) {
            (Some(field), Some(card)) => Some((field.as_str(), card)),
            _ => None,
        }
    }
}

// ── Documents ─────────────────────────────────────────────────────

/// Raw document fields as stored.
pub type Fields = Map<String, Value>;

/// A stored entity document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// The value of a string field, if present and non-empty.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// Ids held in a relation field, in stored order, without duplicates.
    ///
    /// Non-string array entries are skipped. A bare string in a
    /// many-cardinality field is read as a one-element set.
    pub fn relation_ids(&self, field: &str, cardinality: Cardinality) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        match (cardinality, self.fields.get(field)) {
            (_, Some(Value::String(s))) if !s.is_empty() => ids.push(s.clone()),
            (Cardinality::Many, Some(Value::Array(items))) => {
                for item in items {
                    if let Value::String(s) = item {
                        if !s.is_empty() && !ids.contains(s) {
                            ids.push(s.clone());
                        }
                    }
                }
            }
            _ => {}
        }
        ids
    }

    /// Whether a relation field references `id`.
    pub fn holds(&self, field: &str, cardinality: Cardinality, id: &str) -> bool {
        match (cardinality, self.fields.get(field)) {
            (_, Some(Value::String(s))) => s == id,
            (Cardinality::Many, Some(Value::Array(items))) => {
                items.iter().any(|v| v.as_str() == Some(id))
            }
            _ => false,
        }
    }
}
