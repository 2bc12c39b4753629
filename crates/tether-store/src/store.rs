//! The document store contract Tether writes through.

use async_trait::async_trait;
use serde_json::Value;

use tether_core::{Document, EntityRef};

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store {operation} on {entity} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        entity: String,
        after_ms: u64,
    },

    #[error("Document not found: {0}")]
    NotFound(EntityRef),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// A single-field mutation. All updates passed to one
/// [`DocumentStore::update_fields`] call apply atomically to one document.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Plain scalar assignment; `Value::Null` clears the field.
    Assign { field: String, value: Value },
    /// Atomic array union with a single id.
    AddToSet { field: String, value: String },
    /// Atomic array removal of a single id.
    RemoveFromSet { field: String, value: String },
}

impl FieldUpdate {
    pub fn assign(field: &str, id: &str) -> Self {
        Self::Assign {
            field: field.to_string(),
            value: Value::String(id.to_string()),
        }
    }

    pub fn clear(field: &str) -> Self {
        Self::Assign {
            field: field.to_string(),
            value: Value::Null,
        }
    }

    pub fn add_to_set(field: &str, id: &str) -> Self {
        Self::AddToSet {
            field: field.to_string(),
            value: id.to_string(),
        }
    }

    pub fn remove_from_set(field: &str, id: &str) -> Self {
        Self::RemoveFromSet {
            field: field.to_string(),
            value: id.to_string(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Assign { field, .. }
            | Self::AddToSet { field, .. }
            | Self::RemoveFromSet { field, .. } => field,
        }
    }
}

/// Get/update primitives of a collection-oriented document store.
///
/// Implementations must apply every successful update atomically per
/// document and stamp a server-assigned modification timestamp. There is no
/// multi-document transaction.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document. `Ok(None)` when it does not exist.
    async fn get_document(&self, entity: &EntityRef) -> Result<Option<Document>, StoreError>;

    /// Apply updates to an existing document.
    ///
    /// Fails with [`StoreError::NotFound`] if the document is missing.
    async fn update_fields(
        &self,
        entity: &EntityRef,
        updates: &[FieldUpdate],
    ) -> Result<(), StoreError>;

    /// All document ids in a collection.
    async fn list_ids(&self, collection: &str) -> Result<Vec<String>, StoreError>;

    /// Documents in `collection` whose `field` equals `id` or, for arrays,
    /// contains it.
    async fn find_referencing(
        &self,
        collection: &str,
        field: &str,
        id: &str,
    ) -> Result<Vec<Document>, StoreError>;
}
