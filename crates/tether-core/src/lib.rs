//! tether-core: Shared types, relation schema, configuration, and error handling.
//!
//! This crate provides the foundational pieces used by every Tether component:
//! - Entity references and schemaless documents
//! - Relation descriptors and the validated schema registry
//! - Relation events for subscribers
//! - Configuration management
//! - Configuration error types

pub mod config;
pub mod error;
pub mod events;
pub mod schema;
pub mod types;

pub use config::TetherConfig;
pub use error::{ConfigError, NotConfigured};
pub use events::{EventPayload, RelationEvent};
pub use schema::{EntitySchema, SchemaRegistry};
pub use types::{Cardinality, Document, EntityRef, Fields, RelationDescriptor};
