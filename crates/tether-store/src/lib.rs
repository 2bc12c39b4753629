//! tether-store: the document store seam.
//!
//! Every read and write Tether performs goes through [`DocumentStore`]. The
//! trait mirrors what collection-oriented stores offer natively: single
//! document reads, per-document atomic updates with add-to-set and
//! remove-from-set, and simple equality/array-contains queries.

pub mod memory;
pub mod store;

pub use memory::InMemoryStore;
pub use store::{DocumentStore, FieldUpdate, StoreError};
