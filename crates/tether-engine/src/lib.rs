//! tether-engine: Bidirectional relation maintenance for schemaless document stores.
//!
//! Resolves relation descriptors from the schema registry, enforces tenant
//! isolation, writes both sides of a relation through the document store,
//! and reconciles drift between them. Two-sided writes are not atomic:
//! a failed mirror write is returned as a [`types::PartialFailure`] outcome
//! and healed by a later [`RelationEngine::reconcile`].

pub mod error;
pub mod mutator;
pub mod reconcile;
pub mod scheduler;
pub mod snapshot;
pub mod tenant;
pub mod types;

pub use error::{EngineError, Result};
pub use tenant::{TenantGuard, TenantViolation};
pub use types::{
    Disposition, FixedLink, Issue, MutationOutcome, PartialFailure, ReconciliationReport,
    SweepSummary,
};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use tether_core::{
    Document, EntityRef, EventPayload, RelationDescriptor, RelationEvent, SchemaRegistry,
    TetherConfig,
};
use tether_store::{DocumentStore, FieldUpdate, StoreError};

const EVENT_CAPACITY: usize = 1024;

/// The relation engine. Clone is cheap (inner Arcs).
#[derive(Clone)]
pub struct RelationEngine {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn DocumentStore>,
    guard: TenantGuard,
    read_timeout: Duration,
    write_timeout: Duration,
    events: broadcast::Sender<RelationEvent>,
}

impl std::fmt::Debug for RelationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationEngine")
            .field("registry", &self.registry)
            .field("guard", &self.guard)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl RelationEngine {
    /// Create an engine over a validated registry with default timeouts.
    pub fn new(registry: Arc<SchemaRegistry>, store: Arc<dyn DocumentStore>) -> Self {
        let defaults = TetherConfig::default();
        let guard = TenantGuard::new(registry.tenant_field());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            store,
            guard,
            read_timeout: Duration::from_millis(defaults.read_timeout_ms),
            write_timeout: Duration::from_millis(defaults.write_timeout_ms),
            events,
        }
    }

    /// Validate the configured schema and build an engine from it.
    ///
    /// Fails with [`EngineError::Configuration`] on any schema problem; the
    /// caller must not serve requests in that case.
    pub fn from_config(config: &TetherConfig, store: Arc<dyn DocumentStore>) -> Result<Self> {
        let registry = SchemaRegistry::from_config(config)?;
        Ok(Self::new(Arc::new(registry), store).with_timeouts(
            Duration::from_millis(config.read_timeout_ms),
            Duration::from_millis(config.write_timeout_ms),
        ))
    }

    /// Override the per-call store timeouts.
    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Receive every relation event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RelationEvent> {
        self.events.subscribe()
    }

    // ── Shared plumbing ──────────────────────────────────────────

    /// Resolve a relation for a source entity and check the target's collection.
    fn descriptor_for(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        relation: &str,
    ) -> Result<&RelationDescriptor> {
        let descriptor = self
            .registry
            .resolve_in_collection(&source.collection, relation)?;
        if descriptor.target_collection != target.collection {
            return Err(EngineError::InvalidTarget {
                relation: relation.to_string(),
                expected: descriptor.target_collection.clone(),
                actual: target.collection.clone(),
            });
        }
        Ok(descriptor)
    }

    async fn read(&self, entity: &EntityRef) -> std::result::Result<Option<Document>, StoreError> {
        bounded(
            "read",
            entity.to_string(),
            self.read_timeout,
            self.store.get_document(entity),
        )
        .await
    }

    async fn write(
        &self,
        entity: &EntityRef,
        updates: &[FieldUpdate],
    ) -> std::result::Result<(), StoreError> {
        bounded(
            "update",
            entity.to_string(),
            self.write_timeout,
            self.store.update_fields(entity, updates),
        )
        .await
    }

    async fn find_referencing(
        &self,
        collection: &str,
        field: &str,
        id: &str,
    ) -> std::result::Result<Vec<Document>, StoreError> {
        bounded(
            "query",
            format!("{collection}.{field}"),
            self.read_timeout,
            self.store.find_referencing(collection, field, id),
        )
        .await
    }

    async fn list_ids(&self, collection: &str) -> std::result::Result<Vec<String>, StoreError> {
        bounded(
            "list",
            collection.to_string(),
            self.read_timeout,
            self.store.list_ids(collection),
        )
        .await
    }

    fn emit(&self, tenant_id: Option<String>, payload: EventPayload) {
        tracing::trace!(event = payload.kind(), "Publishing relation event");
        // No subscribers is fine.
        let _ = self.events.send(RelationEvent::new(tenant_id, payload));
    }
}

/// Run a store call under a deadline, mapping expiry to [`StoreError::Timeout`].
async fn bounded<T>(
    operation: &'static str,
    entity: String,
    limit: Duration,
    call: impl Future<Output = std::result::Result<T, StoreError>>,
) -> std::result::Result<T, StoreError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation,
            entity,
            after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
