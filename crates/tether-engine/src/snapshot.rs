//! Offline audit and repair of an exported store snapshot.
//!
//! A snapshot is a JSON object `{collection: {id: {fields}}}`. It is loaded
//! into an [`InMemoryStore`], swept with the configured schema, and (when
//! repairing) written back out.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tether_core::TetherConfig;
use tether_store::InMemoryStore;

use crate::error::Result;
use crate::scheduler::ReconcileScheduler;
use crate::types::SweepSummary;
use crate::RelationEngine;

/// Read a snapshot file into a fresh in-memory store.
pub fn load_snapshot(path: &Path, updated_at_field: &str) -> Result<InMemoryStore> {
    let raw = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    Ok(InMemoryStore::from_snapshot(value, updated_at_field)?)
}

/// Write the store's contents as a pretty-printed snapshot.
pub async fn save_snapshot(store: &InMemoryStore, path: &Path) -> Result<()> {
    let value = store.snapshot().await;
    std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    Ok(())
}

/// Sweep a snapshot file. With `output`, repairs are applied and the result
/// is saved there; without it, the sweep only reports.
pub async fn sweep_snapshot(
    config: &TetherConfig,
    snapshot: &Path,
    output: Option<&Path>,
) -> Result<Vec<SweepSummary>> {
    let store = load_snapshot(snapshot, &config.updated_at_field)?;
    let engine = RelationEngine::from_config(config, Arc::new(store.clone()))?;

    let mut reconcile = config.reconcile.clone();
    reconcile.repair = output.is_some();
    let summaries = ReconcileScheduler::new(engine, reconcile)
        .sweep_once()
        .await?;

    if let Some(path) = output {
        save_snapshot(&store, path).await?;
        tracing::info!(path = %path.display(), writes = store.write_count(), "Repaired snapshot saved");
    }
    Ok(summaries)
}

/// Keep a snapshot reconciled on the configured schedule until `shutdown`
/// resolves, then save it to `output` (when given).
pub async fn watch_snapshot(
    config: &TetherConfig,
    snapshot: &Path,
    output: Option<&Path>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let store = load_snapshot(snapshot, &config.updated_at_field)?;
    let engine = RelationEngine::from_config(config, Arc::new(store.clone()))?;

    ReconcileScheduler::new(engine, config.reconcile.clone())
        .run_until(shutdown)
        .await?;

    if let Some(path) = output {
        save_snapshot(&store, path).await?;
        tracing::info!(path = %path.display(), writes = store.write_count(), "Watched snapshot saved");
    }
    Ok(())
}
