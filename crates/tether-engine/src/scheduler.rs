//! Background reconciliation.
//!
//! Spawns one tokio task per collection, each sweeping its collection at the
//! configured interval. Within a sweep, at most `max_concurrent` entities are
//! reconciled at once.

use std::future::Future;

use tokio::task::JoinSet;
use tokio::time::{interval, Duration};

use tether_core::config::ReconcileConfig;

use crate::error::Result;
use crate::types::SweepSummary;
use crate::RelationEngine;

/// Periodic sweeps over a set of collections.
pub struct ReconcileScheduler {
    engine: RelationEngine,
    config: ReconcileConfig,
}

impl ReconcileScheduler {
    pub fn new(engine: RelationEngine, config: ReconcileConfig) -> Self {
        Self { engine, config }
    }

    /// Collections to sweep: the configured list, or every registered one.
    pub fn collections(&self) -> Vec<String> {
        if self.config.collections.is_empty() {
            self.engine
                .registry()
                .entities()
                .iter()
                .map(|e| e.collection.clone())
                .collect()
        } else {
            self.config.collections.clone()
        }
    }

    /// Sweep every collection once, in order.
    pub async fn sweep_once(&self) -> Result<Vec<SweepSummary>> {
        let mut summaries = Vec::new();
        for collection in self.collections() {
            summaries.push(
                self.engine
                    .reconcile_collection(
                        &collection,
                        self.config.repair,
                        self.config.max_concurrent,
                    )
                    .await?,
            );
        }
        Ok(summaries)
    }

    /// Run the scheduler, spawning a tokio task per collection.
    /// Blocks until all tasks complete or the runtime shuts down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the scheduler until `shutdown` resolves, then stop every
    /// collection loop.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut tasks = JoinSet::new();

        for collection in self.collections() {
            let engine = self.engine.clone();
            let config = self.config.clone();
            tasks.spawn(run_collection_loop(engine, config, collection));
        }

        tracing::info!(
            collection_count = tasks.len(),
            interval_secs = self.config.interval_secs,
            "Reconcile scheduler started"
        );

        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Collection sweep task panicked");
                }
            }
        };

        tokio::select! {
            _ = shutdown => tracing::info!("Reconcile scheduler stopping"),
            _ = drain => {}
        }
        tasks.shutdown().await;

        Ok(())
    }
}

/// Per-collection sweep loop.
async fn run_collection_loop(engine: RelationEngine, config: ReconcileConfig, collection: String) {
    let mut ticker = interval(Duration::from_secs(config.interval_secs.max(1)));

    loop {
        ticker.tick().await;

        tracing::info!(collection = %collection, repair = config.repair, "Scheduled sweep triggered");

        if let Err(e) = engine
            .reconcile_collection(&collection, config.repair, config.max_concurrent)
            .await
        {
            tracing::error!(collection = %collection, error = %e, "Scheduled sweep failed");
        }
    }
}
