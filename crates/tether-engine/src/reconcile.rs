//! Reconciliation: detect and repair asymmetric relation state.
//!
//! For each bidirectional relation of an entity, two passes run:
//! - outgoing: every id the entity holds must hold the entity back;
//! - incoming: every document whose inverse field holds the entity must be
//!   held by the entity.
//!
//! Missing references are added with the same set/assign primitives the
//! mutator uses. Dangling ids, cross-tenant links, and one-cardinality
//! conflicts are reported and never changed. Per-item failures are
//! collected; only the entity itself being unreadable or absent is an error.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use tether_core::{Cardinality, Document, EntityRef, EventPayload, RelationDescriptor};
use tether_store::FieldUpdate;

use crate::error::{EngineError, Result};
use crate::types::{FixedLink, Issue, ReconciliationReport, SweepSummary};
use crate::RelationEngine;

/// The entity under reconciliation and how to treat what is found.
struct ScanTarget<'a> {
    entity: &'a EntityRef,
    doc: &'a Document,
    tenant: Option<String>,
    repair: bool,
}

impl RelationEngine {
    /// Check and repair every bidirectional relation of `entity`.
    pub async fn reconcile(&self, entity: &EntityRef) -> Result<ReconciliationReport> {
        self.scan(entity, true).await
    }

    /// Same scan as [`reconcile`](Self::reconcile) without writing anything.
    pub async fn audit(&self, entity: &EntityRef) -> Result<ReconciliationReport> {
        self.scan(entity, false).await
    }

    /// Reconcile (or audit) every entity of a collection, at most
    /// `max_concurrent` at a time.
    pub async fn reconcile_collection(
        &self,
        collection: &str,
        repair: bool,
        max_concurrent: usize,
    ) -> Result<SweepSummary> {
        if self.registry.entity_for_collection(collection).is_none() {
            return Err(EngineError::UnknownCollection(collection.to_string()));
        }
        let ids = self.list_ids(collection).await?;
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        let mut summary = SweepSummary::new(collection, !repair);
        let mut tasks = JoinSet::new();
        for id in ids {
            // Holding the permit before spawning keeps at most
            // `max_concurrent` scans alive at once.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let engine = self.clone();
            let entity = EntityRef::new(collection, id);
            tasks.spawn(async move {
                let result = engine.scan(&entity, repair).await;
                drop(permit);
                (entity, result)
            });

            // Drain finished scans.
            while let Some(joined) = tasks.try_join_next() {
                record_scan(&mut summary, joined);
            }
        }
        while let Some(joined) = tasks.join_next().await {
            record_scan(&mut summary, joined);
        }
        summary.finish();

        tracing::info!(
            collection,
            dry_run = summary.dry_run,
            entities = summary.entities,
            checked = summary.checked,
            fixed = summary.fixed,
            unresolved = summary.unresolved,
            errors = summary.errors.len(),
            "Collection sweep complete"
        );
        Ok(summary)
    }

    async fn scan(&self, entity: &EntityRef, repair: bool) -> Result<ReconciliationReport> {
        let schema = self
            .registry
            .entity_for_collection(&entity.collection)
            .ok_or_else(|| EngineError::UnknownCollection(entity.collection.clone()))?;
        let doc = self
            .read(entity)
            .await?
            .ok_or_else(|| EngineError::EntityNotFound(entity.clone()))?;

        let scanned = ScanTarget {
            entity,
            doc: &doc,
            tenant: self.guard.tenant_of(&doc).map(String::from),
            repair,
        };
        let mut report = ReconciliationReport::new(entity.clone(), !repair);

        for descriptor in schema.bidirectional() {
            self.scan_relation(&scanned, descriptor, &mut report).await;
        }

        if report.is_clean() {
            tracing::debug!(entity = %entity, checked = report.checked, "Relations consistent");
        } else {
            tracing::info!(
                entity = %entity,
                dry_run = report.dry_run,
                checked = report.checked,
                fixed = report.fixed.len(),
                unresolved = report.unresolved.len(),
                "Reconciliation found drift"
            );
        }
        Ok(report)
    }

    async fn scan_relation(
        &self,
        scanned: &ScanTarget<'_>,
        descriptor: &RelationDescriptor,
        report: &mut ReconciliationReport,
    ) {
        let Some((inverse_field, inverse_card)) = descriptor.inverse() else {
            return;
        };
        let mut held = scanned
            .doc
            .relation_ids(&descriptor.field, descriptor.cardinality);

        // Outgoing: each held id must reference the entity back.
        for id in held.clone() {
            report.checked += 1;
            let other = EntityRef::new(descriptor.target_collection.clone(), id.clone());
            let other_doc = match self.read(&other).await {
                Ok(Some(doc)) => doc,
                Ok(None) => {
                    tracing::warn!(
                        entity = %scanned.entity,
                        relation = %descriptor.name,
                        id = %id,
                        "Dangling reference"
                    );
                    self.emit(
                        scanned.tenant.clone(),
                        EventPayload::DanglingReference {
                            entity: scanned.entity.clone(),
                            relation: descriptor.name.clone(),
                            id: id.clone(),
                        },
                    );
                    report.unresolved.push(Issue::DanglingReference {
                        relation: descriptor.name.clone(),
                        id,
                    });
                    continue;
                }
                Err(err) => {
                    report.unresolved.push(Issue::Failed {
                        relation: descriptor.name.clone(),
                        id: Some(id),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            if self
                .guard
                .check(scanned.entity, scanned.doc, &other, &other_doc)
                .is_err()
            {
                report.unresolved.push(Issue::CrossTenantViolation {
                    relation: descriptor.name.clone(),
                    id,
                });
                continue;
            }
            if other_doc.holds(inverse_field, inverse_card, &scanned.entity.id) {
                continue;
            }
            if let (Cardinality::One, Some(current)) =
                (inverse_card, other_doc.str_field(inverse_field))
            {
                report.unresolved.push(Issue::Conflict {
                    relation: descriptor.name.clone(),
                    id,
                    current: current.to_string(),
                });
                continue;
            }

            let update = link_update(inverse_field, inverse_card, &scanned.entity.id);
            self.repair(scanned, descriptor, &other, &id, update, report)
                .await;
        }

        // Incoming: documents pointing at the entity that it does not hold.
        let referencing = match self
            .find_referencing(
                &descriptor.target_collection,
                inverse_field,
                &scanned.entity.id,
            )
            .await
        {
            Ok(docs) => docs,
            Err(err) => {
                report.unresolved.push(Issue::Failed {
                    relation: descriptor.name.clone(),
                    id: None,
                    reason: err.to_string(),
                });
                return;
            }
        };

        for other_doc in referencing {
            if held.contains(&other_doc.id) {
                continue;
            }
            report.checked += 1;
            let other = EntityRef::new(descriptor.target_collection.clone(), other_doc.id.clone());

            if self
                .guard
                .check(scanned.entity, scanned.doc, &other, &other_doc)
                .is_err()
            {
                report.unresolved.push(Issue::CrossTenantViolation {
                    relation: descriptor.name.clone(),
                    id: other.id,
                });
                continue;
            }
            if descriptor.cardinality == Cardinality::One {
                if let Some(current) = held.first() {
                    report.unresolved.push(Issue::Conflict {
                        relation: descriptor.name.clone(),
                        id: other.id,
                        current: current.clone(),
                    });
                    continue;
                }
            }

            let update = link_update(&descriptor.field, descriptor.cardinality, &other.id);
            if self
                .repair(scanned, descriptor, scanned.entity, &other.id, update, report)
                .await
            {
                held.push(other.id);
            }
        }
    }

    /// Write one missing reference into `document` (or only record it in
    /// audit mode). Returns whether the reference is now considered present.
    async fn repair(
        &self,
        scanned: &ScanTarget<'_>,
        descriptor: &RelationDescriptor,
        document: &EntityRef,
        id: &str,
        update: FieldUpdate,
        report: &mut ReconciliationReport,
    ) -> bool {
        if scanned.repair {
            if let Err(err) = self.write(document, std::slice::from_ref(&update)).await {
                report.unresolved.push(Issue::Failed {
                    relation: descriptor.name.clone(),
                    id: Some(id.to_string()),
                    reason: err.to_string(),
                });
                return false;
            }
            tracing::info!(
                entity = %scanned.entity,
                relation = %descriptor.name,
                repaired = %document,
                field = update.field(),
                "Missing reference restored"
            );
            self.emit(
                scanned.tenant.clone(),
                EventPayload::ReferenceRepaired {
                    entity: document.clone(),
                    field: update.field().to_string(),
                    id: if document == scanned.entity {
                        id.to_string()
                    } else {
                        scanned.entity.id.clone()
                    },
                },
            );
        }
        report.fixed.push(FixedLink {
            relation: descriptor.name.clone(),
            id: id.to_string(),
            repaired: document.clone(),
        });
        true
    }
}

fn record_scan(
    summary: &mut SweepSummary,
    joined: std::result::Result<(EntityRef, Result<ReconciliationReport>), JoinError>,
) {
    match joined {
        Ok((_, Ok(report))) => summary.record(report),
        Ok((entity, Err(err))) => summary.record_error(entity, err.to_string()),
        Err(e) => tracing::error!(error = %e, "Reconcile task panicked"),
    }
}

fn link_update(field: &str, cardinality: Cardinality, id: &str) -> FieldUpdate {
    match cardinality {
        Cardinality::Many => FieldUpdate::add_to_set(field, id),
        Cardinality::One => FieldUpdate::assign(field, id),
    }
}
