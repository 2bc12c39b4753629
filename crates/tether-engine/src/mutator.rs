//! Relation writes.
//!
//! Adding or removing a relation touches at most two documents: the source
//! field, then the inverse field on the target when the relation is
//! bidirectional. Many-cardinality fields change through the store's atomic
//! set primitives; one-cardinality fields are assigned (last write wins).

use tether_core::{Cardinality, Document, EntityRef, EventPayload};
use tether_store::FieldUpdate;

use crate::error::{EngineError, Result};
use crate::types::{MutationOutcome, PartialFailure};
use crate::RelationEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Link,
    Unlink,
}

/// A write one side of the relation still needs.
#[derive(Debug, PartialEq)]
struct PlannedWrite {
    update: FieldUpdate,
    /// Id previously held by a one-cardinality field this write overwrites.
    displaced: Option<String>,
}

impl RelationEngine {
    /// Link `source` to `target` through `relation`, mirroring the link on
    /// the target when the relation is bidirectional.
    pub async fn add_relation(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        relation: &str,
    ) -> Result<MutationOutcome> {
        self.mutate(source, target, relation, Direction::Link).await
    }

    /// Unlink `source` from `target`, on both sides when bidirectional.
    pub async fn remove_relation(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        relation: &str,
    ) -> Result<MutationOutcome> {
        self.mutate(source, target, relation, Direction::Unlink).await
    }

    /// Whether the source document currently references the target.
    ///
    /// Reads the source side only, so it may be stale relative to the target.
    pub async fn relation_exists(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        relation: &str,
    ) -> Result<bool> {
        let descriptor = self.descriptor_for(source, target, relation)?;
        Ok(self
            .read(source)
            .await?
            .is_some_and(|doc| doc.holds(&descriptor.field, descriptor.cardinality, &target.id)))
    }

    async fn mutate(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        relation: &str,
        direction: Direction,
    ) -> Result<MutationOutcome> {
        let descriptor = self.descriptor_for(source, target, relation)?;

        let (source_doc, target_doc) = tokio::join!(self.read(source), self.read(target));
        let source_doc = source_doc?.ok_or_else(|| EngineError::EntityNotFound(source.clone()))?;
        let target_doc = target_doc?.ok_or_else(|| EngineError::EntityNotFound(target.clone()))?;

        let tenant = match self.guard.check(source, &source_doc, target, &target_doc) {
            Ok(tenant) => tenant,
            Err(violation) => {
                self.emit(
                    violation.source_tenant.clone(),
                    EventPayload::CrossTenantRejected {
                        source: source.clone(),
                        target: target.clone(),
                        relation: relation.to_string(),
                    },
                );
                return Err(EngineError::CrossTenantViolation(violation));
            }
        };

        let source_write = plan_write(
            &source_doc,
            &descriptor.field,
            descriptor.cardinality,
            &target.id,
            direction,
        );
        let inverse = descriptor.inverse();
        let inverse_write = inverse
            .and_then(|(field, card)| plan_write(&target_doc, field, card, &source.id, direction));

        if source_write.is_none() && inverse_write.is_none() {
            tracing::debug!(
                source = %source,
                target_entity = %target,
                relation,
                ?direction,
                "Relation already in requested state"
            );
            return Ok(MutationOutcome::Unchanged);
        }

        let mut writes = 0u8;
        let mut displaced = Vec::new();

        if let Some(plan) = source_write {
            // Nothing has been written yet, so a failure here is a plain error.
            self.write(source, std::slice::from_ref(&plan.update)).await?;
            writes += 1;
            if let Some(prev) = plan.displaced {
                displaced.push(EntityRef::new(descriptor.target_collection.clone(), prev));
            }
        }

        if let (Some(plan), Some((inverse_field, _))) = (inverse_write, inverse) {
            if let Err(err) = self.write(target, std::slice::from_ref(&plan.update)).await {
                let failure = PartialFailure {
                    relation: relation.to_string(),
                    committed: source.clone(),
                    failed: target.clone(),
                    field: inverse_field.to_string(),
                    source_written: writes > 0,
                    reason: err.to_string(),
                };
                tracing::warn!(
                    committed = %failure.committed,
                    failed = %failure.failed,
                    field = %failure.field,
                    relation,
                    error = %err,
                    "Inverse write failed; relation left asymmetric"
                );
                self.emit(
                    Some(tenant),
                    EventPayload::PartialFailure {
                        committed: failure.committed.clone(),
                        failed: failure.failed.clone(),
                        field: failure.field.clone(),
                        relation: failure.relation.clone(),
                        reason: failure.reason.clone(),
                    },
                );
                return Ok(MutationOutcome::PartialFailure(failure));
            }
            writes += 1;
            if let Some(prev) = plan.displaced {
                displaced.push(EntityRef::new(source.collection.clone(), prev));
            }
        }

        tracing::info!(
            source = %source,
            target_entity = %target,
            relation,
            ?direction,
            writes,
            displaced = displaced.len(),
            "Relation updated"
        );

        let payload = match direction {
            Direction::Link => EventPayload::RelationAdded {
                source: source.clone(),
                target: target.clone(),
                relation: relation.to_string(),
                writes,
            },
            Direction::Unlink => EventPayload::RelationRemoved {
                source: source.clone(),
                target: target.clone(),
                relation: relation.to_string(),
                writes,
            },
        };
        self.emit(Some(tenant), payload);

        Ok(MutationOutcome::Applied { writes, displaced })
    }
}

/// The update needed to bring `field` on `doc` into the requested state for
/// `id`, or `None` if it is already there.
fn plan_write(
    doc: &Document,
    field: &str,
    cardinality: Cardinality,
    id: &str,
    direction: Direction,
) -> Option<PlannedWrite> {
    let linked = doc.holds(field, cardinality, id);
    let update = match (direction, cardinality) {
        (Direction::Link, _) if linked => return None,
        (Direction::Unlink, _) if !linked => return None,
        (Direction::Link, Cardinality::Many) => FieldUpdate::add_to_set(field, id),
        (Direction::Link, Cardinality::One) => {
            return Some(PlannedWrite {
                update: FieldUpdate::assign(field, id),
                displaced: doc.str_field(field).map(String::from),
            });
        }
        (Direction::Unlink, Cardinality::Many) => FieldUpdate::remove_from_set(field, id),
        (Direction::Unlink, Cardinality::One) => FieldUpdate::clear(field),
    };
    Some(PlannedWrite {
        update,
        displaced: None,
    })
}
