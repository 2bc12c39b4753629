//! Result types for relation mutations and reconciliation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use tether_core::EntityRef;

/// How a caller should present a finished operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Stored state matches the request.
    Completed,
    /// Accepted, but the stored state needs attention (repair or review).
    Pending,
    /// Refused or failed before any state changed.
    HardFailure,
}

// ── Mutations ────────────────────────────────────────────────────

/// Result of `add_relation` / `remove_relation`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MutationOutcome {
    /// Already in the requested state; nothing was written.
    Unchanged,
    /// One or two documents were written.
    Applied {
        writes: u8,
        /// Entities whose one-cardinality link was overwritten by this add.
        displaced: Vec<EntityRef>,
    },
    /// The first write committed and the mirrored write did not.
    PartialFailure(PartialFailure),
}

impl MutationOutcome {
    pub fn writes(&self) -> u8 {
        match self {
            Self::Unchanged => 0,
            Self::Applied { writes, .. } => *writes,
            Self::PartialFailure(failure) => u8::from(failure.source_written),
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            Self::PartialFailure(_) => Disposition::Pending,
            _ => Disposition::Completed,
        }
    }
}

/// One side of a bidirectional write is in place, the other is not.
///
/// Reconciling either entity converges the pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialFailure {
    pub relation: String,
    /// Entity whose side is in the requested state.
    pub committed: EntityRef,
    /// Entity whose write failed.
    pub failed: EntityRef,
    /// Field that could not be written on `failed`.
    pub field: String,
    /// Whether this call wrote the committed side (false when it was
    /// already in place).
    pub source_written: bool,
    pub reason: String,
}

// ── Reconciliation ───────────────────────────────────────────────

/// A reference restored (or, in audit mode, found missing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixedLink {
    /// Relation on the scanned entity.
    pub relation: String,
    /// The counterpart id.
    pub id: String,
    /// Document that received the missing reference.
    pub repaired: EntityRef,
}

/// Something reconciliation found and deliberately left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// A stored id no longer resolves to a document.
    DanglingReference { relation: String, id: String },
    /// The counterpart belongs to another tenant, or a tenant id is missing.
    CrossTenantViolation { relation: String, id: String },
    /// A one-cardinality field already points at a different entity.
    Conflict {
        relation: String,
        id: String,
        current: String,
    },
    /// A store call failed for this item; the rest of the scan went on.
    Failed {
        relation: String,
        id: Option<String>,
        reason: String,
    },
}

/// Outcome of reconciling one entity.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub entity: EntityRef,
    /// True when repairs were only reported, not written.
    pub dry_run: bool,
    /// References examined, outgoing and incoming.
    pub checked: usize,
    pub fixed: Vec<FixedLink>,
    pub unresolved: Vec<Issue>,
}

impl ReconciliationReport {
    pub fn new(entity: EntityRef, dry_run: bool) -> Self {
        Self {
            entity,
            dry_run,
            checked: 0,
            fixed: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    /// `(relation, id)` of every dangling reference.
    pub fn dangling(&self) -> impl Iterator<Item = (&str, &str)> {
        self.unresolved.iter().filter_map(|issue| match issue {
            Issue::DanglingReference { relation, id } => Some((relation.as_str(), id.as_str())),
            _ => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.fixed.is_empty() && self.unresolved.is_empty()
    }

    pub fn disposition(&self) -> Disposition {
        if self.unresolved.is_empty() && (!self.dry_run || self.fixed.is_empty()) {
            Disposition::Completed
        } else {
            Disposition::Pending
        }
    }
}

/// An entity a sweep could not reconcile at all.
#[derive(Debug, Clone, Serialize)]
pub struct SweepError {
    pub entity: EntityRef,
    pub reason: String,
}

/// Outcome of reconciling every entity in a collection.
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub collection: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entities: usize,
    pub checked: usize,
    pub fixed: usize,
    pub unresolved: usize,
    /// Reports with at least one fix or issue.
    pub reports: Vec<ReconciliationReport>,
    pub errors: Vec<SweepError>,
}

impl SweepSummary {
    pub fn new(collection: &str, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            collection: collection.to_string(),
            dry_run,
            started_at: now,
            finished_at: now,
            entities: 0,
            checked: 0,
            fixed: 0,
            unresolved: 0,
            reports: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, report: ReconciliationReport) {
        self.entities += 1;
        self.checked += report.checked;
        self.fixed += report.fixed.len();
        self.unresolved += report.unresolved.len();
        if !report.is_clean() {
            self.reports.push(report);
        }
    }

    pub fn record_error(&mut self, entity: EntityRef, reason: String) {
        self.entities += 1;
        self.errors.push(SweepError { entity, reason });
    }

    pub fn finish(&mut self) {
        self.reports.sort_by(|a, b| a.entity.cmp(&b.entity));
        self.errors.sort_by(|a, b| a.entity.cmp(&b.entity));
        self.finished_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> EntityRef {
        EntityRef::new("contact", "c1")
    }

    #[test]
    fn test_outcome_dispositions() {
        assert_eq!(MutationOutcome::Unchanged.disposition(), Disposition::Completed);
        assert_eq!(MutationOutcome::Unchanged.writes(), 0);

        let partial = MutationOutcome::PartialFailure(PartialFailure {
            relation: "lieux".to_string(),
            committed: entity(),
            failed: EntityRef::new("lieu", "l1"),
            field: "contactIds".to_string(),
            source_written: true,
            reason: "timeout".to_string(),
        });
        assert_eq!(partial.disposition(), Disposition::Pending);
        assert_eq!(partial.writes(), 1);
    }

    #[test]
    fn test_report_disposition() {
        let mut report = ReconciliationReport::new(entity(), false);
        assert!(report.is_clean());
        assert_eq!(report.disposition(), Disposition::Completed);

        report.fixed.push(FixedLink {
            relation: "lieux".to_string(),
            id: "l1".to_string(),
            repaired: EntityRef::new("lieu", "l1"),
        });
        assert_eq!(report.disposition(), Disposition::Completed);

        report.unresolved.push(Issue::DanglingReference {
            relation: "lieux".to_string(),
            id: "l2".to_string(),
        });
        assert_eq!(report.disposition(), Disposition::Pending);
        assert_eq!(report.dangling().collect::<Vec<_>>(), vec![("lieux", "l2")]);
    }

    #[test]
    fn test_dry_run_with_fixes_is_pending() {
        let mut report = ReconciliationReport::new(entity(), true);
        report.fixed.push(FixedLink {
            relation: "lieux".to_string(),
            id: "l1".to_string(),
            repaired: EntityRef::new("lieu", "l1"),
        });
        assert_eq!(report.disposition(), Disposition::Pending);
    }

    #[test]
    fn test_sweep_summary_keeps_only_interesting_reports() {
        let mut summary = SweepSummary::new("contact", false);
        summary.record(ReconciliationReport::new(entity(), false));
        let mut dirty = ReconciliationReport::new(EntityRef::new("contact", "c2"), false);
        dirty.checked = 2;
        dirty.unresolved.push(Issue::CrossTenantViolation {
            relation: "lieux".to_string(),
            id: "l9".to_string(),
        });
        summary.record(dirty);
        summary.record_error(EntityRef::new("contact", "c3"), "gone".to_string());
        summary.finish();

        assert_eq!(summary.entities, 3);
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.errors.len(), 1);
    }

    #[test]
    fn test_issue_serialization() {
        let json = serde_json::to_value(Issue::Conflict {
            relation: "primaryContact".to_string(),
            id: "c1".to_string(),
            current: "c2".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "conflict");
        assert_eq!(json["current"], "c2");
    }
}
