//! Error types for the tether-engine crate.

use thiserror::Error;

use tether_core::{ConfigError, EntityRef, NotConfigured};
use tether_store::StoreError;

use crate::tenant::TenantViolation;
use crate::types::Disposition;

/// Hard failures of a caller's action. Recoverable asymmetry is reported
/// through outcomes and reports instead, never through this type.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    NotConfigured(#[from] NotConfigured),

    #[error("Collection {0} is not registered in the relation schema")]
    UnknownCollection(String),

    #[error("Relation {relation} targets collection {expected}, got {actual}")]
    InvalidTarget {
        relation: String,
        expected: String,
        actual: String,
    },

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityRef),

    #[error("Cross-tenant relation refused: {0}")]
    CrossTenantViolation(TenantViolation),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Every error is a hard failure; asymmetry that needs repair is never
    /// raised as an error.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Configuration(_)
            | Self::NotConfigured(_)
            | Self::UnknownCollection(_)
            | Self::InvalidTarget { .. }
            | Self::EntityNotFound(_)
            | Self::CrossTenantViolation(_)
            | Self::Store(_)
            | Self::Snapshot(_)
            | Self::Io(_) => Disposition::HardFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn violation() -> TenantViolation {
        TenantViolation {
            source: EntityRef::new("contact", "c1"),
            target: EntityRef::new("lieux", "l1"),
            source_tenant: Some("t1".to_string()),
            target_tenant: Some("t2".to_string()),
        }
    }

    #[test]
    fn test_every_error_is_a_hard_failure() {
        let errors = vec![
            EngineError::Configuration(ConfigError::EmptyEntityName),
            EngineError::NotConfigured(NotConfigured {
                entity_type: "contact".to_string(),
                relation: "artistes".to_string(),
            }),
            EngineError::UnknownCollection("nowhere".to_string()),
            EngineError::InvalidTarget {
                relation: "lieux".to_string(),
                expected: "lieux".to_string(),
                actual: "location".to_string(),
            },
            EngineError::EntityNotFound(EntityRef::new("lieux", "ghost")),
            EngineError::CrossTenantViolation(violation()),
            EngineError::Store(StoreError::Unavailable("down".to_string())),
            EngineError::Snapshot(serde_json::from_str::<serde_json::Value>("{").unwrap_err()),
            EngineError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "missing")),
        ];
        for err in &errors {
            assert_eq!(err.disposition(), Disposition::HardFailure, "{err}");
        }
    }
}
