//! Configuration management for Tether.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`TETHER__` prefix, `__` separator)
//! 2. Config file (`tether.toml` by default)
//! 3. Defaults
//!
//! Relations are declared as lists rather than maps so that declaration
//! order survives loading; reconciliation walks relations in that order.

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::Cardinality;

/// Top-level Tether configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TetherConfig {
    /// Document field holding the tenant id.
    #[serde(default = "default_tenant_field")]
    pub tenant_field: String,

    /// Document field the store stamps on every update.
    #[serde(default = "default_updated_at_field")]
    pub updated_at_field: String,

    /// Upper bound for a single document read.
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Upper bound for a single document update.
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Entity types and their relation declarations.
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

/// Background reconciliation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between sweeps of each collection.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum entities reconciled concurrently within one sweep.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Collections to sweep. Empty means every registered collection.
    #[serde(default)]
    pub collections: Vec<String>,

    /// Apply repairs (true) or only report them (false).
    #[serde(default = "default_true")]
    pub repair: bool,
}

/// One entity type.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    /// Entity type name (e.g. "contact").
    pub name: String,

    /// Store collection; defaults to the entity type name.
    #[serde(default)]
    pub collection: Option<String>,

    #[serde(default)]
    pub relations: Vec<RelationConfig>,
}

impl EntityConfig {
    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.name)
    }
}

/// One relation endpoint as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationConfig {
    pub name: String,
    pub field: String,

    /// Target collection.
    pub target: String,

    #[serde(default)]
    pub cardinality: Cardinality,

    #[serde(default)]
    pub bidirectional: bool,

    #[serde(default)]
    pub inverse_field: Option<String>,
}

fn default_tenant_field() -> String {
    "tenantId".to_string()
}

fn default_updated_at_field() -> String {
    "updatedAt".to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_interval() -> u64 {
    3600
}

fn default_max_concurrent() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_concurrent: default_max_concurrent(),
            collections: Vec::new(),
            repair: default_true(),
        }
    }
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            tenant_field: default_tenant_field(),
            updated_at_field: default_updated_at_field(),
            read_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
            reconcile: ReconcileConfig::default(),
            entities: Vec::new(),
        }
    }
}

impl TetherConfig {
    /// Load from `<file_prefix>.toml` (optional) and `TETHER__*` variables.
    pub fn load(file_prefix: &str) -> Result<Self, ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("TETHER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = cfg.try_deserialize()?;
        tracing::debug!(
            entities = loaded.entities.len(),
            tenant_field = %loaded.tenant_field,
            "Configuration loaded"
        );
        Ok(loaded)
    }

    /// Parse a TOML document, without consulting the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TetherConfig::default();
        assert_eq!(config.tenant_field, "tenantId");
        assert_eq!(config.updated_at_field, "updatedAt");
        assert_eq!(config.write_timeout_ms, 5_000);
        assert_eq!(config.reconcile.max_concurrent, 4);
        assert!(config.reconcile.repair);
        assert!(config.entities.is_empty());
    }

    #[test]
    fn test_parse_entities_in_declaration_order() {
        let config = TetherConfig::from_toml_str(
            r#"
            tenant_field = "organizationId"

            [reconcile]
            interval_secs = 60
            repair = false

            [[entities]]
            name = "lieu"
            collection = "lieux"

            [[entities.relations]]
            name = "contacts"
            field = "contactIds"
            target = "contacts"
            bidirectional = true
            inverse_field = "lieuxIds"

            [[entities.relations]]
            name = "structure"
            field = "structureId"
            target = "structures"
            cardinality = "one"
            "#,
        )
        .unwrap();

        assert_eq!(config.tenant_field, "organizationId");
        assert_eq!(config.reconcile.interval_secs, 60);
        assert!(!config.reconcile.repair);
        assert_eq!(config.reconcile.max_concurrent, 4);

        let lieu = &config.entities[0];
        assert_eq!(lieu.collection_name(), "lieux");
        let names: Vec<_> = lieu.relations.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["contacts", "structure"]);
        assert_eq!(lieu.relations[0].cardinality, Cardinality::Many);
        assert_eq!(lieu.relations[1].cardinality, Cardinality::One);
        assert!(!lieu.relations[1].bidirectional);
    }

    #[test]
    fn test_collection_defaults_to_entity_name() {
        let config = TetherConfig::from_toml_str(
            r#"
            [[entities]]
            name = "contact"
            "#,
        )
        .unwrap();
        assert_eq!(config.entities[0].collection_name(), "contact");
    }
}
