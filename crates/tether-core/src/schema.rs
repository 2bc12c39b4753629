//! Relation schema registry.
//!
//! Built once from [`TetherConfig`] and never mutated afterwards. Every
//! bidirectional descriptor is checked against its inverse before the
//! registry exists, so the engine never meets a half-declared relation.

use std::collections::{HashMap, HashSet};

use crate::config::{EntityConfig, TetherConfig};
use crate::error::{ConfigError, NotConfigured};
use crate::types::RelationDescriptor;

/// An entity type with its validated relations, in declaration order.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    pub collection: String,
    pub relations: Vec<RelationDescriptor>,
}

impl EntitySchema {
    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    fn relation_on_field(&self, field: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.field == field)
    }

    /// Bidirectional relations only, in declaration order.
    pub fn bidirectional(&self) -> impl Iterator<Item = &RelationDescriptor> {
        self.relations.iter().filter(|r| r.bidirectional)
    }
}

/// Immutable catalogue of relation descriptors per entity type.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    entities: Vec<EntitySchema>,
    by_name: HashMap<String, usize>,
    by_collection: HashMap<String, usize>,
    tenant_field: String,
    updated_at_field: String,
}

impl SchemaRegistry {
    /// Validate the configured entities and build the registry.
    pub fn from_config(config: &TetherConfig) -> Result<Self, ConfigError> {
        let mut registry = Self {
            entities: Vec::with_capacity(config.entities.len()),
            by_name: HashMap::new(),
            by_collection: HashMap::new(),
            tenant_field: config.tenant_field.clone(),
            updated_at_field: config.updated_at_field.clone(),
        };

        for entity in &config.entities {
            registry.register(entity)?;
        }
        registry.check_targets()?;
        registry.link_inverses()?;

        tracing::info!(
            entity_types = registry.entities.len(),
            relations = registry.entities.iter().map(|e| e.relations.len()).sum::<usize>(),
            "Relation schema loaded"
        );
        Ok(registry)
    }

    pub fn tenant_field(&self) -> &str {
        &self.tenant_field
    }

    pub fn updated_at_field(&self) -> &str {
        &self.updated_at_field
    }

    pub fn entities(&self) -> &[EntitySchema] {
        &self.entities
    }

    pub fn entity(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.by_name.get(entity_type).map(|&i| &self.entities[i])
    }

    /// The entity type stored in `collection`.
    pub fn entity_for_collection(&self, collection: &str) -> Option<&EntitySchema> {
        self.by_collection.get(collection).map(|&i| &self.entities[i])
    }

    /// Look up a relation by entity type name.
    pub fn resolve(
        &self,
        entity_type: &str,
        relation: &str,
    ) -> Result<&RelationDescriptor, NotConfigured> {
        self.entity(entity_type)
            .and_then(|e| e.relation(relation))
            .ok_or_else(|| NotConfigured {
                entity_type: entity_type.to_string(),
                relation: relation.to_string(),
            })
    }

    /// Look up a relation by the collection an entity lives in.
    pub fn resolve_in_collection(
        &self,
        collection: &str,
        relation: &str,
    ) -> Result<&RelationDescriptor, NotConfigured> {
        self.entity_for_collection(collection)
            .and_then(|e| e.relation(relation))
            .ok_or_else(|| NotConfigured {
                entity_type: collection.to_string(),
                relation: relation.to_string(),
            })
    }

    /// The descriptor on the other end of a bidirectional relation.
    pub fn inverse_of(&self, descriptor: &RelationDescriptor) -> Option<&RelationDescriptor> {
        let inverse = descriptor.inverse_relation.as_deref()?;
        self.entity_for_collection(&descriptor.target_collection)?
            .relation(inverse)
    }

    // ── Validation ───────────────────────────────────────────────

    fn register(&mut self, entity: &EntityConfig) -> Result<(), ConfigError> {
        if entity.name.is_empty() || entity.collection_name().is_empty() {
            return Err(ConfigError::EmptyEntityName);
        }
        if self.by_name.contains_key(&entity.name) {
            return Err(ConfigError::DuplicateEntity {
                name: entity.name.clone(),
            });
        }
        let collection = entity.collection_name().to_string();
        if self.by_collection.contains_key(&collection) {
            return Err(ConfigError::DuplicateCollection { collection });
        }

        let mut names = HashSet::new();
        let mut fields = HashSet::new();
        let mut relations = Vec::with_capacity(entity.relations.len());

        for rel in &entity.relations {
            if rel.name.is_empty() || rel.field.is_empty() {
                return Err(ConfigError::EmptyRelation {
                    entity: entity.name.clone(),
                    relation: rel.name.clone(),
                });
            }
            if !names.insert(rel.name.as_str()) {
                return Err(ConfigError::DuplicateRelation {
                    entity: entity.name.clone(),
                    relation: rel.name.clone(),
                });
            }
            if !fields.insert(rel.field.as_str()) {
                return Err(ConfigError::DuplicateField {
                    entity: entity.name.clone(),
                    field: rel.field.clone(),
                });
            }
            if rel.field == self.tenant_field || rel.field == self.updated_at_field {
                return Err(ConfigError::ReservedField {
                    entity: entity.name.clone(),
                    field: rel.field.clone(),
                });
            }
            if rel.bidirectional && rel.inverse_field.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingInverseField {
                    entity: entity.name.clone(),
                    relation: rel.name.clone(),
                });
            }

            relations.push(RelationDescriptor {
                name: rel.name.clone(),
                field: rel.field.clone(),
                target_collection: rel.target.clone(),
                cardinality: rel.cardinality,
                bidirectional: rel.bidirectional,
                inverse_field: rel.inverse_field.clone(),
                inverse_cardinality: None,
                inverse_relation: None,
            });
        }

        let index = self.entities.len();
        self.by_name.insert(entity.name.clone(), index);
        self.by_collection.insert(collection.clone(), index);
        self.entities.push(EntitySchema {
            name: entity.name.clone(),
            collection,
            relations,
        });
        Ok(())
    }

    fn check_targets(&self) -> Result<(), ConfigError> {
        for entity in &self.entities {
            for rel in &entity.relations {
                if !self.by_collection.contains_key(&rel.target_collection) {
                    return Err(ConfigError::UnknownTarget {
                        entity: entity.name.clone(),
                        relation: rel.name.clone(),
                        target: rel.target_collection.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Pair every bidirectional descriptor with the matching descriptor on
    /// its target type and record the inverse cardinality and name.
    fn link_inverses(&mut self) -> Result<(), ConfigError> {
        let mut resolved = Vec::new();

        for (ei, entity) in self.entities.iter().enumerate() {
            for (ri, rel) in entity.relations.iter().enumerate() {
                if !rel.bidirectional {
                    continue;
                }
                let inverse_field = rel.inverse_field.as_deref().unwrap_or_default();
                let target = &self.entities[self.by_collection[&rel.target_collection]];

                let inverse = target.relation_on_field(inverse_field).ok_or_else(|| {
                    ConfigError::InverseNotDeclared {
                        entity: entity.name.clone(),
                        relation: rel.name.clone(),
                        target: target.name.clone(),
                        inverse_field: inverse_field.to_string(),
                    }
                })?;

                let mismatch = |detail: String| ConfigError::InverseMismatch {
                    entity: entity.name.clone(),
                    relation: rel.name.clone(),
                    detail,
                };
                if inverse.target_collection != entity.collection {
                    return Err(mismatch(format!(
                        "{}.{} targets {}, not {}",
                        target.name, inverse.name, inverse.target_collection, entity.collection
                    )));
                }
                if !inverse.bidirectional {
                    return Err(mismatch(format!(
                        "{}.{} is not bidirectional",
                        target.name, inverse.name
                    )));
                }
                if inverse.inverse_field.as_deref() != Some(rel.field.as_str()) {
                    return Err(mismatch(format!(
                        "{}.{} names {:?} as its inverse, expected {}",
                        target.name, inverse.name, inverse.inverse_field, rel.field
                    )));
                }

                resolved.push((ei, ri, inverse.cardinality, inverse.name.clone()));
            }
        }

        for (ei, ri, cardinality, name) in resolved {
            let rel = &mut self.entities[ei].relations[ri];
            rel.inverse_cardinality = Some(cardinality);
            rel.inverse_relation = Some(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cardinality;

    const VALID: &str = r#"
        [[entities]]
        name = "location"

        [[entities.relations]]
        name = "primaryContact"
        field = "primaryContact"
        target = "contact"
        cardinality = "one"
        bidirectional = true
        inverse_field = "locations"

        [[entities.relations]]
        name = "structure"
        field = "structureId"
        target = "structure"
        cardinality = "one"

        [[entities]]
        name = "contact"

        [[entities.relations]]
        name = "locations"
        field = "locations"
        target = "location"
        bidirectional = true
        inverse_field = "primaryContact"

        [[entities]]
        name = "structure"
        collection = "structures_v2"
    "#;

    fn build(toml: &str) -> Result<SchemaRegistry, ConfigError> {
        SchemaRegistry::from_config(&TetherConfig::from_toml_str(toml).unwrap())
    }

    #[test]
    fn test_resolve_and_inverse_linking() {
        // "structure" targets a collection named after the type, which is remapped.
        let err = build(VALID).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTarget { ref target, .. } if target == "structure"));

        let registry = build(&VALID.replace("collection = \"structures_v2\"", "")).unwrap();
        let primary = registry.resolve("location", "primaryContact").unwrap();
        assert_eq!(primary.cardinality, Cardinality::One);
        assert_eq!(primary.inverse(), Some(("locations", Cardinality::Many)));
        assert_eq!(primary.inverse_relation.as_deref(), Some("locations"));

        let inverse = registry.inverse_of(primary).unwrap();
        assert_eq!(inverse.name, "locations");
        assert_eq!(inverse.inverse(), Some(("primaryContact", Cardinality::One)));

        let structure = registry.resolve("location", "structure").unwrap();
        assert_eq!(structure.inverse(), None);
    }

    #[test]
    fn test_not_configured() {
        let registry = build(&VALID.replace("collection = \"structures_v2\"", "")).unwrap();
        let err = registry.resolve("location", "artistes").unwrap_err();
        assert_eq!(err.relation, "artistes");
        assert!(registry.resolve("venue", "primaryContact").is_err());
        assert!(registry.resolve_in_collection("location", "primaryContact").is_ok());
    }

    #[test]
    fn test_bidirectional_in_declaration_order() {
        let registry = build(&VALID.replace("collection = \"structures_v2\"", "")).unwrap();
        let names: Vec<_> = registry
            .entity("location")
            .unwrap()
            .bidirectional()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["primaryContact"]);
    }

    #[test]
    fn test_missing_inverse_declaration_fails() {
        let err = build(
            r#"
            [[entities]]
            name = "artiste"
            [[entities.relations]]
            name = "concerts"
            field = "concertsIds"
            target = "concert"
            bidirectional = true
            inverse_field = "artistesIds"

            [[entities]]
            name = "concert"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InverseNotDeclared { .. }));
    }

    #[test]
    fn test_bidirectional_without_inverse_field_fails() {
        let err = build(
            r#"
            [[entities]]
            name = "artiste"
            [[entities.relations]]
            name = "concerts"
            field = "concertsIds"
            target = "artiste"
            bidirectional = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingInverseField { .. }));
    }

    #[test]
    fn test_one_sided_inverse_fails() {
        let err = build(
            r#"
            [[entities]]
            name = "lieu"
            [[entities.relations]]
            name = "concerts"
            field = "concertsIds"
            target = "concert"
            bidirectional = true
            inverse_field = "lieuId"

            [[entities]]
            name = "concert"
            [[entities.relations]]
            name = "lieu"
            field = "lieuId"
            target = "lieu"
            cardinality = "one"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InverseMismatch { ref detail, .. } if detail.contains("not bidirectional")));
    }

    #[test]
    fn test_inverse_pointing_elsewhere_fails() {
        let err = build(
            r#"
            [[entities]]
            name = "a"
            [[entities.relations]]
            name = "bs"
            field = "bIds"
            target = "b"
            bidirectional = true
            inverse_field = "aIds"

            [[entities]]
            name = "b"
            [[entities.relations]]
            name = "as"
            field = "aIds"
            target = "b"
            bidirectional = true
            inverse_field = "aIds"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InverseMismatch { .. }));
    }

    #[test]
    fn test_duplicate_field_and_reserved_field() {
        let dup = build(
            r#"
            [[entities]]
            name = "a"
            [[entities.relations]]
            name = "x"
            field = "same"
            target = "a"
            [[entities.relations]]
            name = "y"
            field = "same"
            target = "a"
            "#,
        )
        .unwrap_err();
        assert!(matches!(dup, ConfigError::DuplicateField { .. }));

        let reserved = build(
            r#"
            [[entities]]
            name = "a"
            [[entities.relations]]
            name = "owner"
            field = "tenantId"
            target = "a"
            "#,
        )
        .unwrap_err();
        assert!(matches!(reserved, ConfigError::ReservedField { .. }));
    }

    #[test]
    fn test_duplicate_collection() {
        let err = build(
            r#"
            [[entities]]
            name = "lieu"
            collection = "lieux"
            [[entities]]
            name = "venue"
            collection = "lieux"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateCollection { .. }));
    }

    #[test]
    fn test_self_referencing_relation() {
        let registry = build(
            r#"
            [[entities]]
            name = "contact"
            [[entities.relations]]
            name = "colleagues"
            field = "colleagueIds"
            target = "contact"
            bidirectional = true
            inverse_field = "colleagueIds"
            "#,
        )
        .unwrap();
        let rel = registry.resolve("contact", "colleagues").unwrap();
        assert_eq!(rel.inverse(), Some(("colleagueIds", Cardinality::Many)));
    }
}
