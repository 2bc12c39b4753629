use thiserror::Error;

/// Malformed configuration detected at load time.
///
/// Any of these is fatal: a process holding one must not serve requests.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Entity type name must not be empty")]
    EmptyEntityName,

    #[error("Duplicate entity type: {name}")]
    DuplicateEntity { name: String },

    #[error("Collection {collection} is claimed by more than one entity type")]
    DuplicateCollection { collection: String },

    #[error("Relation {relation} on {entity} has an empty name or field")]
    EmptyRelation { entity: String, relation: String },

    #[error("Duplicate relation {relation} on {entity}")]
    DuplicateRelation { entity: String, relation: String },

    #[error("Field {field} on {entity} is used by more than one relation")]
    DuplicateField { entity: String, field: String },

    #[error("Field {field} on {entity} is reserved and cannot hold a relation")]
    ReservedField { entity: String, field: String },

    #[error("Relation {relation} on {entity} targets unknown collection {target}")]
    UnknownTarget {
        entity: String,
        relation: String,
        target: String,
    },

    #[error("Bidirectional relation {relation} on {entity} has no inverse_field")]
    MissingInverseField { entity: String, relation: String },

    #[error("Relation {relation} on {entity}: {target} declares no relation on field {inverse_field}")]
    InverseNotDeclared {
        entity: String,
        relation: String,
        target: String,
        inverse_field: String,
    },

    #[error("Relation {relation} on {entity} does not match its inverse: {detail}")]
    InverseMismatch {
        entity: String,
        relation: String,
        detail: String,
    },
}

/// A relation name that the entity type does not declare.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Relation {relation} is not configured for {entity_type}")]
pub struct NotConfigured {
    pub entity_type: String,
    pub relation: String,
}
