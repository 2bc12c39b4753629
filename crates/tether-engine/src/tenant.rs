//! Tenant isolation guard.
//!
//! Collections are shared by all tenants, so every relation write checks
//! that both endpoints carry the same, non-empty tenant id. A missing or
//! non-string tenant id fails the check.

use std::fmt;

use serde::Serialize;

use tether_core::{Document, EntityRef};

/// Two endpoints that may not be linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantViolation {
    pub source: EntityRef,
    pub target: EntityRef,
    pub source_tenant: Option<String>,
    pub target_tenant: Option<String>,
}

impl fmt::Display for TenantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (tenant {}) -> {} (tenant {})",
            self.source,
            self.source_tenant.as_deref().unwrap_or("<missing>"),
            self.target,
            self.target_tenant.as_deref().unwrap_or("<missing>"),
        )
    }
}

#[derive(Debug, Clone)]
pub struct TenantGuard {
    tenant_field: String,
}

impl TenantGuard {
    pub fn new(tenant_field: &str) -> Self {
        Self {
            tenant_field: tenant_field.to_string(),
        }
    }

    pub fn tenant_of<'a>(&self, doc: &'a Document) -> Option<&'a str> {
        doc.str_field(&self.tenant_field)
    }

    pub fn validate_same_tenant(&self, source: &Document, target: &Document) -> bool {
        matches!(
            (self.tenant_of(source), self.tenant_of(target)),
            (Some(a), Some(b)) if a == b
        )
    }

    /// Check both endpoints and return the shared tenant id.
    ///
    /// Every refusal is logged on the `tether::security` target.
    pub fn check(
        &self,
        source_ref: &EntityRef,
        source: &Document,
        target_ref: &EntityRef,
        target: &Document,
    ) -> Result<String, TenantViolation> {
        if self.validate_same_tenant(source, target) {
            return Ok(self.tenant_of(source).unwrap_or_default().to_string());
        }

        let violation = TenantViolation {
            source: source_ref.clone(),
            target: target_ref.clone(),
            source_tenant: self.tenant_of(source).map(String::from),
            target_tenant: self.tenant_of(target).map(String::from),
        };
        tracing::warn!(
            target: "tether::security",
            source = %violation.source,
            target_entity = %violation.target,
            source_tenant = ?violation.source_tenant,
            target_tenant = ?violation.target_tenant,
            "Cross-tenant relation refused"
        );
        Err(violation)
    }
}
