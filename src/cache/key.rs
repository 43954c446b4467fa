//! Tenant-scoped cache key layout.
//!
//! Keys have the shape `{namespace}:{tenant}:{resource}:{discriminator}`.
//! Because the tenant is the second segment, every key of a tenant shares
//! the prefix `{namespace}:{tenant}:`, which is what tenant-wide
//! invalidation deletes.

use sha2::{Digest, Sha256};

use crate::domain::TenantId;

/// Cached record bodies, keyed by record id.
pub const RECORDS: &str = "records";
/// Aggregated dashboard payloads, keyed by query digest.
pub const DASHBOARD: &str = "dashboard";

/// Builds cache keys under a fixed namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    namespace: String,
}

impl KeyBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `{namespace}:{tenant}:`
    pub fn tenant_prefix(&self, tenant: &TenantId) -> String {
        format!("{}:{}:", self.namespace, tenant)
    }

    /// `{namespace}:{tenant}:{resource}:`
    pub fn resource_prefix(&self, tenant: &TenantId, resource: &str) -> String {
        format!("{}:{}:{}:", self.namespace, tenant, resource)
    }

    /// Key for a literal discriminator such as a record id.
    pub fn key(&self, tenant: &TenantId, resource: &str, discriminator: &str) -> String {
        format!("{}{}", self.resource_prefix(tenant, resource), discriminator)
    }

    /// Key for a parameterised query. Parameter order does not matter.
    pub fn query_key(&self, tenant: &TenantId, resource: &str, params: &[(&str, &str)]) -> String {
        self.key(tenant, resource, &params_digest(params))
    }
}

/// First 16 hex characters of the SHA-256 of the sorted parameters.
pub fn params_digest(params: &[(&str, &str)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for (name, value) in sorted {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"&");
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(16);
    digest
}
