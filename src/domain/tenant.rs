use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

fn tenant_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9_-]{1,62}$").expect("tenant pattern is a valid regex")
    })
}

/// Identifier of a tenant (organisation) on the platform.
///
/// Tenant ids are lowercase slugs. They are embedded in cache keys, queue
/// payloads and every storage row, so the character set is deliberately
/// narrow: no `:` or `*` can ever reach a Redis key pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parses and validates a tenant id.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, DomainError> {
        let value = value.as_ref().trim();
        if tenant_pattern().is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(DomainError::InvalidTenant(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tenants() {
        for id in ["acme", "acme-corp", "plant_07", "9lives"] {
            assert!(TenantId::parse(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn test_trims_whitespace() {
        let tenant = TenantId::parse("  acme ").unwrap();
        assert_eq!(tenant.as_str(), "acme");
    }

    #[test]
    fn test_rejects_key_metacharacters() {
        for id in ["", "a", "Acme", "acme:prod", "acme*", "-acme", "acme corp"] {
            assert!(TenantId::parse(id).is_err(), "{id:?} should be rejected");
        }
    }

    #[test]
    fn test_serde_validates() {
        let ok: TenantId = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(ok.to_string(), "acme");
        assert!(serde_json::from_str::<TenantId>("\"BAD:ID\"").is_err());
    }
}
