//! Tenant and actor extraction from request headers.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use super::error::ApiError;
use crate::domain::TenantId;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor";

/// Caller identity for tenant-scoped routes.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant: TenantId,
    pub actor: Option<String>,
}

impl TenantContext {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let raw = header_value(headers, TENANT_HEADER)
            .ok_or_else(|| ApiError::bad_request(format!("missing {} header", TENANT_HEADER)))?;
        let tenant = TenantId::parse(raw)?;

        Ok(Self {
            tenant,
            actor: header_value(headers, ACTOR_HEADER).map(ToString::to_string),
        })
    }

    /// Actor for state-changing routes.
    pub fn require_actor(&self) -> Result<&str, ApiError> {
        self.actor
            .as_deref()
            .ok_or_else(|| ApiError::bad_request(format!("missing {} header", ACTOR_HEADER)))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    #[test]
    fn test_missing_tenant_is_bad_request() {
        let err = TenantContext::from_headers(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_malformed_tenant_is_unprocessable() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_static("Not A Slug"));
        let err = TenantContext::from_headers(&headers).unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_actor_is_optional_until_required() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_static("acme"));
        let ctx = TenantContext::from_headers(&headers).unwrap();
        assert_eq!(ctx.tenant.as_str(), "acme");
        assert!(ctx.require_actor().is_err());

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("alice"));
        let ctx = TenantContext::from_headers(&headers).unwrap();
        assert_eq!(ctx.require_actor().unwrap(), "alice");
    }
}
