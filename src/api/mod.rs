//! HTTP surface: probes, metrics, OpenAPI, workflow actions and scoring.
//!
//! Tenant-scoped routes read the tenant from `x-tenant-id` and the acting
//! user from `x-actor`. Every response carries `x-request-id`.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod openapi;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::service::GovernanceService;

pub use error::ApiError;
pub use extract::{TenantContext, ACTOR_HEADER, TENANT_HEADER};
pub use middleware::{current_request_id, REQUEST_ID_HEADER};

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GovernanceService>,
    /// Upper bound on a single request; exceeding it answers 504.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(service: Arc<GovernanceService>) -> Self {
        Self {
            service,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        .route("/openapi.json", get(handlers::openapi_json))
        .route("/api/v1/records/:id", get(handlers::get_record))
        .route(
            "/api/v1/records/:id/transitions",
            get(handlers::list_transitions).post(handlers::transition),
        )
        .route(
            "/api/v1/records/:id/approvals/decisions",
            post(handlers::decide_approval),
        )
        .route("/api/v1/audits/score", post(handlers::score_audit))
        .fallback(handlers::fallback)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::request_context,
        ))
        .with_state(state)
}

/// Serves the router until `shutdown` resolves.
pub async fn serve<F>(state: AppState, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
