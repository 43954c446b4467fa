//! Prometheus metrics registration and export.
//!
//! All metrics live in one registry stored in process-wide statics, so any
//! component can record without threading a handle through.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all qgov metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// HTTP requests, labeled by method, route and status code.
pub static HTTP_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// HTTP request latency in seconds, labeled by method and route.
pub static HTTP_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Record status changes, labeled by kind, from and to.
pub static WORKFLOW_TRANSITIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Approval decisions, labeled by decision and resulting state.
pub static APPROVAL_DECISIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Scored audit runs, labeled by outcome.
pub static AUDIT_SCORES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Distribution of audit percentages.
pub static AUDIT_PERCENTAGE: OnceLock<Histogram> = OnceLock::new();

/// Cache counters mirrored from the tenant cache, labeled by event.
pub static CACHE_EVENTS: OnceLock<GaugeVec> = OnceLock::new();

/// 1 while the cache serves from the memory fallback.
pub static CACHE_DEGRADED: OnceLock<Gauge> = OnceLock::new();

/// Processed jobs, labeled by kind and outcome.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job execution duration in seconds, labeled by kind.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Jobs per queue state, labeled by queue name and state.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of workers currently running a job.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build a throwaway registry and leave
/// the first one in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // HTTP metrics
    let http_requests_total = CounterVec::new(
        Opts::new("qgov_http_requests_total", "Total HTTP requests"),
        &["method", "route", "status"],
    )?;

    let http_request_duration = HistogramVec::new(
        HistogramOpts::new(
            "qgov_http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "route"],
    )?;

    // Workflow metrics
    let workflow_transitions_total = CounterVec::new(
        Opts::new("qgov_workflow_transitions_total", "Total record status changes"),
        &["kind", "from", "to"],
    )?;

    let approval_decisions_total = CounterVec::new(
        Opts::new("qgov_approval_decisions_total", "Total approval decisions"),
        &["decision", "state"],
    )?;

    // Audit metrics
    let audit_scores_total = CounterVec::new(
        Opts::new("qgov_audit_scores_total", "Total scored audit runs"),
        &["outcome"],
    )?;

    let audit_percentage = Histogram::with_opts(
        HistogramOpts::new("qgov_audit_percentage", "Distribution of audit percentages")
            .buckets(vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 75.0, 80.0, 90.0, 100.0]),
    )?;

    // Cache metrics
    let cache_events = GaugeVec::new(
        Opts::new("qgov_cache_events", "Tenant cache counters since startup"),
        &["event"],
    )?;

    let cache_degraded = Gauge::new(
        "qgov_cache_degraded",
        "1 while the cache serves from the memory fallback",
    )?;

    // Job metrics
    let jobs_total = CounterVec::new(
        Opts::new("qgov_jobs_total", "Total processed jobs"),
        &["kind", "outcome"],
    )?;

    let job_duration = HistogramVec::new(
        HistogramOpts::new("qgov_job_duration_seconds", "Job execution duration in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        &["kind"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("qgov_queue_depth", "Number of jobs per queue state"),
        &["queue_name", "state"],
    )?;

    let active_workers = Gauge::new("qgov_active_workers", "Number of workers running a job")?;

    registry.register(Box::new(http_requests_total.clone()))?;
    registry.register(Box::new(http_request_duration.clone()))?;
    registry.register(Box::new(workflow_transitions_total.clone()))?;
    registry.register(Box::new(approval_decisions_total.clone()))?;
    registry.register(Box::new(audit_scores_total.clone()))?;
    registry.register(Box::new(audit_percentage.clone()))?;
    registry.register(Box::new(cache_events.clone()))?;
    registry.register(Box::new(cache_degraded.clone()))?;
    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // Already-initialized statics keep their first value
    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(http_requests_total);
    let _ = HTTP_REQUEST_DURATION.set(http_request_duration);
    let _ = WORKFLOW_TRANSITIONS_TOTAL.set(workflow_transitions_total);
    let _ = APPROVAL_DECISIONS_TOTAL.set(approval_decisions_total);
    let _ = AUDIT_SCORES_TOTAL.set(audit_scores_total);
    let _ = AUDIT_PERCENTAGE.set(audit_percentage);
    let _ = CACHE_EVENTS.set(cache_events);
    let _ = CACHE_DEGRADED.set(cache_degraded);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of failing when the registry is missing
/// or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();
        HTTP_REQUESTS_TOTAL
            .get()
            .unwrap()
            .with_label_values(&["GET", "/healthz", "200"])
            .inc();

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("qgov_http_requests_total"));
    }
}
