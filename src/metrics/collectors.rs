//! High-level recording interface over the raw Prometheus metrics.

use std::time::Duration;

use super::prometheus::{
    ACTIVE_WORKERS, APPROVAL_DECISIONS_TOTAL, AUDIT_PERCENTAGE, AUDIT_SCORES_TOTAL, CACHE_DEGRADED,
    CACHE_EVENTS, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION, JOBS_TOTAL, JOB_DURATION, QUEUE_DEPTH,
    WORKFLOW_TRANSITIONS_TOTAL,
};
use crate::cache::{CacheMode, CacheStats};
use crate::jobs::QueueStats;

/// Metrics collector for recording governance operational metrics.
///
/// Recording is a no-op until [`super::init_metrics`] has run, so library
/// code and tests can record unconditionally.
///
/// # Example
///
/// ```ignore
/// use quality_governance::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_transition("capa", "in_progress", "pending_approval");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a served HTTP request.
    pub fn record_http_request(&self, method: &str, route: &str, status: u16, duration: Duration) {
        if let Some(requests) = HTTP_REQUESTS_TOTAL.get() {
            let status = status.to_string();
            requests
                .with_label_values(&[method, route, status.as_str()])
                .inc();
        }

        if let Some(latency) = HTTP_REQUEST_DURATION.get() {
            latency
                .with_label_values(&[method, route])
                .observe(duration.as_secs_f64());
        }
    }

    /// Record a record status change.
    pub fn record_transition(&self, kind: &str, from: &str, to: &str) {
        if let Some(transitions) = WORKFLOW_TRANSITIONS_TOTAL.get() {
            transitions.with_label_values(&[kind, from, to]).inc();
        }

        tracing::trace!(kind, from, to, "Recorded transition metric");
    }

    pub fn record_approval_decision(&self, decision: &str, state: &str) {
        if let Some(decisions) = APPROVAL_DECISIONS_TOTAL.get() {
            decisions.with_label_values(&[decision, state]).inc();
        }
    }

    /// Record a scored audit run. Incomplete runs have no percentage.
    pub fn record_audit_score(&self, outcome: &str, percentage: Option<f64>) {
        if let Some(scores) = AUDIT_SCORES_TOTAL.get() {
            scores.with_label_values(&[outcome]).inc();
        }

        if let (Some(histogram), Some(percentage)) = (AUDIT_PERCENTAGE.get(), percentage) {
            histogram.observe(percentage);
        }
    }

    /// Mirror the tenant cache counters into gauges.
    pub fn record_cache_stats(&self, stats: &CacheStats) {
        if let Some(events) = CACHE_EVENTS.get() {
            events.with_label_values(&["hit"]).set(stats.hits as f64);
            events.with_label_values(&["miss"]).set(stats.misses as f64);
            events.with_label_values(&["set"]).set(stats.sets as f64);
            events
                .with_label_values(&["invalidation"])
                .set(stats.invalidations as f64);
            events
                .with_label_values(&["fallback"])
                .set(stats.fallback_events as f64);
        }

        if let Some(degraded) = CACHE_DEGRADED.get() {
            let value = if stats.mode == CacheMode::MemoryFallback { 1.0 } else { 0.0 };
            degraded.set(value);
        }
    }

    /// Record a processed job.
    ///
    /// # Arguments
    ///
    /// * `kind` - Job kind name (e.g., "notify", "cleanup")
    /// * `outcome` - "completed", "retried" or "dead_lettered"
    /// * `duration` - Time spent in the handler
    pub fn record_job(&self, kind: &str, outcome: &str, duration: Duration) {
        if let Some(jobs) = JOBS_TOTAL.get() {
            jobs.with_label_values(&[kind, outcome]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[kind])
                .observe(duration.as_secs_f64());
        }

        tracing::trace!(kind, outcome, duration_ms = duration.as_millis() as u64, "Recorded job metric");
    }

    /// Set the queue depth gauges from a stats snapshot.
    pub fn set_queue_depth(&self, stats: &QueueStats) {
        if let Some(depth) = QUEUE_DEPTH.get() {
            let queue = stats.queue_name.as_str();
            depth
                .with_label_values(&[queue, "pending"])
                .set(stats.pending_jobs as f64);
            depth
                .with_label_values(&[queue, "processing"])
                .set(stats.processing_jobs as f64);
            depth
                .with_label_values(&[queue, "delayed"])
                .set(stats.delayed_jobs as f64);
            depth
                .with_label_values(&[queue, "dead_letter"])
                .set(stats.dead_letter_jobs as f64);
        }
    }

    pub fn set_active_workers(&self, count: usize) {
        if let Some(workers) = ACTIVE_WORKERS.get() {
            workers.set(count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_recording_before_init_is_noop() {
        let collector = MetricsCollector::new();
        collector.record_job("notify", "completed", Duration::from_millis(5));
        collector.record_audit_score("incomplete", None);
    }

    #[test]
    fn test_recorded_values_are_exported() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();

        collector.record_transition("capa", "in_progress", "pending_approval");
        collector.record_job("cleanup", "dead_lettered", Duration::from_millis(12));
        collector.set_queue_depth(&QueueStats {
            queue_name: "qgov:jobs".to_string(),
            pending_jobs: 3,
            processing_jobs: 1,
            delayed_jobs: 0,
            dead_letter_jobs: 2,
        });

        let exported = export_metrics();
        assert!(exported.contains("qgov_workflow_transitions_total"));
        assert!(exported.contains("outcome=\"dead_lettered\""));
        assert!(exported.contains("state=\"dead_letter\""));
    }
}
