//! Routing observability metrics
//!
//! Provides Prometheus-compatible metrics for routing operations including:
//! - Forward duration and errors
//! - Local executions
//! - Dials and client cache size
//! - Partition guard rechecks and rejections
//! - Ring rebuilds and heartbeat failures

use std::time::{Duration, Instant};

/// Record forward call duration
pub fn record_forward_duration(target_node: &str, duration: Duration) {
    metrics::histogram!(
        "hashroute_forward_duration_seconds",
        "target_node" => target_node.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record forward call success
pub fn record_forward_success(target_node: &str) {
    metrics::counter!(
        "hashroute_forward_total",
        "target_node" => target_node.to_string(),
        "status" => "ok",
    )
    .increment(1);
}

/// Record forward call error
pub fn record_forward_error(target_node: &str, error_type: &str) {
    metrics::counter!(
        "hashroute_forward_total",
        "target_node" => target_node.to_string(),
        "status" => "error",
    )
    .increment(1);

    metrics::counter!(
        "hashroute_forward_errors_total",
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Record a request executed on this node without a network hop
pub fn record_local_execution() {
    metrics::counter!("hashroute_local_executions_total").increment(1);
}

/// Record a dial attempt outcome
pub fn record_dial(target_node: &str, success: bool) {
    let status = if success { "ok" } else { "error" };
    metrics::counter!(
        "hashroute_dial_total",
        "target_node" => target_node.to_string(),
        "status" => status,
    )
    .increment(1);
}

/// Record client cache size
pub fn record_client_cache_size(size: usize) {
    metrics::gauge!("hashroute_client_cache_size").set(size as f64);
}

/// Record a forced-refresh recheck in the partition guard
pub fn record_partition_recheck() {
    metrics::counter!("hashroute_partition_rechecks_total").increment(1);
}

/// Record a request rejected by the partition guard
pub fn record_partition_rejection() {
    metrics::counter!("hashroute_partition_rejections_total").increment(1);
}

/// Record a hash ring rebuild
pub fn record_ring_rebuild(candidates: usize) {
    metrics::counter!("hashroute_ring_rebuilds_total").increment(1);
    metrics::gauge!("hashroute_ring_candidates").set(candidates as f64);
}

/// Record a failed heartbeat renewal
pub fn record_heartbeat_failure(backend: &str) {
    metrics::counter!(
        "hashroute_heartbeat_failures_total",
        "backend" => backend.to_string(),
    )
    .increment(1);
}

/// Record server-side handler duration
pub fn record_handler_duration(duration: Duration) {
    metrics::histogram!("hashroute_handler_duration_seconds").record(duration.as_secs_f64());
}

/// Record server-side handler outcome
pub fn record_handler_result(error_type: Option<&str>) {
    match error_type {
        None => {
            metrics::counter!("hashroute_handler_total", "status" => "ok").increment(1);
        }
        Some(error_type) => {
            metrics::counter!("hashroute_handler_total", "status" => "error").increment(1);
            metrics::counter!(
                "hashroute_handler_errors_total",
                "error_type" => error_type.to_string(),
            )
            .increment(1);
        }
    }
}

/// Guard for timing forwarded calls
pub struct ForwardTimer {
    target_node: String,
    start: Instant,
}

impl ForwardTimer {
    /// Start timing a forward to `target_node`
    pub fn new(target_node: &str) -> Self {
        Self {
            target_node: target_node.to_string(),
            start: Instant::now(),
        }
    }

    /// Record success and duration
    pub fn success(self) {
        record_forward_duration(&self.target_node, self.start.elapsed());
        record_forward_success(&self.target_node);
    }

    /// Record error and duration
    pub fn error(self, error_type: &str) {
        record_forward_duration(&self.target_node, self.start.elapsed());
        record_forward_error(&self.target_node, error_type);
    }
}

/// Guard for timing inbound handler calls
pub struct HandlerTimer {
    start: Instant,
}

impl HandlerTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record success and duration
    pub fn success(self) {
        record_handler_duration(self.start.elapsed());
        record_handler_result(None);
    }

    /// Record error and duration
    pub fn error(self, error_type: &str) {
        record_handler_duration(self.start.elapsed());
        record_handler_result(Some(error_type));
    }
}

impl Default for HandlerTimer {
    fn default() -> Self {
        Self::new()
    }
}
