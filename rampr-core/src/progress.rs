use std::time::Duration;

use crate::orchestrator::RunPhase;

#[derive(Debug, Clone, Default)]
pub struct LiveMetrics {
    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,

    /// Failed requests / total requests during the last progress interval (0..=1).
    pub error_rate_now: f64,

    /// Latency percentiles over the whole run so far, in milliseconds.
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,

    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub bytes_sent_total: u64,
    pub bytes_received_total: u64,
    pub iterations_total: u64,
    pub checks_failed_total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based).
    pub tick: u64,
    pub elapsed: Duration,
    pub phase: RunPhase,
    pub total_duration: Duration,
    pub stage: StageProgress,
    pub target_vus: u64,
    pub live_vus: u64,
    pub retiring_vus: u64,
    pub metrics: LiveMetrics,
}

pub type ProgressFn = std::sync::Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
