use std::collections::BTreeMap;
use std::time::Duration;

use crate::checks::CheckCounts;
use crate::recorder::{ITERATION_DURATION, MetricsSnapshot};
use crate::thresholds_eval::{ThresholdStatus, ThresholdVerdict, overall_status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
}

/// Why a run ended before (or instead of) completing its schedule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbortReason {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("setup failed: {0}")]
    SetupFailed(String),

    #[error("target unresolvable: {0}")]
    TargetUnresolvable(String),

    #[error("threshold `{expression}` on `{metric}` breached")]
    ThresholdBreached { metric: String, expression: String },

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestStats {
    pub count: u64,
    pub failed: u64,
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p90_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub data_sent: u64,
    pub data_received: u64,
}

impl RequestStats {
    pub fn from_snapshot(snapshot: &MetricsSnapshot) -> Self {
        let latency = snapshot.request_latency();
        let latency = latency.as_ref();
        Self {
            count: snapshot.request_count(),
            failed: snapshot.failed_requests(),
            min_ms: latency.and_then(|h| h.min()),
            avg_ms: latency.and_then(|h| h.mean()),
            p50_ms: latency.and_then(|h| h.percentile(50.0)),
            p90_ms: latency.and_then(|h| h.percentile(90.0)),
            p95_ms: latency.and_then(|h| h.percentile(95.0)),
            p99_ms: latency.and_then(|h| h.percentile(99.0)),
            max_ms: latency.and_then(|h| h.max()),
            data_sent: snapshot.data_sent(),
            data_received: snapshot.data_received(),
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.failed as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationStats {
    pub count: u64,
    pub failed: u64,
    pub avg_ms: Option<f64>,
    pub p95_ms: Option<f64>,
}

impl IterationStats {
    pub fn from_snapshot(snapshot: &MetricsSnapshot) -> Self {
        let duration = snapshot.metrics.histogram(ITERATION_DURATION, &[]);
        Self {
            count: snapshot.iteration_count(None),
            failed: snapshot.iteration_count(Some("failure")),
            avg_ms: duration.as_ref().and_then(|h| h.mean()),
            p95_ms: duration.as_ref().and_then(|h| h.percentile(95.0)),
        }
    }
}

/// Final, read-only outcome of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub duration: Duration,
    pub requests: RequestStats,
    pub iterations: IterationStats,
    pub checks: BTreeMap<String, CheckCounts>,
    /// One verdict per configured condition, in configuration order.
    pub thresholds: Vec<ThresholdVerdict>,
    pub metrics: MetricsSnapshot,
    pub vus_max: u64,
    /// VUs forcibly cancelled at the graceful-stop or hard deadline.
    pub aborted_vus: u64,
    pub abort: Option<AbortReason>,
    pub overall: Verdict,
}

impl RunReport {
    /// Builds a report from final state. The verdict is derived here, so a
    /// report can never claim to have passed with a breached threshold.
    pub fn new(
        duration: Duration,
        metrics: MetricsSnapshot,
        checks: BTreeMap<String, CheckCounts>,
        thresholds: Vec<ThresholdVerdict>,
        vus_max: u64,
        aborted_vus: u64,
        abort: Option<AbortReason>,
    ) -> Self {
        let overall = if abort.is_none() && overall_status(&thresholds) == ThresholdStatus::Passing
        {
            Verdict::Passed
        } else {
            Verdict::Failed
        };

        Self {
            duration,
            requests: RequestStats::from_snapshot(&metrics),
            iterations: IterationStats::from_snapshot(&metrics),
            checks,
            thresholds,
            metrics,
            vus_max,
            aborted_vus,
            abort,
            overall,
        }
    }

    /// Report for a run that never started.
    pub fn aborted_before_start(reason: AbortReason) -> Self {
        Self::new(
            Duration::ZERO,
            MetricsSnapshot::default(),
            BTreeMap::new(),
            Vec::new(),
            0,
            0,
            Some(reason),
        )
    }

    pub fn passed(&self) -> bool {
        self.overall == Verdict::Passed
    }

    /// Status per metric key: breached if any of its conditions is.
    pub fn threshold_status_by_metric(&self) -> BTreeMap<String, ThresholdStatus> {
        let mut out = BTreeMap::new();
        for v in &self.thresholds {
            let entry = out
                .entry(v.metric_key.clone())
                .or_insert(ThresholdStatus::Passing);
            if v.is_breached() {
                *entry = ThresholdStatus::Breached;
            }
        }
        out
    }

    pub fn thresholds_breached(&self) -> bool {
        self.thresholds.iter().any(ThresholdVerdict::is_breached)
            || matches!(self.abort, Some(AbortReason::ThresholdBreached { .. }))
    }

    pub fn checks_failed(&self) -> u64 {
        self.checks.values().map(|c| c.fail).sum()
    }
}
