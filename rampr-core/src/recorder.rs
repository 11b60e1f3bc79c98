use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use rampr_http::HttpTransportErrorKind;
use rampr_metrics::{
    HistogramStats, MetricHandle, MetricId, MetricKind, MetricUnit, Registry, RegistrySnapshot,
};
use tokio::time::Instant;

use crate::error::Result;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const DATA_SENT: &str = "data_sent";
pub const DATA_RECEIVED: &str = "data_received";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Status(u16),
    TransportError(HttpTransportErrorKind),
}

/// Result of one request, as produced by a VU.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub name: Arc<str>,
    pub method: http::Method,
    pub status: OutcomeStatus,
    pub latency: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub timestamp: SystemTime,
}

impl RequestOutcome {
    /// Transport errors and statuses outside 2xx/3xx count as failures.
    pub fn is_failure(&self) -> bool {
        match self.status {
            OutcomeStatus::Status(code) => !(200..400).contains(&code),
            OutcomeStatus::TransportError(_) => true,
        }
    }

    fn status_tag(&self) -> String {
        match self.status {
            OutcomeStatus::Status(code) => code.to_string(),
            OutcomeStatus::TransportError(kind) => kind.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BuiltinMetrics {
    http_reqs: MetricId,
    http_req_failed: MetricId,
    http_req_duration: MetricId,
    data_sent: MetricId,
    data_received: MetricId,
    iterations: MetricId,
    iteration_duration: MetricId,
    vus: MetricId,
    vus_max: MetricId,
}

impl BuiltinMetrics {
    fn register(r: &Registry) -> Result<Self> {
        Ok(Self {
            http_reqs: r.register(HTTP_REQS, MetricKind::Counter, MetricUnit::None)?,
            http_req_failed: r.register(HTTP_REQ_FAILED, MetricKind::Rate, MetricUnit::None)?,
            http_req_duration: r.register(
                HTTP_REQ_DURATION,
                MetricKind::Histogram,
                MetricUnit::Duration,
            )?,
            data_sent: r.register(DATA_SENT, MetricKind::Counter, MetricUnit::Bytes)?,
            data_received: r.register(DATA_RECEIVED, MetricKind::Counter, MetricUnit::Bytes)?,
            iterations: r.register(ITERATIONS, MetricKind::Counter, MetricUnit::None)?,
            iteration_duration: r.register(
                ITERATION_DURATION,
                MetricKind::Histogram,
                MetricUnit::Duration,
            )?,
            vus: r.register(VUS, MetricKind::Gauge, MetricUnit::None)?,
            vus_max: r.register(VUS_MAX, MetricKind::Gauge, MetricUnit::None)?,
        })
    }
}

/// Running totals readable without taking a snapshot.
#[derive(Debug, Default)]
struct LiveTotals {
    requests: AtomicU64,
    requests_failed: AtomicU64,
    iterations: AtomicU64,
    iterations_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TotalsSnapshot {
    pub requests: u64,
    pub requests_failed: u64,
    pub iterations: u64,
    pub iterations_failed: u64,
}

/// Aggregates request and iteration outcomes from every VU.
///
/// All writes are atomic adds or a short per-series histogram lock, so the
/// order in which VUs report never changes the final aggregates.
#[derive(Debug)]
pub struct MetricRecorder {
    registry: Arc<Registry>,
    ids: BuiltinMetrics,
    vus: MetricHandle,
    vus_max: MetricHandle,
    totals: LiveTotals,
    started: Instant,
}

impl MetricRecorder {
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let ids = BuiltinMetrics::register(&registry)?;
        let no_tags = registry.resolve_tags(&[]);
        let vus = registry.get_handle(ids.vus, no_tags.clone());
        let vus_max = registry.get_handle(ids.vus_max, no_tags);

        Ok(Self {
            // Both handles exist: the ids were registered on this registry above.
            vus: vus.unwrap_or(MetricHandle::Gauge(Arc::default())),
            vus_max: vus_max.unwrap_or(MetricHandle::Gauge(Arc::default())),
            registry,
            ids,
            totals: LiveTotals::default(),
            started: Instant::now(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn handle(&self, id: MetricId, tags: &[(&str, &str)]) -> Option<MetricHandle> {
        self.registry.get_handle(id, self.registry.resolve_tags(tags))
    }

    pub fn record(&self, outcome: &RequestOutcome) {
        let failed = outcome.is_failure();
        let status = outcome.status_tag();
        let method = outcome.method.as_str();
        let name = &*outcome.name;

        self.totals.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.totals.requests_failed.fetch_add(1, Ordering::Relaxed);
        }

        let tagged = [("name", name), ("method", method), ("status", status.as_str())];
        if let Some(h) = self.handle(self.ids.http_reqs, &tagged) {
            h.increment(1);
        }
        if let Some(h) = self.handle(self.ids.http_req_duration, &tagged) {
            h.observe(outcome.latency.as_micros().try_into().unwrap_or(u64::MAX));
        }
        if let Some(h) = self.handle(self.ids.http_req_failed, &[("name", name), ("method", method)]) {
            h.add_rate(failed);
        }
        if let Some(h) = self.handle(self.ids.data_sent, &[("name", name)]) {
            h.increment(outcome.bytes_sent);
        }
        if let Some(h) = self.handle(self.ids.data_received, &[("name", name)]) {
            h.increment(outcome.bytes_received);
        }
    }

    pub fn record_iteration(&self, duration: Duration, ok: bool) {
        self.totals.iterations.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.totals.iterations_failed.fetch_add(1, Ordering::Relaxed);
        }

        let tags = [("status", if ok { "success" } else { "failure" })];
        if let Some(h) = self.handle(self.ids.iterations, &tags) {
            h.increment(1);
        }
        if let Some(h) = self.handle(self.ids.iteration_duration, &tags) {
            h.observe(duration.as_micros().try_into().unwrap_or(u64::MAX));
        }
    }

    /// Marks a VU as active until the guard drops.
    pub fn vu_started(self: &Arc<Self>) -> ActiveVuGuard {
        let now = self.vus.add_gauge(1);
        self.vus_max.max_gauge(now);
        ActiveVuGuard {
            recorder: self.clone(),
        }
    }

    pub fn active_vus(&self) -> u64 {
        self.vus.gauge().max(0) as u64
    }

    pub fn peak_vus(&self) -> u64 {
        self.vus_max.gauge().max(0) as u64
    }

    pub fn totals(&self) -> TotalsSnapshot {
        TotalsSnapshot {
            requests: self.totals.requests.load(Ordering::Relaxed),
            requests_failed: self.totals.requests_failed.load(Ordering::Relaxed),
            iterations: self.totals.iterations.load(Ordering::Relaxed),
            iterations_failed: self.totals.iterations_failed.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elapsed: self.elapsed(),
            metrics: self.registry.snapshot(),
        }
    }
}

#[derive(Debug)]
pub struct ActiveVuGuard {
    recorder: Arc<MetricRecorder>,
}

impl Drop for ActiveVuGuard {
    fn drop(&mut self) {
        self.recorder.vus.add_gauge(-1);
    }
}

/// Immutable point-in-time copy of every metric, with the run time it covers.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub elapsed: Duration,
    pub metrics: RegistrySnapshot,
}

impl MetricsSnapshot {
    pub fn request_count(&self) -> u64 {
        self.metrics.counter(HTTP_REQS, &[]).unwrap_or(0)
    }

    pub fn failed_requests(&self) -> u64 {
        self.metrics
            .rate(HTTP_REQ_FAILED, &[])
            .map(|(hits, _)| hits)
            .unwrap_or(0)
    }

    pub fn request_latency(&self) -> Option<HistogramStats> {
        self.metrics.histogram(HTTP_REQ_DURATION, &[])
    }

    pub fn iteration_count(&self, status: Option<&str>) -> u64 {
        match status {
            Some(s) => self.metrics.counter(ITERATIONS, &[("status", s)]),
            None => self.metrics.counter(ITERATIONS, &[]),
        }
        .unwrap_or(0)
    }

    pub fn data_sent(&self) -> u64 {
        self.metrics.counter(DATA_SENT, &[]).unwrap_or(0)
    }

    pub fn data_received(&self) -> u64 {
        self.metrics.counter(DATA_RECEIVED, &[]).unwrap_or(0)
    }
}
