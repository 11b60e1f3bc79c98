use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Histogram,
}

/// Unit of recorded samples. Duration histograms store microseconds and
/// report milliseconds.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum MetricUnit {
    #[default]
    None,
    Bytes,
    Duration,
}

impl MetricUnit {
    /// Factor converting a stored sample into its reported value.
    pub fn display_scale(self) -> f64 {
        match self {
            MetricUnit::Duration => 1.0 / 1000.0,
            MetricUnit::None | MetricUnit::Bytes => 1.0,
        }
    }
}

// Upper bound: one hour in microseconds.
const HISTOGRAM_HIGH: u64 = 3_600_000_000;
const HISTOGRAM_SIGFIG: u8 = 3;

pub(crate) fn new_default_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_bounds(1, HISTOGRAM_HIGH, HISTOGRAM_SIGFIG) {
        Ok(h) => h,
        Err(err) => panic!("histogram bounds are constant and valid: {err}"),
    }
}

#[derive(Debug, Default)]
pub struct Rate {
    pub hits: AtomicU64,
    pub total: AtomicU64,
}

#[derive(Debug, Clone)]
pub(crate) enum MetricStorage {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Histogram(Arc<Mutex<Histogram<u64>>>),
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricStorage::Counter(Arc::default()),
            MetricKind::Gauge => MetricStorage::Gauge(Arc::default()),
            MetricKind::Rate => MetricStorage::Rate(Arc::default()),
            MetricKind::Histogram => {
                MetricStorage::Histogram(Arc::new(Mutex::new(new_default_histogram())))
            }
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        match self {
            MetricStorage::Counter(a) => MetricHandle::Counter(a.clone()),
            MetricStorage::Gauge(a) => MetricHandle::Gauge(a.clone()),
            MetricStorage::Rate(a) => MetricHandle::Rate(a.clone()),
            MetricStorage::Histogram(a) => MetricHandle::Histogram(a.clone()),
        }
    }
}

/// Cheap, cloneable writer for one series. Operations that do not match the
/// series kind are ignored.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Histogram(Arc<Mutex<Histogram<u64>>>),
}

impl MetricHandle {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricHandle::Counter(_) => MetricKind::Counter,
            MetricHandle::Gauge(_) => MetricKind::Gauge,
            MetricHandle::Rate(_) => MetricKind::Rate,
            MetricHandle::Histogram(_) => MetricKind::Histogram,
        }
    }

    #[inline]
    pub fn increment(&self, value: u64) {
        if let MetricHandle::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_gauge(&self, value: i64) {
        if let MetricHandle::Gauge(g) = self {
            g.store(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_gauge(&self, delta: i64) -> i64 {
        match self {
            MetricHandle::Gauge(g) => g.fetch_add(delta, Ordering::Relaxed) + delta,
            _ => 0,
        }
    }

    /// Raises the gauge to `value` if it is currently lower.
    #[inline]
    pub fn max_gauge(&self, value: i64) {
        if let MetricHandle::Gauge(g) = self {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_rate(&self, hit: bool) {
        if let MetricHandle::Rate(r) = self {
            if hit {
                r.hits.fetch_add(1, Ordering::Relaxed);
            }
            r.total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn observe(&self, value: u64) {
        if let MetricHandle::Histogram(h) = self {
            // Zero is below the histogram's lowest discernible value; anything
            // above the top bound is clamped to it.
            h.lock().saturating_record(value.max(1));
        }
    }

    pub fn counter(&self) -> u64 {
        match self {
            MetricHandle::Counter(c) => c.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn gauge(&self) -> i64 {
        match self {
            MetricHandle::Gauge(g) => g.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// `(hits, total)`.
    pub fn rate(&self) -> (u64, u64) {
        match self {
            MetricHandle::Rate(r) => (r.hits.load(Ordering::Relaxed), r.total.load(Ordering::Relaxed)),
            _ => (0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_starts_empty() {
        for kind in [
            MetricKind::Counter,
            MetricKind::Gauge,
            MetricKind::Rate,
            MetricKind::Histogram,
        ] {
            let handle = MetricStorage::new(kind).handle();
            assert_eq!(handle.kind(), kind);
            assert_eq!(handle.counter(), 0);
            assert_eq!(handle.gauge(), 0);
            assert_eq!(handle.rate(), (0, 0));
        }
    }

    #[test]
    fn samples_above_the_top_bound_are_kept() {
        let storage = MetricStorage::new(MetricKind::Histogram);
        let handle = storage.handle();
        handle.observe(1_000_000);
        handle.observe(2 * HISTOGRAM_HIGH);
        handle.observe(0);

        let MetricStorage::Histogram(h) = &storage else {
            panic!("expected histogram storage");
        };
        let h = h.lock();
        assert_eq!(h.len(), 3);
        assert!(h.max() >= HISTOGRAM_HIGH / 1000 * 999, "max={}", h.max());
        assert!(h.min() <= 1);
    }

    #[test]
    fn handles_update_shared_storage() {
        let storage = MetricStorage::new(MetricKind::Counter);
        let a = storage.handle();
        let b = storage.handle();
        a.increment(2);
        b.increment(3);
        assert_eq!(a.counter(), 5);

        let g = MetricStorage::new(MetricKind::Gauge).handle();
        g.set_gauge(10);
        assert_eq!(g.add_gauge(-3), 7);
        g.max_gauge(5);
        assert_eq!(g.gauge(), 7);
        g.max_gauge(9);
        assert_eq!(g.gauge(), 9);

        let r = MetricStorage::new(MetricKind::Rate).handle();
        r.add_rate(true);
        r.add_rate(false);
        r.add_rate(true);
        assert_eq!(r.rate(), (2, 3));
    }

    #[test]
    fn mismatched_operations_are_ignored() {
        let c = MetricStorage::new(MetricKind::Counter).handle();
        c.set_gauge(4);
        c.add_rate(true);
        c.observe(10);
        assert_eq!(c.counter(), 0);
    }

    #[test]
    fn histogram_records_zero_as_one() {
        let h = MetricStorage::new(MetricKind::Histogram).handle();
        h.observe(0);
        h.observe(20);
        let MetricHandle::Histogram(inner) = h else {
            panic!("expected histogram handle");
        };
        let inner = inner.lock();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner.min(), 1);
    }

    #[test]
    fn kind_and_unit_parse_lowercase() {
        assert_eq!("rate".parse::<MetricKind>().ok(), Some(MetricKind::Rate));
        assert_eq!(MetricUnit::Duration.to_string(), "duration");
    }
}
