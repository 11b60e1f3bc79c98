use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use hdrhistogram::Histogram;

use crate::metrics::{MetricKind, MetricStorage, MetricUnit};

#[derive(Debug, Clone)]
pub enum SeriesValue {
    Counter(u64),
    Gauge(i64),
    Rate { hits: u64, total: u64 },
    Histogram(Box<Histogram<u64>>),
}

/// Point-in-time copy of a single series.
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub name: Arc<str>,
    pub kind: MetricKind,
    pub unit: MetricUnit,
    pub tags: Vec<(String, String)>,
    pub value: SeriesValue,
}

impl SeriesSnapshot {
    pub(crate) fn capture(
        name: Arc<str>,
        kind: MetricKind,
        unit: MetricUnit,
        tags: Vec<(String, String)>,
        storage: &MetricStorage,
    ) -> Self {
        let value = match storage {
            MetricStorage::Counter(c) => SeriesValue::Counter(c.load(Ordering::Relaxed)),
            MetricStorage::Gauge(g) => SeriesValue::Gauge(g.load(Ordering::Relaxed)),
            MetricStorage::Rate(r) => SeriesValue::Rate {
                hits: r.hits.load(Ordering::Relaxed),
                total: r.total.load(Ordering::Relaxed),
            },
            MetricStorage::Histogram(h) => SeriesValue::Histogram(Box::new(h.lock().clone())),
        };

        Self {
            name,
            kind,
            unit,
            tags,
            value,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn matches(&self, name: &str, filter: &[(&str, &str)]) -> bool {
        &*self.name == name && filter.iter().all(|(k, v)| self.tag(k) == Some(*v))
    }
}

/// Histogram merged across series, reporting values in display units.
#[derive(Debug, Clone)]
pub struct HistogramStats {
    hist: Histogram<u64>,
    scale: f64,
}

impl HistogramStats {
    fn new(hist: Histogram<u64>, unit: MetricUnit) -> Self {
        Self {
            hist,
            scale: unit.display_scale(),
        }
    }

    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.hist.min() as f64 * self.scale)
    }

    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.hist.max() as f64 * self.scale)
    }

    pub fn mean(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.hist.mean() * self.scale)
    }

    pub fn stdev(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.hist.stdev() * self.scale)
    }

    /// `p` is a percentile in `0..=100`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let q = (p / 100.0).clamp(0.0, 1.0);
        Some(self.hist.value_at_quantile(q) as f64 * self.scale)
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }
}

/// Several series of one metric folded together.
#[derive(Debug, Clone)]
pub enum Aggregate {
    Counter(u64),
    Gauge(i64),
    Rate { hits: u64, total: u64 },
    Histogram(HistogramStats),
}

impl Aggregate {
    pub fn kind(&self) -> MetricKind {
        match self {
            Aggregate::Counter(_) => MetricKind::Counter,
            Aggregate::Gauge(_) => MetricKind::Gauge,
            Aggregate::Rate { .. } => MetricKind::Rate,
            Aggregate::Histogram(_) => MetricKind::Histogram,
        }
    }

    /// Number of samples behind this aggregate.
    pub fn count(&self) -> u64 {
        match self {
            Aggregate::Counter(n) => *n,
            Aggregate::Gauge(_) => 1,
            Aggregate::Rate { total, .. } => *total,
            Aggregate::Histogram(h) => h.count(),
        }
    }

    fn from_series(s: &SeriesSnapshot) -> Self {
        match &s.value {
            SeriesValue::Counter(n) => Aggregate::Counter(*n),
            SeriesValue::Gauge(n) => Aggregate::Gauge(*n),
            SeriesValue::Rate { hits, total } => Aggregate::Rate {
                hits: *hits,
                total: *total,
            },
            SeriesValue::Histogram(h) => {
                Aggregate::Histogram(HistogramStats::new((**h).clone(), s.unit))
            }
        }
    }

    fn merge(&mut self, s: &SeriesSnapshot) {
        match (self, &s.value) {
            (Aggregate::Counter(acc), SeriesValue::Counter(n)) => *acc = acc.saturating_add(*n),
            (Aggregate::Gauge(acc), SeriesValue::Gauge(n)) => *acc = acc.saturating_add(*n),
            (Aggregate::Rate { hits, total }, SeriesValue::Rate { hits: h, total: t }) => {
                *hits = hits.saturating_add(*h);
                *total = total.saturating_add(*t);
            }
            (Aggregate::Histogram(acc), SeriesValue::Histogram(h)) => {
                // All series share the same bounds, so this cannot fail.
                let _ = acc.hist.add(&**h);
            }
            _ => {}
        }
    }
}

/// Immutable copy of a whole [`crate::Registry`].
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    series: Vec<SeriesSnapshot>,
}

impl RegistrySnapshot {
    pub fn new(mut series: Vec<SeriesSnapshot>) -> Self {
        series.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        Self { series }
    }

    pub fn series(&self) -> &[SeriesSnapshot] {
        &self.series
    }

    /// Folds every series of `name` whose tags include all of `filter`.
    /// Returns `None` when no series matches.
    pub fn select(&self, name: &str, filter: &[(&str, &str)]) -> Option<Aggregate> {
        let mut matching = self.series.iter().filter(|s| s.matches(name, filter));
        let first = matching.next()?;
        let mut agg = Aggregate::from_series(first);
        for s in matching {
            agg.merge(s);
        }
        Some(agg)
    }

    /// Aggregates of `name` keyed by the value of tag `key`. Series without
    /// the tag are skipped.
    pub fn group_by(&self, name: &str, key: &str) -> BTreeMap<String, Aggregate> {
        let mut out: BTreeMap<String, Aggregate> = BTreeMap::new();
        for s in self.series.iter().filter(|s| &*s.name == name) {
            let Some(value) = s.tag(key) else {
                continue;
            };
            match out.get_mut(value) {
                Some(agg) => agg.merge(s),
                None => {
                    out.insert(value.to_string(), Aggregate::from_series(s));
                }
            }
        }
        out
    }

    pub fn counter(&self, name: &str, filter: &[(&str, &str)]) -> Option<u64> {
        match self.select(name, filter)? {
            Aggregate::Counter(n) => Some(n),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str, filter: &[(&str, &str)]) -> Option<i64> {
        match self.select(name, filter)? {
            Aggregate::Gauge(n) => Some(n),
            _ => None,
        }
    }

    /// `(hits, total)`.
    pub fn rate(&self, name: &str, filter: &[(&str, &str)]) -> Option<(u64, u64)> {
        match self.select(name, filter)? {
            Aggregate::Rate { hits, total } => Some((hits, total)),
            _ => None,
        }
    }

    pub fn histogram(&self, name: &str, filter: &[(&str, &str)]) -> Option<HistogramStats> {
        match self.select(name, filter)? {
            Aggregate::Histogram(h) => Some(h),
            _ => None,
        }
    }
}
