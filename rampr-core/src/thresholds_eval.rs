use std::time::Duration;

use rampr_metrics::Aggregate;

use crate::recorder::MetricsSnapshot;
use crate::thresholds::{ThresholdAgg, ThresholdSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ThresholdStatus {
    Passing,
    Breached,
}

/// Result of one condition against one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdVerdict {
    pub metric_key: String,
    pub expression: String,
    /// `None` when the metric is missing, has no samples, or does not support
    /// the aggregation.
    pub observed: Option<f64>,
    pub status: ThresholdStatus,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Option<Duration>,
}

impl ThresholdVerdict {
    pub fn is_breached(&self) -> bool {
        self.status == ThresholdStatus::Breached
    }

    /// Breached with real data and past its abort delay.
    pub fn triggers_abort(&self, elapsed: Duration) -> bool {
        self.abort_on_fail
            && self.is_breached()
            && self.observed.is_some()
            && self.delay_abort_eval.is_none_or(|d| elapsed >= d)
    }
}

/// Evaluates every condition of every set against `snapshot`.
///
/// Pure: the same snapshot always yields the same verdicts. A condition whose
/// metric is missing or empty is breached.
pub fn evaluate_thresholds(sets: &[ThresholdSet], snapshot: &MetricsSnapshot) -> Vec<ThresholdVerdict> {
    let mut out = Vec::new();

    for set in sets {
        let filter: Vec<(&str, &str)> = set
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let aggregate = snapshot.metrics.select(&set.metric, &filter);

        for cond in &set.conditions {
            let observed = aggregate
                .as_ref()
                .and_then(|agg| observed_value(agg, cond.expr.agg, snapshot.elapsed));
            let passed = observed.is_some_and(|v| cond.expr.op.compare(v, cond.expr.value));

            out.push(ThresholdVerdict {
                metric_key: set.key.clone(),
                expression: cond.source.clone(),
                observed,
                status: if passed {
                    ThresholdStatus::Passing
                } else {
                    ThresholdStatus::Breached
                },
                abort_on_fail: cond.abort_on_fail,
                delay_abort_eval: cond.delay_abort_eval,
            });
        }
    }

    out
}

/// Logical AND over all verdicts; no thresholds means passing.
pub fn overall_status(verdicts: &[ThresholdVerdict]) -> ThresholdStatus {
    if verdicts.iter().any(ThresholdVerdict::is_breached) {
        ThresholdStatus::Breached
    } else {
        ThresholdStatus::Passing
    }
}

fn observed_value(agg: &Aggregate, kind: ThresholdAgg, elapsed: Duration) -> Option<f64> {
    match (agg, kind) {
        (Aggregate::Counter(n), ThresholdAgg::Count) => Some(*n as f64),
        (Aggregate::Counter(n), ThresholdAgg::Rate) => {
            let secs = elapsed.as_secs_f64();
            (secs > 0.0).then(|| *n as f64 / secs)
        }

        (Aggregate::Rate { hits, total }, ThresholdAgg::Rate) => {
            (*total > 0).then(|| *hits as f64 / *total as f64)
        }
        (Aggregate::Rate { total, .. }, ThresholdAgg::Count) => Some(*total as f64),

        (Aggregate::Gauge(v), ThresholdAgg::Value) => Some(*v as f64),

        (Aggregate::Histogram(h), ThresholdAgg::Count) => Some(h.count() as f64),
        (Aggregate::Histogram(h), ThresholdAgg::Avg) => h.mean(),
        (Aggregate::Histogram(h), ThresholdAgg::Min) => h.min(),
        (Aggregate::Histogram(h), ThresholdAgg::Max) => h.max(),
        (Aggregate::Histogram(h), ThresholdAgg::Med) => h.median(),
        (Aggregate::Histogram(h), ThresholdAgg::P(p)) => h.percentile(p),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS};
    use rampr_metrics::{MetricKind, MetricUnit, Registry};

    fn snapshot_with_latencies(latencies_ms: &[u64]) -> MetricsSnapshot {
        let r = Registry::new();
        let id = r
            .register(HTTP_REQ_DURATION, MetricKind::Histogram, MetricUnit::Duration)
            .unwrap_or_else(|e| panic!("{e}"));
        let Some(h) = r.get_handle(id, r.resolve_tags(&[("name", "list")])) else {
            panic!("missing handle");
        };
        for ms in latencies_ms {
            h.observe(ms * 1000);
        }
        MetricsSnapshot {
            elapsed: Duration::from_secs(10),
            metrics: r.snapshot(),
        }
    }

    fn p95_under_200() -> Vec<ThresholdSet> {
        vec![ThresholdSet::parse(HTTP_REQ_DURATION, &["p(95)<200"]).unwrap_or_else(|e| panic!("{e}"))]
    }

    #[test]
    fn p95_below_bound_passes() {
        let snap = snapshot_with_latencies(&[150; 100]);
        let v = evaluate_thresholds(&p95_under_200(), &snap);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].status, ThresholdStatus::Passing);
        let observed = v[0].observed.unwrap_or_default();
        assert!((observed - 150.0).abs() < 1.0, "observed={observed}");
    }

    #[test]
    fn p95_above_bound_is_breached() {
        let snap = snapshot_with_latencies(&[250; 100]);
        let v = evaluate_thresholds(&p95_under_200(), &snap);
        assert_eq!(v[0].status, ThresholdStatus::Breached);
        assert_eq!(overall_status(&v), ThresholdStatus::Breached);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let mut latencies = vec![100; 94];
        latencies.extend([400; 6]);
        let snap = snapshot_with_latencies(&latencies);
        let sets = vec![
            ThresholdSet::parse(HTTP_REQ_DURATION, &["p(95)<200", "avg<150", "max<500"])
                .unwrap_or_else(|e| panic!("{e}")),
        ];
        let first = evaluate_thresholds(&sets, &snap);
        let second = evaluate_thresholds(&sets, &snap);
        assert_eq!(first, second);
    }

    #[test]
    fn missing_metric_is_breached_without_observation() {
        let snap = MetricsSnapshot::default();
        let sets = vec![ThresholdSet::parse("nope", &["count>0"]).unwrap_or_else(|e| panic!("{e}"))];
        let v = evaluate_thresholds(&sets, &snap);
        assert_eq!(v[0].status, ThresholdStatus::Breached);
        assert!(v[0].observed.is_none());
    }

    #[test]
    fn tag_selector_restricts_series() {
        let snap = snapshot_with_latencies(&[50; 10]);
        let sets = vec![
            ThresholdSet::parse("http_req_duration{name=list}", &["count==10"])
                .unwrap_or_else(|e| panic!("{e}")),
            ThresholdSet::parse("http_req_duration{name=other}", &["count==0"])
                .unwrap_or_else(|e| panic!("{e}")),
        ];
        let v = evaluate_thresholds(&sets, &snap);
        assert_eq!(v[0].status, ThresholdStatus::Passing);
        assert_eq!(v[1].status, ThresholdStatus::Breached);
    }

    #[test]
    fn rate_metrics_use_hits_over_total_and_counters_use_per_second() {
        let r = Registry::new();
        let failed = r
            .register(HTTP_REQ_FAILED, MetricKind::Rate, MetricUnit::None)
            .unwrap_or_else(|e| panic!("{e}"));
        let reqs = r
            .register(HTTP_REQS, MetricKind::Counter, MetricUnit::None)
            .unwrap_or_else(|e| panic!("{e}"));
        let tags = r.resolve_tags(&[]);
        if let Some(h) = r.get_handle(failed, tags.clone()) {
            for i in 0..100 {
                h.add_rate(i == 0);
            }
        }
        if let Some(h) = r.get_handle(reqs, tags) {
            h.increment(100);
        }
        let snap = MetricsSnapshot {
            elapsed: Duration::from_secs(4),
            metrics: r.snapshot(),
        };

        let sets = vec![
            ThresholdSet::parse(HTTP_REQ_FAILED, &["rate<0.05", "count==100"])
                .unwrap_or_else(|e| panic!("{e}")),
            ThresholdSet::parse(HTTP_REQS, &["rate>=25", "count>99", "p(95)<1"])
                .unwrap_or_else(|e| panic!("{e}")),
        ];
        let v = evaluate_thresholds(&sets, &snap);
        let statuses: Vec<_> = v.iter().map(|v| v.status).collect();
        assert_eq!(
            statuses,
            vec![
                ThresholdStatus::Passing,
                ThresholdStatus::Passing,
                ThresholdStatus::Passing,
                ThresholdStatus::Passing,
                // Percentiles are undefined for counters.
                ThresholdStatus::Breached,
            ]
        );
        assert_eq!(v[0].observed, Some(0.01));
    }

    #[test]
    fn abort_trigger_honours_delay_and_requires_data() {
        let breached = ThresholdVerdict {
            metric_key: "m".into(),
            expression: "avg<1".into(),
            observed: Some(5.0),
            status: ThresholdStatus::Breached,
            abort_on_fail: true,
            delay_abort_eval: Some(Duration::from_secs(10)),
        };
        assert!(!breached.triggers_abort(Duration::from_secs(5)));
        assert!(breached.triggers_abort(Duration::from_secs(10)));

        let no_data = ThresholdVerdict {
            observed: None,
            delay_abort_eval: None,
            ..breached.clone()
        };
        assert!(!no_data.triggers_abort(Duration::from_secs(60)));

        let passive = ThresholdVerdict {
            abort_on_fail: false,
            ..breached
        };
        assert!(!passive.triggers_abort(Duration::from_secs(60)));
    }
}
