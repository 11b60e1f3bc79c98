use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use rampr_metrics::{MetricHandle, MetricId, MetricKind, MetricUnit, Registry};

use crate::error::Result;
use crate::response::ResponseView;
use crate::script::CheckPredicate;

pub const CHECKS_METRIC: &str = "checks";

/// Outcome of a single check evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: Arc<str>,
    pub passed: bool,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckCounts {
    pub pass: u64,
    pub fail: u64,
}

impl CheckCounts {
    pub fn total(&self) -> u64 {
        self.pass + self.fail
    }
}

#[derive(Debug)]
struct CheckCounters {
    name: Arc<str>,
    pass: AtomicU64,
    fail: AtomicU64,
    rate: Option<MetricHandle>,
}

/// Per-name pass/fail counters. Names are created on first evaluation.
///
/// When built with a registry, every evaluation is mirrored into the
/// `checks` rate metric tagged with `check=<name>`.
#[derive(Debug, Default)]
pub struct CheckEvaluator {
    counters: DashMap<Arc<str>, Arc<CheckCounters>>,
    metrics: Option<(Arc<Registry>, MetricId)>,
}

impl CheckEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(registry: Arc<Registry>) -> Result<Self> {
        let id = registry.register(CHECKS_METRIC, MetricKind::Rate, MetricUnit::None)?;
        Ok(Self {
            counters: DashMap::new(),
            metrics: Some((registry, id)),
        })
    }

    fn counters_for(&self, name: &str) -> Arc<CheckCounters> {
        if let Some(c) = self.counters.get(name) {
            return c.clone();
        }

        self.counters
            .entry(Arc::from(name))
            .or_insert_with(|| {
                let rate = self.metrics.as_ref().and_then(|(registry, id)| {
                    registry.get_handle(*id, registry.resolve_tags(&[("check", name)]))
                });
                Arc::new(CheckCounters {
                    name: Arc::from(name),
                    pass: AtomicU64::new(0),
                    fail: AtomicU64::new(0),
                    rate,
                })
            })
            .clone()
    }

    pub fn evaluate(&self, name: &str, passed: bool) -> CheckResult {
        let counters = self.counters_for(name);
        if passed {
            counters.pass.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.fail.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(rate) = &counters.rate {
            rate.add_rate(passed);
        }

        CheckResult {
            name: counters.name.clone(),
            passed,
            timestamp: SystemTime::now(),
        }
    }

    pub fn summary(&self) -> BTreeMap<String, CheckCounts> {
        self.counters
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().to_string(),
                    CheckCounts {
                        pass: c.pass.load(Ordering::Relaxed),
                        fail: c.fail.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }

    pub fn totals(&self) -> CheckCounts {
        self.counters.iter().fold(CheckCounts::default(), |acc, entry| CheckCounts {
            pass: acc.pass + entry.pass.load(Ordering::Relaxed),
            fail: acc.fail + entry.fail.load(Ordering::Relaxed),
        })
    }
}

/// Whether `predicate` holds for `response`. Without a response (no request
/// yet, or the last one failed at the transport level) every predicate fails.
pub fn predicate_holds(predicate: &CheckPredicate, response: Option<&ResponseView>) -> bool {
    let Some(res) = response else {
        return false;
    };

    match predicate {
        CheckPredicate::Status(code) => res.status == *code,
        CheckPredicate::StatusIn(codes) => codes.contains(&res.status),
        CheckPredicate::BodyContains(needle) => res.body_text().contains(needle.as_str()),
        CheckPredicate::JsonExists(path) => res.json_path(path).is_some_and(|v| !v.is_null()),
        CheckPredicate::JsonEquals { path, value } => res.json_path(path) == Some(value),
        CheckPredicate::HeaderExists(name) => res.header(name).is_some(),
        CheckPredicate::HeaderEquals { name, value } => res.header(name) == Some(value.as_str()),
        CheckPredicate::DurationBelow(limit) => res.latency < *limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;
    use std::time::Duration;

    fn response() -> ResponseView {
        ResponseView::new(
            200,
            vec![("x-request-id".to_string(), "abc".to_string())],
            Bytes::from_static(br#"{"token":"t","user":{"id":7},"gone":null}"#),
            Duration::from_millis(120),
        )
    }

    #[test]
    fn counts_pass_and_fail_per_name() {
        let checks = CheckEvaluator::new();
        assert!(checks.evaluate("status 200", true).passed);
        checks.evaluate("status 200", false);
        checks.evaluate("status 200", true);
        checks.evaluate("has token", false);

        let summary = checks.summary();
        assert_eq!(summary["status 200"], CheckCounts { pass: 2, fail: 1 });
        assert_eq!(summary["has token"], CheckCounts { pass: 0, fail: 1 });
        assert_eq!(checks.totals(), CheckCounts { pass: 2, fail: 2 });
    }

    #[test]
    fn mirrors_into_checks_rate_metric() {
        let registry = Arc::new(Registry::new());
        let checks =
            CheckEvaluator::with_metrics(registry.clone()).unwrap_or_else(|e| panic!("{e}"));
        checks.evaluate("a", true);
        checks.evaluate("a", false);
        checks.evaluate("b", true);

        let snap = registry.snapshot();
        assert_eq!(snap.rate(CHECKS_METRIC, &[]), Some((2, 3)));
        assert_eq!(snap.rate(CHECKS_METRIC, &[("check", "a")]), Some((1, 2)));
    }

    #[tokio::test]
    async fn concurrent_evaluations_are_all_counted() {
        let checks = Arc::new(CheckEvaluator::new());
        let mut tasks = Vec::new();
        for t in 0..8u64 {
            let checks = checks.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..500u64 {
                    checks.evaluate("shared", (i + t) % 3 != 0);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for t in tasks {
            t.await.unwrap_or_else(|e| panic!("{e}"));
        }
        assert_eq!(checks.summary()["shared"].total(), 8 * 500);
    }

    #[test]
    fn predicates_over_response() {
        let res = response();
        let r = Some(&res);
        assert!(predicate_holds(&CheckPredicate::Status(200), r));
        assert!(!predicate_holds(&CheckPredicate::Status(201), r));
        assert!(predicate_holds(&CheckPredicate::StatusIn(vec![200, 204]), r));
        assert!(predicate_holds(&CheckPredicate::BodyContains("token".into()), r));
        assert!(predicate_holds(&CheckPredicate::JsonExists("user.id".into()), r));
        assert!(!predicate_holds(&CheckPredicate::JsonExists("gone".into()), r));
        assert!(predicate_holds(
            &CheckPredicate::JsonEquals {
                path: "user.id".into(),
                value: json!(7)
            },
            r
        ));
        assert!(predicate_holds(&CheckPredicate::HeaderExists("X-Request-Id".into()), r));
        assert!(predicate_holds(
            &CheckPredicate::HeaderEquals {
                name: "x-request-id".into(),
                value: "abc".into()
            },
            r
        ));
        assert!(predicate_holds(
            &CheckPredicate::DurationBelow(Duration::from_millis(500)),
            r
        ));
        assert!(!predicate_holds(
            &CheckPredicate::DurationBelow(Duration::from_millis(100)),
            r
        ));
    }

    #[test]
    fn predicates_fail_without_response() {
        assert!(!predicate_holds(&CheckPredicate::StatusIn(vec![200]), None));
        assert!(!predicate_holds(&CheckPredicate::BodyContains(String::new()), None));
    }
}
