use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use rampr_core::{ProgressFn, ProgressUpdate, RunOptions, RunReport, TestPlan};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _script_path: &Path, _plan: &TestPlan, _options: &RunOptions) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        let line = JsonSummaryLine {
            kind: "summary",
            report: JsonReport::from_report(report),
        };
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub phase: String,
    pub elapsed_ms: u64,
    pub total_duration_ms: u64,

    pub stage: usize,
    pub stages: usize,
    pub stage_remaining_ms: u64,
    pub target_vus: u64,
    pub live_vus: u64,
    pub retiring_vus: u64,

    pub rps: f64,
    pub error_rate: f64,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,

    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub iterations_total: u64,
    pub checks_failed_total: u64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        phase: u.phase.to_string(),
        elapsed_ms: u.elapsed.as_millis() as u64,
        total_duration_ms: u.total_duration.as_millis() as u64,

        stage: u.stage.stage,
        stages: u.stage.stages,
        stage_remaining_ms: u.stage.stage_remaining.as_millis() as u64,
        target_vus: u.target_vus,
        live_vus: u.live_vus,
        retiring_vus: u.retiring_vus,

        rps: u.metrics.rps_now,
        error_rate: u.metrics.error_rate_now,
        latency_p50_ms: u.metrics.latency_p50_ms,
        latency_p95_ms: u.metrics.latency_p95_ms,

        requests_total: u.metrics.requests_total,
        failed_requests_total: u.metrics.failed_requests_total,
        iterations_total: u.metrics.iterations_total,
        checks_failed_total: u.metrics.checks_failed_total,
        bytes_received_total: u.metrics.bytes_received_total,
        bytes_sent_total: u.metrics.bytes_sent_total,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    #[serde(flatten)]
    pub report: JsonReport,
}

/// Machine-readable run report. Also the `--summary-export` document.
#[derive(Debug, Serialize)]
pub(crate) struct JsonReport {
    pub duration_ms: u64,
    pub requests: JsonRequests,
    pub iterations: JsonIterations,
    pub checks: BTreeMap<String, JsonCheck>,
    /// Worst status per threshold key.
    pub thresholds: BTreeMap<String, String>,
    pub threshold_results: Vec<JsonThresholdResult>,
    pub vus_max: u64,
    pub aborted_vus: u64,
    pub abort: Option<String>,
    pub overall: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonRequests {
    pub count: u64,
    pub failed: u64,
    pub error_rate: f64,
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

#[derive(Debug, Serialize)]
pub(crate) struct JsonIterations {
    pub count: u64,
    pub failed: u64,
    pub avg_ms: Option<f64>,
    pub p95_ms: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonCheck {
    pub pass: u64,
    pub fail: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThresholdResult {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub status: String,
    pub abort_on_fail: bool,
}

impl JsonReport {
    pub(crate) fn from_report(report: &RunReport) -> Self {
        let r = &report.requests;
        let it = &report.iterations;

        Self {
            duration_ms: report.duration.as_millis() as u64,
            requests: JsonRequests {
                count: r.count,
                failed: r.failed,
                error_rate: r.error_rate(),
                min_ms: r.min_ms,
                avg_ms: r.avg_ms,
                p50_ms: r.p50_ms,
                p90_ms: r.p90_ms,
                p95_ms: r.p95_ms,
                p99_ms: r.p99_ms,
                max_ms: r.max_ms,
                data_sent: r.data_sent,
                data_received: r.data_received,
            },
            iterations: JsonIterations {
                count: it.count,
                failed: it.failed,
                avg_ms: it.avg_ms,
                p95_ms: it.p95_ms,
            },
            checks: report
                .checks
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        JsonCheck {
                            pass: c.pass,
                            fail: c.fail,
                        },
                    )
                })
                .collect(),
            thresholds: report
                .threshold_status_by_metric()
                .into_iter()
                .map(|(k, status)| (k, status.to_string()))
                .collect(),
            threshold_results: report
                .thresholds
                .iter()
                .map(|v| JsonThresholdResult {
                    metric: v.metric_key.clone(),
                    expression: v.expression.clone(),
                    observed: v.observed,
                    status: v.status.to_string(),
                    abort_on_fail: v.abort_on_fail,
                })
                .collect(),
            vus_max: report.vus_max,
            aborted_vus: report.aborted_vus,
            abort: report.abort.as_ref().map(ToString::to_string),
            overall: report.overall.to_string(),
        }
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    use rampr_core::{
        AbortReason, LiveMetrics, MetricsSnapshot, RunPhase, StageProgress, ThresholdStatus,
        ThresholdVerdict,
    };

    fn to_value<T: Serialize>(v: &T) -> Value {
        match serde_json::to_value(v) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        }
    }

    #[test]
    fn progress_line_has_kind_and_vus() {
        let u = ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_millis(3_000),
            phase: RunPhase::Ramping,
            total_duration: Duration::from_secs(40),
            stage: StageProgress {
                stage: 1,
                stages: 3,
                stage_elapsed: Duration::from_secs(3),
                stage_remaining: Duration::from_secs(7),
                start_target: 0,
                end_target: 5,
                current_target: 2,
            },
            target_vus: 2,
            live_vus: 2,
            retiring_vus: 0,
            metrics: LiveMetrics {
                rps_now: 4.0,
                requests_total: 9,
                ..LiveMetrics::default()
            },
        };

        let v = to_value(&build_progress_line(&u));
        assert_eq!(v["kind"], "progress");
        assert_eq!(v["phase"], "ramping");
        assert_eq!(v["stage"], 1);
        assert_eq!(v["stage_remaining_ms"], 7000);
        assert_eq!(v["live_vus"], 2);
        assert_eq!(v["requests_total"], 9);
        assert!(v["latency_p95_ms"].is_null());
    }

    #[test]
    fn summary_line_flattens_report() {
        let report = RunReport::new(
            Duration::from_millis(1500),
            MetricsSnapshot::default(),
            BTreeMap::new(),
            vec![
                ThresholdVerdict {
                    metric_key: "http_req_failed".to_string(),
                    expression: "rate<0.01".to_string(),
                    observed: Some(0.0),
                    status: ThresholdStatus::Passing,
                    abort_on_fail: false,
                    delay_abort_eval: None,
                },
                ThresholdVerdict {
                    metric_key: "http_req_duration".to_string(),
                    expression: "p(95)<200".to_string(),
                    observed: None,
                    status: ThresholdStatus::Breached,
                    abort_on_fail: false,
                    delay_abort_eval: None,
                },
            ],
            3,
            0,
            None,
        );

        let v = to_value(&JsonSummaryLine {
            kind: "summary",
            report: JsonReport::from_report(&report),
        });
        assert_eq!(v["kind"], "summary");
        assert_eq!(v["duration_ms"], 1500);
        assert_eq!(v["thresholds"]["http_req_failed"], "passing");
        assert_eq!(v["thresholds"]["http_req_duration"], "breached");
        assert_eq!(v["threshold_results"][1]["observed"], Value::Null);
        assert_eq!(v["overall"], "failed");
        assert!(v["abort"].is_null());
    }

    #[test]
    fn abort_reason_is_rendered_as_text() {
        let report = RunReport::aborted_before_start(AbortReason::TargetUnresolvable(
            "nope.invalid".to_string(),
        ));
        let v = to_value(&JsonReport::from_report(&report));
        assert_eq!(v["abort"], "target unresolvable: nope.invalid");
        assert_eq!(v["requests"]["count"], 0);
        assert_eq!(v["overall"], "failed");
    }
}
