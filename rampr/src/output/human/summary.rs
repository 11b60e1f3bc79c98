use std::fmt::Write as _;

use rampr_core::recorder::HTTP_REQ_DURATION;
use rampr_core::{RunReport, ThresholdStatus};
use rampr_metrics::Aggregate;

use super::format::*;

pub(crate) fn render(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(
        &mut out,
        "  duration: {}",
        format_duration_single(report.duration)
    )
    .ok();
    writeln!(
        &mut out,
        "  vus: max {} aborted {}",
        report.vus_max, report.aborted_vus
    )
    .ok();

    render_requests(report, &mut out);
    render_iterations(report, &mut out);
    render_checks(report, &mut out);
    render_thresholds(report, &mut out);

    if let Some(abort) = &report.abort {
        writeln!(&mut out, "aborted: {abort}").ok();
    }
    writeln!(&mut out, "result: {}", report.overall).ok();

    out
}

fn render_requests(report: &RunReport, out: &mut String) {
    let r = &report.requests;
    writeln!(
        out,
        "requests: {} (failed {}, {})",
        r.count,
        r.failed,
        format_percent(r.failed, r.count)
    )
    .ok();
    writeln!(
        out,
        "  bytes: recv {} sent {}",
        format_bytes(r.data_received),
        format_bytes(r.data_sent)
    )
    .ok();

    if r.count == 0 {
        return;
    }

    writeln!(
        out,
        "  latency: min {} avg {} p50 {} p90 {} p95 {} p99 {} max {}",
        format_ms_opt(r.min_ms),
        format_ms_opt(r.avg_ms),
        format_ms_opt(r.p50_ms),
        format_ms_opt(r.p90_ms),
        format_ms_opt(r.p95_ms),
        format_ms_opt(r.p99_ms),
        format_ms_opt(r.max_ms),
    )
    .ok();

    let by_name = report.metrics.metrics.group_by(HTTP_REQ_DURATION, "name");
    if by_name.len() < 2 {
        return;
    }
    let width = by_name.keys().map(|k| k.len()).max().unwrap_or(0);
    for (name, agg) in &by_name {
        let Aggregate::Histogram(h) = agg else {
            continue;
        };
        writeln!(
            out,
            "    {name:<width$}  n={} avg {} p95 {}",
            h.count(),
            format_ms_opt(h.mean()),
            format_ms_opt(h.percentile(95.0)),
        )
        .ok();
    }
}

fn render_iterations(report: &RunReport, out: &mut String) {
    let it = &report.iterations;
    writeln!(
        out,
        "iterations: {} (failed {}) avg {} p95 {}",
        it.count,
        it.failed,
        format_ms_opt(it.avg_ms),
        format_ms_opt(it.p95_ms)
    )
    .ok();
}

fn render_checks(report: &RunReport, out: &mut String) {
    if report.checks.is_empty() {
        return;
    }

    writeln!(out, "checks:").ok();
    for (name, counts) in &report.checks {
        let mark = if counts.fail == 0 { "ok" } else { "FAIL" };
        writeln!(
            out,
            "  [{mark}] {name}: {}/{} passed",
            counts.pass,
            counts.total()
        )
        .ok();
    }
}

fn render_thresholds(report: &RunReport, out: &mut String) {
    if report.thresholds.is_empty() {
        return;
    }

    writeln!(out, "thresholds:").ok();
    for v in &report.thresholds {
        let observed = v
            .observed
            .map(|x| format!("{x:.4}"))
            .unwrap_or_else(|| "no data".to_string());
        let mark = match v.status {
            ThresholdStatus::Passing => "ok",
            ThresholdStatus::Breached => "BREACHED",
        };
        writeln!(
            out,
            "  [{mark}] {} {} (observed {observed})",
            v.metric_key, v.expression
        )
        .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rampr_core::{AbortReason, MetricsSnapshot, ThresholdVerdict};

    fn verdict(status: ThresholdStatus, observed: Option<f64>) -> ThresholdVerdict {
        ThresholdVerdict {
            metric_key: "http_req_duration".to_string(),
            expression: "p(95)<200".to_string(),
            observed,
            status,
            abort_on_fail: false,
            delay_abort_eval: None,
        }
    }

    #[test]
    fn render_lists_thresholds_and_result() {
        let report = RunReport::new(
            Duration::from_secs(3),
            MetricsSnapshot::default(),
            Default::default(),
            vec![verdict(ThresholdStatus::Breached, Some(250.0))],
            4,
            0,
            None,
        );

        let out = render(&report);
        assert!(out.contains("duration: 3s"), "{out}");
        assert!(out.contains("[BREACHED] http_req_duration p(95)<200 (observed 250.0000)"));
        assert!(out.contains("result: failed"));
    }

    #[test]
    fn render_shows_abort_reason() {
        let report =
            RunReport::aborted_before_start(AbortReason::SetupFailed("login: 401".to_string()));
        let out = render(&report);
        assert!(out.contains("aborted:"), "{out}");
        assert!(out.contains("login: 401"), "{out}");
        assert!(!out.contains("latency:"));
    }

    #[test]
    fn missing_threshold_data_is_spelled_out() {
        let report = RunReport::new(
            Duration::from_secs(1),
            MetricsSnapshot::default(),
            Default::default(),
            vec![verdict(ThresholdStatus::Breached, None)],
            0,
            0,
            None,
        );
        assert!(render(&report).contains("(observed no data)"));
    }
}
