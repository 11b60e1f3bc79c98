use std::path::Path;
use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_duration_single, format_percent, format_rate};
use progress::HumanProgress;
use rampr_core::{ProgressFn, RunOptions, RunPhase, RunReport, TestPlan};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, script_path: &Path, plan: &TestPlan, options: &RunOptions) {
        println!("script: {}", script_path.display());
        if let Some(base) = &options.base_url {
            println!("target: {base}");
        }

        let total: std::time::Duration = plan.stages.iter().map(|s| s.duration).sum();
        let peak = plan.stages.iter().map(|s| s.target).max().unwrap_or(0);
        let peak = options.max_vus.map_or(peak, |cap| peak.min(cap));
        println!(
            "stages: {} duration={} peak_vus={peak} graceful_stop={}",
            plan.stages.len(),
            format_duration_single(total),
            format_duration_single(options.graceful_stop)
        );
        for (i, stage) in plan.stages.iter().enumerate() {
            println!(
                "  {}: {} -> {} vus",
                i + 1,
                format_duration_single(stage.duration),
                stage.target
            );
        }
        if !plan.thresholds.is_empty() {
            println!("thresholds: {}", plan.thresholds.len());
        }
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u| {
            if u.phase == RunPhase::Completed {
                progress.finish();
                return;
            }

            let m = &u.metrics;
            let mut message = format!(
                "{} stage {}/{} vus={}/{} rps={} errors={}",
                u.phase,
                u.stage.stage,
                u.stage.stages,
                u.live_vus,
                u.target_vus,
                format_rate(m.rps_now),
                format_percent(m.failed_requests_total, m.requests_total),
            );
            if u.retiring_vus > 0 {
                message.push_str(&format!(" retiring={}", u.retiring_vus));
            }
            if let Some(p95) = m.latency_p95_ms {
                message.push_str(&format!(" p95={p95:.1}ms"));
            }
            if m.checks_failed_total > 0 {
                message.push_str(&format!(" checks_failed={}", m.checks_failed_total));
            }

            progress.update(u.total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", summary::render(report));
        Ok(())
    }
}
