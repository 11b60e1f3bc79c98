use crate::cli::OutputFormat;
use std::path::Path;

use rampr_core::{ProgressFn, RunOptions, RunReport, TestPlan};

mod human;
mod json;

pub(crate) use json::JsonReport;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, script_path: &Path, plan: &TestPlan, options: &RunOptions);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
