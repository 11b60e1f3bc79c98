use rampr_core::{Orchestrator, RampingSchedule};

use crate::cli::{RunArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::output::{self, JsonReport};
use crate::run_error::RunError;
use crate::run_support::{merged_env, run_options, write_summary_export};
use crate::script_yaml::load_script;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let doc = load_script(&args.script)
        .await
        .map_err(RunError::InvalidInput)?;
    let env = merged_env(&args.env).map_err(RunError::InvalidInput)?;
    let options = run_options(&doc, &args, env).map_err(RunError::InvalidInput)?;
    let plan = doc.to_plan().map_err(RunError::InvalidInput)?;

    tracing::debug!(
        script = %args.script.display(),
        stages = plan.stages.len(),
        thresholds = plan.thresholds.len(),
        "loaded script"
    );

    out.print_header(&args.script, &plan, &options);

    let mut orchestrator = Orchestrator::new(plan, options);
    if let Some(progress) = out.progress() {
        orchestrator = orchestrator.with_progress(progress);
    }
    let report = orchestrator.run().await;

    out.print_summary(&report)
        .map_err(RunError::RuntimeError)?;

    if let Some(path) = &args.summary_export {
        write_summary_export(path, &JsonReport::from_report(&report))
            .await
            .map_err(RunError::RuntimeError)?;
    }

    let code = ExitCode::from_report(&report);
    tracing::debug!(exit_code = code.as_i32(), overall = %report.overall, "run finished");
    Ok(code)
}

/// Checks a script the same way `run` would, without sending traffic.
pub async fn validate(args: ValidateArgs) -> Result<ExitCode, RunError> {
    let doc = load_script(&args.script)
        .await
        .map_err(RunError::InvalidInput)?;
    let plan = doc.to_plan().map_err(RunError::InvalidInput)?;
    let mut options = rampr_core::RunOptions::default();
    doc.apply_options(&mut options)
        .map_err(RunError::InvalidInput)?;

    let schedule = RampingSchedule::new(plan.stages.clone())
        .map_err(|e| RunError::InvalidInput(e.into()))?;
    plan.script
        .validate()
        .map_err(|e| RunError::InvalidInput(e.into()))?;

    println!(
        "ok: {} stages ({:?}, peak {} vus), {} steps, {} thresholds",
        schedule.stages().len(),
        schedule.total_duration(),
        schedule.peak_target(),
        plan.script.steps.len(),
        plan.thresholds.len()
    );
    Ok(ExitCode::Success)
}
