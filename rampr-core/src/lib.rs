//! Load-generation engine: ramping virtual users, request/check recording
//! and threshold verdicts.

pub mod checks;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod progress;
pub mod recorder;
pub mod report;
pub mod response;
pub mod schedule;
pub mod scheduler;
pub mod script;
pub mod template;
pub mod thresholds;
pub mod thresholds_eval;
pub mod vu;

pub use checks::{CheckCounts, CheckEvaluator, CheckResult};
pub use config::{RunOptions, SetupScope, Stage};
pub use error::{
    CheckFailure, CriticalStepFailure, Error, RequestFailure, Result, ScheduleError, StepFailure,
};
pub use orchestrator::{Orchestrator, RunPhase, TestPlan, run};
pub use progress::{LiveMetrics, ProgressFn, ProgressUpdate, StageProgress};
pub use recorder::{MetricRecorder, MetricsSnapshot, OutcomeStatus, RequestOutcome};
pub use report::{AbortReason, IterationStats, RequestStats, RunReport, Verdict};
pub use schedule::{RampingSchedule, StageSnapshot};
pub use script::{
    CheckPredicate, CheckSpec, CheckStep, ExtractSource, ExtractStep, RequestBody, RequestStep,
    Script, Step,
};
pub use thresholds::{ThresholdCondition, ThresholdSet};
pub use thresholds_eval::{ThresholdStatus, ThresholdVerdict, evaluate_thresholds};
