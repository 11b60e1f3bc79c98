use rampr_http::HttpTransportErrorKind;

use crate::template::TemplateError;

pub type Result<T> = std::result::Result<T, Error>;

/// Malformed ramp schedule. Always fatal, raised before any VU starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule must contain at least one stage")]
    Empty,

    #[error("stage {index} has a non-positive duration")]
    NonPositiveDuration { index: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("invalid threshold `{expression}` for metric `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error(transparent)]
    Metrics(#[from] rampr_metrics::Error),
}

/// A request step that did not produce a successful response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestFailure {
    #[error("{kind}: {message}")]
    Transport {
        kind: HttpTransportErrorKind,
        message: String,
    },

    #[error("unexpected status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed checks: {}", .failed.join(", "))]
pub struct CheckFailure {
    pub failed: Vec<String>,
}

/// Why a single step failed. Recorded and logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepFailure {
    #[error("request `{name}`: {source}")]
    Request {
        name: String,
        #[source]
        source: RequestFailure,
    },

    #[error(transparent)]
    Check(#[from] CheckFailure),

    #[error("extract `{var}`: {reason}")]
    Extract { var: String, reason: String },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// A step flagged `critical` failed; the rest of the iteration is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("critical step {step} failed: {source}")]
pub struct CriticalStepFailure {
    pub step: usize,
    #[source]
    pub source: StepFailure,
}
