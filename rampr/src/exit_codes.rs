use rampr_core::{AbortReason, RunReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed, including a threshold-triggered abort.
    ThresholdsFailed = 11,

    /// The run was aborted before completing (shared setup failed, target unresolvable).
    RunAborted = 12,

    /// Invalid CLI/config/script (bad flags, unreadable or invalid document, invalid schedule or thresholds).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Failed checks alone never change the exit code.
    #[must_use]
    pub fn from_report(report: &RunReport) -> Self {
        match &report.abort {
            Some(AbortReason::InvalidSchedule(_) | AbortReason::InvalidScript(_)) => {
                Self::InvalidInput
            }
            Some(AbortReason::SetupFailed(_) | AbortReason::TargetUnresolvable(_)) => {
                Self::RunAborted
            }
            Some(AbortReason::Internal(_)) => Self::RuntimeError,
            Some(AbortReason::ThresholdBreached { .. }) => Self::ThresholdsFailed,
            None if report.thresholds_breached() => Self::ThresholdsFailed,
            None => Self::Success,
        }
    }
}
