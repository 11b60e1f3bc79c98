use crate::metrics::{MetricKind, MetricUnit};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is already registered as {existing}, not {requested}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("metric `{name}` is already registered with unit {existing}, not {requested}")]
    UnitMismatch {
        name: String,
        existing: MetricUnit,
        requested: MetricUnit,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
