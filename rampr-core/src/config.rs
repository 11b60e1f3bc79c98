use std::sync::Arc;
use std::time::Duration;

/// One segment of a ramp: move linearly to `target` VUs over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub const fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Whether `setup`/`teardown` run once for the whole run or once per VU.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SetupScope {
    /// Runs once before ramping; the extracted variables are shared read-only.
    #[default]
    PerRun,
    /// Every VU runs its own setup before its first iteration.
    PerVu,
}

pub type EnvVars = Arc<[(Arc<str>, Arc<str>)]>;

pub fn process_env_snapshot() -> EnvVars {
    std::env::vars()
        .map(|(k, v)| (Arc::<str>::from(k), Arc::<str>::from(v)))
        .collect::<Vec<_>>()
        .into()
}

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_THRESHOLD_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Run-level settings, fixed before the run starts.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Prefix for relative request URLs.
    pub base_url: Option<url::Url>,
    /// Upper bound on concurrently live VUs, whatever the schedule asks for.
    pub max_vus: Option<u64>,
    pub tick: Duration,
    pub graceful_stop: Duration,
    /// Hard deadline for the whole run. Defaults to the schedule length plus
    /// `graceful_stop`.
    pub max_duration: Option<Duration>,
    pub threshold_interval: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub env: EnvVars,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            max_vus: None,
            tick: DEFAULT_TICK,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            max_duration: None,
            threshold_interval: DEFAULT_THRESHOLD_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            env: Arc::from(Vec::new()),
        }
    }
}

impl RunOptions {
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| &**k == name)
            .map(|(_, v)| &**v)
    }
}
