use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))?;

    match unit_str.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        "h" | "hr" | "hrs" | "hour" | "hours" => {
            let secs = value
                .checked_mul(60)
                .and_then(|v| v.checked_mul(60))
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        )),
    }
}

fn parse_base_url(input: &str) -> Result<url::Url, String> {
    let url = url::Url::parse(input.trim()).map_err(|e| format!("invalid base url '{input}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported base url scheme '{other}' (expected http or https)")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar on stderr, summary on stdout.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) and a final summary line to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "rampr",
    author,
    version,
    about = "Ramping load generator with pass/fail thresholds",
    long_about = "rampr runs a YAML test script against an HTTP target.\n\nThe script declares a ramp schedule (`stages`), a fixed sequence of typed steps (request, check, sleep, extract) that every virtual user repeats, optional `setup`/`teardown` steps, and `thresholds` that decide whether the run passed.\n\nString values may reference `${var}` (extracted values), `${__VU}`, `${__ITER}` and `${__ENV.NAME}`.",
    after_help = "Examples:\n  rampr run demos/performance-test.yaml\n  rampr run demos/user-flow.yaml --base-url http://localhost:8080 --max-vus 20\n  rampr run demos/user-flow.yaml --output json --summary-export summary.json\n  rampr validate demos/user-flow.yaml"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test script
    #[command(
        long_about = "Run a test script: ramp virtual users through the configured stages, then evaluate thresholds.\n\nCLI flags override values from the script's `options`."
    )]
    Run(RunArgs),

    /// Parse and validate a script without sending any traffic
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the script (.yaml)
    pub script: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the script (.yaml)
    pub script: PathBuf,

    /// Prefix for relative request URLs (overrides the script's `target`)
    #[arg(long, env = "RAMPR_BASE_URL", value_parser = parse_base_url)]
    pub base_url: Option<url::Url>,

    /// Upper bound on concurrently live virtual users
    #[arg(long)]
    pub max_vus: Option<u64>,

    /// Hard deadline for the whole run (e.g. 5m)
    #[arg(long, value_parser = parse_duration)]
    pub max_duration: Option<Duration>,

    /// Scheduling tick (e.g. 1s, 250ms)
    #[arg(long, value_parser = parse_duration)]
    pub tick: Option<Duration>,

    /// How long retiring virtual users may take to finish their iteration
    #[arg(long, value_parser = parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Add/override env vars visible to the script (repeatable, KEY=VALUE).
    /// CLI-provided vars override the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Also write the final JSON report to this file
    #[arg(long, value_name = "PATH")]
    pub summary_export: Option<PathBuf>,
}
