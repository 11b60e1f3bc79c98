use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use rampr_core::RunOptions;
use rampr_core::config::EnvVars;

use crate::cli::RunArgs;
use crate::output::JsonReport;
use crate::script_yaml::{ScriptDoc, positive};

pub(crate) fn merged_env(overrides: &[String]) -> anyhow::Result<EnvVars> {
    let mut map: BTreeMap<String, String> = std::env::vars().collect();

    for raw in overrides {
        let (k, v) = parse_env_override(raw)?;
        map.insert(k, v);
    }

    let vars: Vec<(Arc<str>, Arc<str>)> = map
        .into_iter()
        .map(|(k, v)| (Arc::<str>::from(k), Arc::<str>::from(v)))
        .collect();

    Ok(Arc::from(vars.into_boxed_slice()))
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}

/// Defaults, then script `options`, then CLI flags.
pub(crate) fn run_options(
    doc: &ScriptDoc,
    args: &RunArgs,
    env: EnvVars,
) -> anyhow::Result<RunOptions> {
    let mut opts = RunOptions::default();
    doc.apply_options(&mut opts)?;

    if let Some(url) = &args.base_url {
        opts.base_url = Some(url.clone());
    }
    if let Some(v) = args.max_vus {
        opts.max_vus = Some(v);
    }
    if let Some(v) = args.max_duration {
        opts.max_duration = Some(positive("--max-duration", v)?);
    }
    if let Some(v) = args.tick {
        opts.tick = positive("--tick", v)?;
    }
    if let Some(v) = args.graceful_stop {
        opts.graceful_stop = v;
    }
    opts.env = env;

    Ok(opts)
}

pub(crate) async fn write_summary_export(path: &Path, report: &JsonReport) -> anyhow::Result<()> {
    let body = serde_json::to_vec_pretty(report).context("failed to encode summary")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create summary dir: {}", parent.display()))?;
    }
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("failed to write summary: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use crate::script_yaml::parse_script;
    use std::path::PathBuf;
    use std::time::Duration;

    fn args() -> RunArgs {
        RunArgs {
            script: PathBuf::from("t.yaml"),
            base_url: None,
            max_vus: None,
            max_duration: None,
            tick: None,
            graceful_stop: None,
            env: Vec::new(),
            output: OutputFormat::HumanReadable,
            summary_export: None,
        }
    }

    fn doc(yaml: &str) -> ScriptDoc {
        parse_script(yaml.as_bytes()).unwrap_or_else(|e| panic!("{e}"))
    }

    const SCRIPT: &str = r#"
target: http://script.test
options:
  maxVUs: 7
  tick: 500ms
  gracefulStop: 2s
stages:
  - { duration: 1s, target: 1 }
steps:
  - request: { url: /x }
"#;

    #[test]
    fn env_override_requires_key_value() {
        assert!(parse_env_override("NOPE").is_err());
        assert!(parse_env_override("=v").is_err());
        assert_eq!(
            parse_env_override("A=b=c").unwrap_or_else(|e| panic!("{e}")),
            ("A".to_string(), "b=c".to_string())
        );
    }

    #[test]
    fn cli_env_overrides_process_env() {
        let env = merged_env(&["RAMPR_TEST_ONLY_VAR=1".to_string()])
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(
            env.iter()
                .any(|(k, v)| &**k == "RAMPR_TEST_ONLY_VAR" && &**v == "1")
        );
    }

    #[test]
    fn script_options_apply_when_no_flags() {
        let opts = run_options(&doc(SCRIPT), &args(), Arc::from(Vec::new()))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(opts.max_vus, Some(7));
        assert_eq!(opts.tick, Duration::from_millis(500));
        assert_eq!(opts.graceful_stop, Duration::from_secs(2));
        assert_eq!(
            opts.base_url.as_ref().map(|u| u.host_str()),
            Some(Some("script.test"))
        );
    }

    #[test]
    fn flags_take_precedence_over_script_options() {
        let mut a = args();
        a.max_vus = Some(2);
        a.tick = Some(Duration::from_millis(100));
        a.base_url = Some(url::Url::parse("http://flag.test").unwrap_or_else(|e| panic!("{e}")));

        let opts =
            run_options(&doc(SCRIPT), &a, Arc::from(Vec::new())).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(opts.max_vus, Some(2));
        assert_eq!(opts.tick, Duration::from_millis(100));
        assert_eq!(
            opts.base_url.as_ref().map(|u| u.host_str()),
            Some(Some("flag.test"))
        );
    }

    #[test]
    fn zero_tick_flag_is_rejected() {
        let mut a = args();
        a.tick = Some(Duration::ZERO);
        assert!(run_options(&doc(SCRIPT), &a, Arc::from(Vec::new())).is_err());
    }
}
