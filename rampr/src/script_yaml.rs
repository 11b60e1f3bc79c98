use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use rampr_core::{
    CheckPredicate, CheckSpec, CheckStep, ExtractSource, ExtractStep, RequestBody, RequestStep,
    RunOptions, Script, SetupScope, Stage, Step, TestPlan, ThresholdCondition, ThresholdSet,
};
use serde::Deserialize;

/// Top-level test script document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScriptDoc {
    /// Base URL for relative request URLs.
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub options: OptionsYaml,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdsYaml>,

    /// per-run | per-vu
    #[serde(default)]
    pub setup_scope: Option<String>,

    #[serde(default)]
    pub setup: Vec<StepYaml>,

    #[serde(default)]
    pub steps: Vec<StepYaml>,

    #[serde(default)]
    pub teardown: Vec<StepYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct OptionsYaml {
    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    #[serde(rename = "maxVUs", alias = "maxVus", default)]
    pub max_vus: Option<u64>,

    #[serde(default)]
    pub tick: Option<YamlDuration>,

    #[serde(default)]
    pub max_duration: Option<YamlDuration>,

    #[serde(default)]
    pub threshold_interval: Option<YamlDuration>,

    #[serde(default)]
    pub request_timeout: Option<YamlDuration>,

    #[serde(default)]
    pub connect_timeout: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: Option<YamlDuration>,

    #[serde(alias = "duration_ms", default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_str(&v)
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdsYaml {
    One(String),
    Many(Vec<ThresholdEntryYaml>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdEntryYaml {
    Expr(String),
    Full(ThresholdObjectYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ThresholdObjectYaml {
    pub threshold: String,

    #[serde(default)]
    pub abort_on_fail: bool,

    #[serde(default)]
    pub delay_abort_eval: Option<YamlDuration>,
}

/// Exactly one of the fields must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StepYaml {
    #[serde(default)]
    pub request: Option<RequestYaml>,
    #[serde(default)]
    pub check: Option<OneOrMany<CheckYaml>>,
    #[serde(default)]
    pub sleep: Option<YamlDuration>,
    #[serde(default)]
    pub extract: Option<ExtractYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    /// Metric tag; defaults to the unrendered URL.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_method")]
    pub method: String,

    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub json: Option<serde_json::Value>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,

    #[serde(default)]
    pub critical: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CheckYaml {
    pub name: String,

    #[serde(default)]
    pub critical: bool,

    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub status_in: Option<Vec<u16>>,
    #[serde(default)]
    pub body_contains: Option<String>,
    #[serde(default)]
    pub json_exists: Option<String>,
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub equals: Option<serde_json::Value>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub header_equals: Option<String>,
    #[serde(default)]
    pub duration_below: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ExtractYaml {
    pub var: String,

    #[serde(default)]
    pub json: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub body: bool,

    #[serde(default)]
    pub critical: bool,
}

/// JSON documents are accepted too, being valid YAML.
pub(crate) fn looks_like_yaml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()).map(|s| s.to_ascii_lowercase()),
        Some(ext) if ext == "yml" || ext == "yaml" || ext == "json"
    )
}

pub(crate) async fn load_script(path: &Path) -> anyhow::Result<ScriptDoc> {
    if !looks_like_yaml_path(path) {
        anyhow::bail!(
            "unsupported script extension (expected .yaml, .yml or .json): {}",
            path.display()
        );
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read script: {}", path.display()))?;

    parse_script(&bytes).with_context(|| format!("failed to parse YAML: {}", path.display()))
}

pub(crate) fn parse_script(bytes: &[u8]) -> anyhow::Result<ScriptDoc> {
    Ok(serde_yaml::from_slice(bytes)?)
}

impl ScriptDoc {
    /// Converts the document into a plan. Schedule and script semantics are
    /// checked later by the engine; this only rejects what cannot be
    /// represented at all.
    pub(crate) fn to_plan(&self) -> anyhow::Result<TestPlan> {
        Ok(TestPlan {
            stages: self.stages()?,
            thresholds: self.thresholds()?,
            script: self.script()?,
        })
    }

    fn stages(&self) -> anyhow::Result<Vec<Stage>> {
        self.stages
            .iter()
            .enumerate()
            .map(|(idx, s)| {
                let duration = match (s.duration, s.duration_ms) {
                    (Some(d), None) => d.into_inner(),
                    (None, Some(ms)) => Duration::from_millis(ms),
                    (Some(_), Some(_)) => {
                        anyhow::bail!("stages[{idx}]: set either `duration` or `durationMs`, not both")
                    }
                    (None, None) => anyhow::bail!("stages[{idx}]: missing `duration`"),
                };
                Ok(Stage::new(duration, s.target))
            })
            .collect()
    }

    fn thresholds(&self) -> anyhow::Result<Vec<ThresholdSet>> {
        self.thresholds
            .iter()
            .map(|(key, raw)| {
                let entries = match raw {
                    ThresholdsYaml::One(expr) => vec![ThresholdEntryYaml::Expr(expr.clone())],
                    ThresholdsYaml::Many(entries) => entries.clone(),
                };

                let conditions = entries
                    .into_iter()
                    .map(|entry| threshold_condition(key, entry))
                    .collect::<anyhow::Result<Vec<_>>>()?;

                Ok(ThresholdSet::new(key, conditions)?)
            })
            .collect()
    }

    fn script(&self) -> anyhow::Result<Script> {
        let setup_scope = match &self.setup_scope {
            None => SetupScope::default(),
            Some(raw) => raw
                .parse::<SetupScope>()
                .map_err(|_| anyhow::anyhow!("invalid setupScope `{raw}` (expected per-run or per-vu)"))?,
        };

        Ok(Script {
            setup: convert_steps("setup", &self.setup)?,
            steps: convert_steps("steps", &self.steps)?,
            teardown: convert_steps("teardown", &self.teardown)?,
            setup_scope,
        })
    }

    /// Script options in the precedence slot below CLI flags.
    pub(crate) fn apply_options(&self, opts: &mut RunOptions) -> anyhow::Result<()> {
        if let Some(target) = &self.target {
            let url = url::Url::parse(target)
                .with_context(|| format!("invalid `target` url: {target}"))?;
            opts.base_url = Some(url);
        }

        let o = &self.options;
        if let Some(v) = o.max_vus {
            opts.max_vus = Some(v);
        }
        if let Some(v) = o.graceful_stop {
            opts.graceful_stop = v.into_inner();
        }
        if let Some(v) = o.tick {
            opts.tick = positive("options.tick", v.into_inner())?;
        }
        if let Some(v) = o.max_duration {
            opts.max_duration = Some(positive("options.maxDuration", v.into_inner())?);
        }
        if let Some(v) = o.threshold_interval {
            opts.threshold_interval = positive("options.thresholdInterval", v.into_inner())?;
        }
        if let Some(v) = o.request_timeout {
            opts.request_timeout = positive("options.requestTimeout", v.into_inner())?;
        }
        if let Some(v) = o.connect_timeout {
            opts.connect_timeout = positive("options.connectTimeout", v.into_inner())?;
        }
        Ok(())
    }
}

pub(crate) fn positive(what: &str, d: Duration) -> anyhow::Result<Duration> {
    if d.is_zero() {
        anyhow::bail!("{what} must be greater than zero");
    }
    Ok(d)
}

fn threshold_condition(key: &str, entry: ThresholdEntryYaml) -> anyhow::Result<ThresholdCondition> {
    let (expr, abort_on_fail, delay) = match entry {
        ThresholdEntryYaml::Expr(expr) => (expr, false, None),
        ThresholdEntryYaml::Full(obj) => (
            obj.threshold,
            obj.abort_on_fail,
            obj.delay_abort_eval.map(YamlDuration::into_inner),
        ),
    };

    let cond = ThresholdCondition::parse(&expr)
        .map_err(|reason| anyhow::anyhow!("invalid threshold `{expr}` for `{key}`: {reason}"))?;

    match (abort_on_fail, delay) {
        (true, delay) => Ok(cond.abort_on_fail(delay)),
        (false, None) => Ok(cond),
        (false, Some(_)) => {
            anyhow::bail!("threshold `{expr}` for `{key}`: `delayAbortEval` requires `abortOnFail`")
        }
    }
}

fn convert_steps(section: &str, steps: &[StepYaml]) -> anyhow::Result<Vec<Step>> {
    steps
        .iter()
        .enumerate()
        .map(|(idx, step)| convert_step(step).with_context(|| format!("{section}[{idx}]")))
        .collect()
}

fn convert_step(step: &StepYaml) -> anyhow::Result<Step> {
    let set = [
        step.request.is_some(),
        step.check.is_some(),
        step.sleep.is_some(),
        step.extract.is_some(),
    ]
    .into_iter()
    .filter(|b| *b)
    .count();
    if set != 1 {
        anyhow::bail!("a step must have exactly one of `request`, `check`, `sleep`, `extract`");
    }

    if let Some(req) = &step.request {
        return convert_request(req).map(Step::Request);
    }
    if let Some(checks) = &step.check {
        return convert_checks(checks.clone().into_vec()).map(Step::Check);
    }
    if let Some(d) = step.sleep {
        return Ok(Step::Sleep(d.into_inner()));
    }
    if let Some(ex) = &step.extract {
        return convert_extract(ex).map(Step::Extract);
    }
    anyhow::bail!("empty step")
}

fn convert_request(req: &RequestYaml) -> anyhow::Result<RequestStep> {
    let method = http::Method::from_bytes(req.method.trim().to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method `{}`", req.method))?;

    let mut step = RequestStep::new(method, req.url.clone());
    if let Some(name) = &req.name {
        step = step.named(name);
    }
    for (k, v) in &req.headers {
        step = step.header(k.clone(), v.clone());
    }
    step = match (&req.body, &req.json) {
        (Some(_), Some(_)) => anyhow::bail!("request: set either `body` or `json`, not both"),
        (Some(text), None) => step.body(RequestBody::Text(text.clone())),
        (None, Some(doc)) => step.body(RequestBody::Json(doc.clone())),
        (None, None) => step,
    };
    if let Some(t) = req.timeout {
        step.timeout = Some(positive("request timeout", t.into_inner())?);
    }
    if req.critical {
        step = step.critical();
    }
    Ok(step)
}

fn convert_checks(checks: Vec<CheckYaml>) -> anyhow::Result<CheckStep> {
    if checks.is_empty() {
        anyhow::bail!("check: at least one check is required");
    }
    let critical = checks.iter().any(|c| c.critical);
    let checks = checks
        .iter()
        .map(|c| Ok(CheckSpec::new(c.name.clone(), check_predicate(c)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(CheckStep { checks, critical })
}

fn check_predicate(c: &CheckYaml) -> anyhow::Result<CheckPredicate> {
    let mut found = Vec::new();

    if let Some(code) = c.status {
        found.push(CheckPredicate::Status(code));
    }
    if let Some(codes) = &c.status_in {
        found.push(CheckPredicate::StatusIn(codes.clone()));
    }
    if let Some(needle) = &c.body_contains {
        found.push(CheckPredicate::BodyContains(needle.clone()));
    }
    if let Some(path) = &c.json_exists {
        found.push(CheckPredicate::JsonExists(path.clone()));
    }
    match (&c.json_path, &c.equals) {
        (Some(path), Some(value)) => found.push(CheckPredicate::JsonEquals {
            path: path.clone(),
            value: value.clone(),
        }),
        (Some(_), None) => anyhow::bail!("check `{}`: `jsonPath` requires `equals`", c.name),
        (None, Some(_)) => anyhow::bail!("check `{}`: `equals` requires `jsonPath`", c.name),
        (None, None) => {}
    }
    match (&c.header, &c.header_equals) {
        (Some(name), Some(value)) => found.push(CheckPredicate::HeaderEquals {
            name: name.clone(),
            value: value.clone(),
        }),
        (Some(name), None) => found.push(CheckPredicate::HeaderExists(name.clone())),
        (None, Some(_)) => anyhow::bail!("check `{}`: `headerEquals` requires `header`", c.name),
        (None, None) => {}
    }
    if let Some(d) = c.duration_below {
        found.push(CheckPredicate::DurationBelow(d.into_inner()));
    }

    if found.len() > 1 {
        anyhow::bail!("check `{}` has more than one predicate", c.name);
    }
    found
        .pop()
        .with_context(|| format!("check `{}` has no predicate", c.name))
}

fn convert_extract(ex: &ExtractYaml) -> anyhow::Result<ExtractStep> {
    let mut sources = Vec::new();
    if let Some(path) = &ex.json {
        sources.push(ExtractSource::Json(path.clone()));
    }
    if let Some(name) = &ex.header {
        sources.push(ExtractSource::Header(name.clone()));
    }
    if ex.status {
        sources.push(ExtractSource::Status);
    }
    if ex.body {
        sources.push(ExtractSource::Body);
    }

    if sources.len() != 1 {
        anyhow::bail!(
            "extract `{}`: exactly one of `json`, `header`, `status`, `body` is required",
            ex.var
        );
    }
    let from = sources
        .pop()
        .with_context(|| format!("extract `{}`: missing source", ex.var))?;

    Ok(ExtractStep {
        var: ex.var.clone(),
        from,
        critical: ex.critical,
    })
}
