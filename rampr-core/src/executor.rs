use std::time::{Duration, SystemTime};

use rampr_http::{HttpRequest, HttpResponse, HttpTransportErrorKind};
use tokio::time::Instant;

use crate::checks::predicate_holds;
use crate::error::{CheckFailure, CriticalStepFailure, RequestFailure, StepFailure};
use crate::recorder::{OutcomeStatus, RequestOutcome};
use crate::response::{ResponseView, json_to_var};
use crate::script::{CheckStep, ExtractSource, ExtractStep, RequestBody, RequestStep, Step};
use crate::template::{TemplateError, TemplateScope, render, render_json};
use crate::vu::{RunContext, VuState};

/// Which step failures end the sequence early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Only steps flagged `critical` abort the sequence.
    CriticalOnly,
    /// Any failing step aborts the sequence. Used for setup.
    FailFast,
}

#[derive(Debug, Default)]
pub struct StepsOutcome {
    /// Steps that ran (including the one that aborted the sequence).
    pub executed: usize,
    /// Failed steps that did not abort the sequence.
    pub failures: Vec<(usize, StepFailure)>,
    pub aborted: Option<CriticalStepFailure>,
}

impl StepsOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.aborted.is_none()
    }
}

/// Runs `steps` in order for one VU. Request and check results are recorded
/// as they happen; failures never escape as errors.
pub async fn execute_steps(
    run: &RunContext,
    state: &mut VuState,
    steps: &[Step],
    policy: StepPolicy,
) -> StepsOutcome {
    let mut outcome = StepsOutcome::default();

    for (idx, step) in steps.iter().enumerate() {
        outcome.executed += 1;
        let Err(failure) = execute_step(run, state, step).await else {
            continue;
        };

        if step.is_critical() || policy == StepPolicy::FailFast {
            tracing::debug!(
                vu = state.vu_id,
                iteration = state.iteration,
                step = idx,
                kind = step.kind(),
                error = %failure,
                "critical step failed, skipping rest of sequence"
            );
            outcome.aborted = Some(CriticalStepFailure {
                step: idx,
                source: failure,
            });
            break;
        }

        tracing::trace!(vu = state.vu_id, step = idx, error = %failure, "step failed");
        outcome.failures.push((idx, failure));
    }

    outcome
}

async fn execute_step(run: &RunContext, state: &mut VuState, step: &Step) -> Result<(), StepFailure> {
    match step {
        Step::Request(req) => execute_request(run, state, req).await,
        Step::Check(check) => execute_checks(run, state, check),
        Step::Sleep(d) => {
            tokio::time::sleep(*d).await;
            Ok(())
        }
        Step::Extract(extract) => execute_extract(state, extract),
    }
}

fn build_request(run: &RunContext, state: &VuState, step: &RequestStep) -> Result<HttpRequest, TemplateError> {
    let scope = TemplateScope {
        locals: &state.vars,
        shared: &state.shared,
        vu_id: state.vu_id,
        iteration: state.iteration,
        env: &run.options.env,
    };

    let path = render(&step.url, &scope)?;
    let url = resolve_url(run.options.base_url.as_ref(), &path);

    let mut req = HttpRequest::new(step.method.clone(), url)
        .with_timeout(Some(step.timeout.unwrap_or(run.options.request_timeout)));

    for (name, value) in &step.headers {
        req = req.with_header(name.clone(), render(value, &scope)?.into_owned());
    }

    match &step.body {
        None => {}
        Some(RequestBody::Text(text)) => {
            req = req.with_body(render(text, &scope)?.into_owned());
        }
        Some(RequestBody::Json(doc)) => {
            let doc = render_json(doc, &scope)?;
            if !req.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                req = req.with_header("content-type", "application/json");
            }
            req = req.with_body(doc.to_string());
        }
    }

    Ok(req)
}

/// Absolute URLs pass through; anything else is appended to the base URL.
fn resolve_url(base: Option<&url::Url>, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    match base {
        Some(base) => format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
        None => path.to_string(),
    }
}

async fn execute_request(
    run: &RunContext,
    state: &mut VuState,
    step: &RequestStep,
) -> Result<(), StepFailure> {
    let req = match build_request(run, state, step) {
        Ok(req) => req,
        Err(e) => {
            // A request that could not be built still counts as a failed request.
            state.last_response = None;
            run.recorder.record(&RequestOutcome {
                name: step.name.clone(),
                method: step.method.clone(),
                status: OutcomeStatus::TransportError(HttpTransportErrorKind::RequestBuild),
                latency: Duration::ZERO,
                bytes_sent: 0,
                bytes_received: 0,
                timestamp: SystemTime::now(),
            });
            return Err(e.into());
        }
    };
    let started = Instant::now();
    let result: rampr_http::Result<HttpResponse> = run.client.request(req).await;

    let (status, latency, bytes_sent, bytes_received) = match &result {
        Ok(res) => (
            OutcomeStatus::Status(res.status),
            res.elapsed,
            res.bytes_sent,
            res.bytes_received,
        ),
        Err(e) => (
            OutcomeStatus::TransportError(e.transport_error_kind()),
            started.elapsed(),
            0,
            0,
        ),
    };

    let outcome = RequestOutcome {
        name: step.name.clone(),
        method: step.method.clone(),
        status,
        latency,
        bytes_sent,
        bytes_received,
        timestamp: SystemTime::now(),
    };
    run.recorder.record(&outcome);
    let failed = outcome.is_failure();

    match result {
        Ok(res) => {
            let code = res.status;
            state.last_response = Some(ResponseView::from(res));
            if failed {
                return Err(StepFailure::Request {
                    name: step.name.to_string(),
                    source: RequestFailure::Status(code),
                });
            }
            Ok(())
        }
        Err(e) => {
            state.last_response = None;
            Err(StepFailure::Request {
                name: step.name.to_string(),
                source: RequestFailure::Transport {
                    kind: e.transport_error_kind(),
                    message: e.to_string(),
                },
            })
        }
    }
}

fn execute_checks(run: &RunContext, state: &VuState, step: &CheckStep) -> Result<(), StepFailure> {
    let response = state.last_response.as_ref();
    let failed: Vec<String> = step
        .checks
        .iter()
        .filter_map(|spec| {
            let passed = predicate_holds(&spec.expect, response);
            let result = run.checks.evaluate(&spec.name, passed);
            (!result.passed).then(|| spec.name.clone())
        })
        .collect();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(CheckFailure { failed }.into())
    }
}

fn execute_extract(state: &mut VuState, step: &ExtractStep) -> Result<(), StepFailure> {
    let fail = |reason: &str| StepFailure::Extract {
        var: step.var.clone(),
        reason: reason.to_string(),
    };

    let res = state
        .last_response
        .as_ref()
        .ok_or_else(|| fail("no response to extract from"))?;

    let value = match &step.from {
        ExtractSource::Json(path) => res
            .json_path(path)
            .filter(|v| !v.is_null())
            .map(json_to_var)
            .ok_or_else(|| fail(&format!("json path `{path}` not found")))?,
        ExtractSource::Header(name) => res
            .header(name)
            .map(str::to_string)
            .ok_or_else(|| fail(&format!("header `{name}` not present")))?,
        ExtractSource::Status => res.status.to_string(),
        ExtractSource::Body => res.body_text().into_owned(),
    };

    state.vars.insert(step.var.clone(), value);
    Ok(())
}
