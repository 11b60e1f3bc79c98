use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rampr_http::HttpClient;
use rampr_metrics::Registry;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::checks::CheckEvaluator;
use crate::config::{RunOptions, SetupScope, Stage};
use crate::executor::{StepPolicy, execute_steps};
use crate::progress::{LiveMetrics, ProgressFn, ProgressUpdate, StageProgress};
use crate::recorder::MetricRecorder;
use crate::report::{AbortReason, RunReport};
use crate::schedule::RampingSchedule;
use crate::scheduler::{RampEnd, RampScheduler, SchedulerConfig, SchedulerTick};
use crate::script::{Script, Step};
use crate::template::Vars;
use crate::thresholds::ThresholdSet;
use crate::thresholds_eval::evaluate_thresholds;
use crate::vu::{RunContext, StopSignal, VuContext, VuState, run_vu};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Ramping,
    Draining,
    Completed,
}

impl RunPhase {
    /// `Idle -> Completed` is the fatal path taken before any VU starts.
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (RunPhase::Idle, RunPhase::Ramping)
                | (RunPhase::Idle, RunPhase::Completed)
                | (RunPhase::Ramping, RunPhase::Draining)
                | (RunPhase::Draining, RunPhase::Completed)
        )
    }
}

/// What to run: loaded once, immutable for the run.
#[derive(Debug, Clone, Default)]
pub struct TestPlan {
    pub stages: Vec<Stage>,
    pub thresholds: Vec<ThresholdSet>,
    pub script: Script,
}

pub struct Orchestrator {
    plan: TestPlan,
    options: RunOptions,
    client: Option<HttpClient>,
    progress: Option<ProgressFn>,
    phase: watch::Sender<RunPhase>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("plan", &self.plan)
            .field("options", &self.options)
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(plan: TestPlan, options: RunOptions) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            plan,
            options,
            client: None,
            progress: None,
            phase,
        }
    }

    /// Called once per scheduler tick while ramping.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Shares an existing connection pool instead of building one from the
    /// run options.
    #[must_use]
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    fn transition(&self, next: RunPhase) {
        let current = self.phase();
        if !current.can_transition_to(next) {
            tracing::error!(from = %current, to = %next, "invalid run phase transition");
            return;
        }
        self.phase.send_replace(next);
        tracing::info!(from = %current, to = %next, "run phase changed");
    }

    fn abort_before_start(&self, reason: AbortReason) -> RunReport {
        tracing::error!(reason = %reason, "run aborted before start");
        self.transition(RunPhase::Completed);
        RunReport::aborted_before_start(reason)
    }

    /// Runs the plan to completion. Never fails: every outcome, fatal ones
    /// included, ends up in the returned report.
    pub async fn run(self) -> RunReport {
        let started = Instant::now();

        let schedule = match RampingSchedule::new(self.plan.stages.clone()) {
            Ok(s) => Arc::new(s),
            Err(e) => return self.abort_before_start(AbortReason::InvalidSchedule(e.to_string())),
        };
        if let Err(e) = self.plan.script.validate() {
            return self.abort_before_start(AbortReason::InvalidScript(e.to_string()));
        }

        let registry = Arc::new(Registry::new());
        let (recorder, checks) = match MetricRecorder::with_registry(registry.clone())
            .and_then(|r| Ok((r, CheckEvaluator::with_metrics(registry)?)))
        {
            Ok((r, c)) => (Arc::new(r), Arc::new(c)),
            Err(e) => return self.abort_before_start(AbortReason::Internal(e.to_string())),
        };

        if let Err(reason) = preflight(&self.plan.script, &self.options).await {
            return self.abort_before_start(AbortReason::TargetUnresolvable(reason));
        }

        let client = self
            .client
            .clone()
            .unwrap_or_else(|| HttpClient::new(Some(self.options.connect_timeout)));
        let run = Arc::new(RunContext {
            script: Arc::new(self.plan.script.clone()),
            options: Arc::new(self.options.clone()),
            client,
            recorder: recorder.clone(),
            checks: checks.clone(),
        });
        let per_run_setup = run.script.setup_scope == SetupScope::PerRun;

        let shared = if per_run_setup && !run.script.setup.is_empty() {
            let mut state = VuState::new(0, Arc::new(Vars::new()));
            let outcome = execute_steps(&run, &mut state, &run.script.setup, StepPolicy::FailFast).await;
            if let Some(failure) = outcome.aborted {
                tracing::error!(error = %failure, "shared setup failed");
                self.transition(RunPhase::Completed);
                return RunReport::new(
                    started.elapsed(),
                    recorder.snapshot(),
                    checks.summary(),
                    Vec::new(),
                    0,
                    0,
                    Some(AbortReason::SetupFailed(failure.to_string())),
                );
            }
            tracing::debug!(vars = state.vars.len(), "shared setup finished");
            Arc::new(state.vars)
        } else {
            Arc::new(Vars::new())
        };

        // `None` when the schedule is too long for a deadline to be representable.
        let hard_deadline = self.options.max_duration.or_else(|| {
            schedule
                .total_duration()
                .checked_add(self.options.graceful_stop)
        });

        let thresholds: Arc<[ThresholdSet]> = self.plan.thresholds.clone().into();
        let abort = Arc::new(StopSignal::new());
        let abort_reason: Arc<OnceLock<AbortReason>> = Arc::new(OnceLock::new());

        self.transition(RunPhase::Ramping);
        tracing::info!(
            stages = schedule.stages().len(),
            duration = ?schedule.total_duration(),
            peak_target = schedule.peak_target(),
            hard_deadline = ?hard_deadline,
            "starting ramp"
        );

        let watcher = spawn_threshold_watcher(
            thresholds.clone(),
            recorder.clone(),
            self.options.threshold_interval,
            abort.clone(),
            abort_reason.clone(),
        );

        let spawn = {
            let run = run.clone();
            let shared = shared.clone();
            move |vu_id: u64, stop: Arc<StopSignal>| {
                let ctx = VuContext {
                    vu_id,
                    run: run.clone(),
                    shared: shared.clone(),
                    stop,
                };
                async move {
                    run_vu(ctx).await;
                }
            }
        };

        let mut scheduler = RampScheduler::new(
            schedule.clone(),
            SchedulerConfig {
                tick: self.options.tick,
                max_vus: self.options.max_vus,
                graceful_stop: self.options.graceful_stop,
                deadline: hard_deadline,
            },
            spawn,
        );

        let mut emitter = self.progress.clone().map(|f| {
            ProgressEmitter::new(f, recorder.clone(), checks.clone(), schedule.total_duration())
        });
        let end = scheduler
            .ramp(&abort, |tick| {
                if let Some(emitter) = emitter.as_mut() {
                    emitter.emit(RunPhase::Ramping, tick);
                }
            })
            .await;

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        match end {
            RampEnd::Completed => tracing::info!("schedule completed"),
            RampEnd::Aborted => {
                let reason = abort_reason.get().map(ToString::to_string).unwrap_or_default();
                tracing::warn!(reason = %reason, "run aborted during ramp");
            }
            RampEnd::DeadlineReached => {
                tracing::warn!(deadline = ?hard_deadline, "hard deadline reached, cancelling vus");
            }
        }

        self.transition(RunPhase::Draining);
        let stats = scheduler.drain().await;
        tracing::info!(
            spawned = stats.spawned,
            retired = stats.retired,
            aborted = stats.aborted,
            "all vus stopped"
        );

        if per_run_setup && !run.script.teardown.is_empty() {
            if end == RampEnd::DeadlineReached {
                tracing::warn!("skipping teardown after hard deadline");
            } else {
                let mut state = VuState::new(0, shared);
                let outcome =
                    execute_steps(&run, &mut state, &run.script.teardown, StepPolicy::CriticalOnly)
                        .await;
                if !outcome.is_success() {
                    tracing::warn!(
                        failures = outcome.failures.len() + usize::from(outcome.aborted.is_some()),
                        "teardown finished with failures"
                    );
                }
            }
        }

        self.transition(RunPhase::Completed);
        let snapshot = recorder.snapshot();
        let verdicts = evaluate_thresholds(&thresholds, &snapshot);
        for v in verdicts.iter().filter(|v| v.is_breached()) {
            tracing::info!(
                metric = %v.metric_key,
                expression = %v.expression,
                observed = ?v.observed,
                "threshold breached"
            );
        }

        RunReport::new(
            started.elapsed(),
            snapshot,
            checks.summary(),
            verdicts,
            recorder.peak_vus().max(stats.peak_live),
            stats.aborted,
            abort_reason.get().cloned(),
        )
    }
}

/// Convenience wrapper: `Orchestrator::new(plan, options).run()`.
pub async fn run(plan: TestPlan, options: RunOptions) -> RunReport {
    Orchestrator::new(plan, options).run().await
}

/// Resolves every host the run will talk to before any VU starts. Hosts
/// hidden behind templates are skipped; literal IPs always pass.
async fn preflight(script: &Script, options: &RunOptions) -> Result<(), String> {
    let mut hosts: BTreeSet<(String, u16)> = BTreeSet::new();
    let mut add = |url: &url::Url| {
        if let Some(url::Host::Domain(domain)) = url.host() {
            let port = url.port_or_known_default().unwrap_or(80);
            hosts.insert((domain.to_string(), port));
        }
    };

    if let Some(base) = &options.base_url {
        add(base);
    }
    for step in script.all_steps() {
        if let Step::Request(req) = step
            && !req.url.contains("${")
            && let Ok(url) = url::Url::parse(&req.url)
        {
            add(&url);
        }
    }

    for (host, port) in hosts {
        match tokio::net::lookup_host((host.as_str(), port)).await {
            Ok(mut addrs) => {
                if addrs.next().is_none() {
                    return Err(format!("{host}: no addresses"));
                }
                tracing::debug!(host = %host, "target resolved");
            }
            Err(e) => return Err(format!("{host}: {e}")),
        }
    }
    Ok(())
}

/// Periodically evaluates the thresholds that carry `abortOnFail` and fires
/// `abort` on the first one that triggers. Returns `None` when no condition
/// asks for early abort.
fn spawn_threshold_watcher(
    thresholds: Arc<[ThresholdSet]>,
    recorder: Arc<MetricRecorder>,
    interval: Duration,
    abort: Arc<StopSignal>,
    reason: Arc<OnceLock<AbortReason>>,
) -> Option<JoinHandle<()>> {
    let watched: Vec<ThresholdSet> = thresholds
        .iter()
        .filter(|set| set.has_abort_conditions())
        .cloned()
        .collect();
    if watched.is_empty() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; there is nothing to judge yet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let snapshot = recorder.snapshot();
            let verdicts = evaluate_thresholds(&watched, &snapshot);
            let Some(hit) = verdicts.iter().find(|v| v.triggers_abort(snapshot.elapsed)) else {
                continue;
            };

            tracing::warn!(
                metric = %hit.metric_key,
                expression = %hit.expression,
                observed = ?hit.observed,
                "threshold breached, aborting run"
            );
            let _ = reason.set(AbortReason::ThresholdBreached {
                metric: hit.metric_key.clone(),
                expression: hit.expression.clone(),
            });
            abort.request_stop();
            return;
        }
    }))
}

struct ProgressEmitter {
    callback: ProgressFn,
    recorder: Arc<MetricRecorder>,
    checks: Arc<CheckEvaluator>,
    total_duration: Duration,
    tick: u64,
    last_elapsed: Duration,
    last_requests: u64,
    last_failed: u64,
}

impl ProgressEmitter {
    fn new(
        callback: ProgressFn,
        recorder: Arc<MetricRecorder>,
        checks: Arc<CheckEvaluator>,
        total_duration: Duration,
    ) -> Self {
        Self {
            callback,
            recorder,
            checks,
            total_duration,
            tick: 0,
            last_elapsed: Duration::ZERO,
            last_requests: 0,
            last_failed: 0,
        }
    }

    fn emit(&mut self, phase: RunPhase, tick: &SchedulerTick) {
        self.tick += 1;
        let snapshot = self.recorder.snapshot();
        let totals = self.recorder.totals();

        let dt = tick.elapsed.saturating_sub(self.last_elapsed).as_secs_f64();
        let delta_requests = totals.requests.saturating_sub(self.last_requests);
        let delta_failed = totals.requests_failed.saturating_sub(self.last_failed);
        self.last_elapsed = tick.elapsed;
        self.last_requests = totals.requests;
        self.last_failed = totals.requests_failed;

        let latency = snapshot.request_latency();
        let metrics = LiveMetrics {
            rps_now: delta_requests as f64 / dt.max(1e-9),
            error_rate_now: if delta_requests == 0 {
                0.0
            } else {
                delta_failed as f64 / delta_requests as f64
            },
            latency_p50_ms: latency.as_ref().and_then(|h| h.percentile(50.0)),
            latency_p95_ms: latency.as_ref().and_then(|h| h.percentile(95.0)),
            requests_total: totals.requests,
            failed_requests_total: totals.requests_failed,
            bytes_sent_total: snapshot.data_sent(),
            bytes_received_total: snapshot.data_received(),
            iterations_total: totals.iterations,
            checks_failed_total: self.checks.totals().fail,
        };

        let st = &tick.stage;
        (self.callback)(ProgressUpdate {
            tick: self.tick,
            elapsed: tick.elapsed,
            phase,
            total_duration: self.total_duration,
            stage: StageProgress {
                stage: st.index + 1,
                stages: st.count,
                stage_elapsed: st.stage_elapsed,
                stage_remaining: st.stage_remaining,
                start_target: st.start_target,
                end_target: st.end_target,
                current_target: st.current_target,
            },
            target_vus: tick.target,
            live_vus: tick.live,
            retiring_vus: tick.retiring,
            metrics,
        });
    }
}
