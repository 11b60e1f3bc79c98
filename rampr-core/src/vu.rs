use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rampr_http::HttpClient;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::checks::CheckEvaluator;
use crate::config::{RunOptions, SetupScope};
use crate::executor::{StepPolicy, execute_steps};
use crate::recorder::MetricRecorder;
use crate::response::ResponseView;
use crate::script::Script;
use crate::template::Vars;

/// One-shot, level-triggered stop request shared between a VU and whoever
/// may retire it.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopping: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_stopping() {
                return;
            }
            notified.await;
        }
    }
}

/// Everything that is shared by all VUs of a run.
#[derive(Debug)]
pub struct RunContext {
    pub script: Arc<Script>,
    pub options: Arc<RunOptions>,
    pub client: HttpClient,
    pub recorder: Arc<MetricRecorder>,
    pub checks: Arc<CheckEvaluator>,
}

#[derive(Debug, Clone)]
pub struct VuContext {
    pub vu_id: u64,
    pub run: Arc<RunContext>,
    /// Variables produced by a per-run setup; empty otherwise.
    pub shared: Arc<Vars>,
    pub stop: Arc<StopSignal>,
}

/// Mutable state owned by exactly one VU for its whole lifetime.
#[derive(Debug)]
pub struct VuState {
    pub vu_id: u64,
    /// 0-based index of the iteration in progress.
    pub iteration: u64,
    pub vars: Vars,
    pub shared: Arc<Vars>,
    pub last_response: Option<ResponseView>,
}

impl VuState {
    pub fn new(vu_id: u64, shared: Arc<Vars>) -> Self {
        Self {
            vu_id,
            iteration: 0,
            vars: Vars::new(),
            shared,
            last_response: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VuExit {
    pub vu_id: u64,
    pub iterations: u64,
}

/// Runs one VU: optional per-VU setup, iterations until stopped, optional
/// per-VU teardown.
///
/// A stop request is honoured between iterations; the iteration in flight
/// always runs to completion.
pub async fn run_vu(ctx: VuContext) -> VuExit {
    let run = &ctx.run;
    let _active = run.recorder.vu_started();
    let mut state = VuState::new(ctx.vu_id, ctx.shared.clone());
    let per_vu = run.script.setup_scope == SetupScope::PerVu;

    tracing::debug!(vu = ctx.vu_id, "vu started");

    if per_vu && !run.script.setup.is_empty() {
        let outcome = execute_steps(run, &mut state, &run.script.setup, StepPolicy::FailFast).await;
        if let Some(failure) = outcome.aborted {
            tracing::warn!(vu = ctx.vu_id, error = %failure, "per-vu setup failed");
        }
    }

    while !ctx.stop.is_stopping() {
        let started = Instant::now();
        state.last_response = None;
        let outcome =
            execute_steps(run, &mut state, &run.script.steps, StepPolicy::CriticalOnly).await;
        run.recorder.record_iteration(started.elapsed(), outcome.is_success());
        state.iteration += 1;

        // An iteration without any await point would otherwise hog the worker.
        tokio::task::yield_now().await;
    }

    if per_vu && !run.script.teardown.is_empty() {
        let outcome =
            execute_steps(run, &mut state, &run.script.teardown, StepPolicy::CriticalOnly).await;
        if let Some(failure) = outcome.aborted {
            tracing::warn!(vu = ctx.vu_id, error = %failure, "per-vu teardown failed");
        }
    }

    tracing::debug!(vu = ctx.vu_id, iterations = state.iteration, "vu stopped");
    VuExit {
        vu_id: ctx.vu_id,
        iterations: state.iteration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_signal_wakes_waiters_and_stays_set() {
        let stop = Arc::new(StopSignal::new());
        assert!(!stop.is_stopping());

        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.stopped().await })
        };
        tokio::task::yield_now().await;
        stop.request_stop();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap_or_else(|e| panic!("waiter not woken: {e}"))
            .unwrap_or_else(|e| panic!("{e}"));

        // Late waiters return immediately.
        stop.stopped().await;
        assert!(stop.is_stopping());
    }
}
