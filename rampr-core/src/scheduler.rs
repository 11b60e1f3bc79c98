use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::schedule::{RampingSchedule, StageSnapshot};
use crate::vu::StopSignal;

/// State published after every scheduling tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerTick {
    pub elapsed: Duration,
    pub target: u64,
    pub live: u64,
    pub retiring: u64,
    pub stage: StageSnapshot,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub max_vus: Option<u64>,
    /// How long a retiring VU may take to finish its iteration before it is
    /// aborted.
    pub graceful_stop: Duration,
    /// Hard deadline measured from the start of the ramp.
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub spawned: u64,
    pub retired: u64,
    pub aborted: u64,
    pub peak_live: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampEnd {
    /// The last stage finished.
    Completed,
    /// The external abort signal fired.
    Aborted,
    /// The hard deadline passed before the schedule finished.
    DeadlineReached,
}

#[derive(Debug)]
struct LiveVu {
    id: u64,
    stop: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
struct RetiringVu {
    id: u64,
    handle: JoinHandle<()>,
    since: Instant,
}

#[derive(Debug, Default)]
struct VuPool {
    live: Vec<LiveVu>,
    retiring: Vec<RetiringVu>,
    next_id: u64,
    stats: SchedulerStats,
}

impl VuPool {
    fn live(&self) -> u64 {
        self.live.len() as u64
    }

    fn reap(&mut self) {
        self.live.retain(|vu| {
            let done = vu.handle.is_finished();
            if done {
                tracing::warn!(vu = vu.id, "vu exited without being retired");
            }
            !done
        });

        let before = self.retiring.len();
        self.retiring.retain(|vu| !vu.handle.is_finished());
        self.stats.retired += (before - self.retiring.len()) as u64;
    }

    fn spawn_one<F, Fut>(&mut self, spawn: &mut F)
    where
        F: FnMut(u64, Arc<StopSignal>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.next_id += 1;
        let id = self.next_id;
        let stop = Arc::new(StopSignal::new());
        let handle = tokio::spawn(spawn(id, stop.clone()));
        self.live.push(LiveVu { id, stop, handle });

        self.stats.spawned += 1;
        self.stats.peak_live = self.stats.peak_live.max(self.live());
        tracing::debug!(vu = id, live = self.live(), "spawned vu");
    }

    /// Retires the most recently spawned VU.
    fn retire_newest(&mut self, now: Instant) {
        let Some(vu) = self.live.pop() else {
            return;
        };
        vu.stop.request_stop();
        tracing::debug!(vu = vu.id, live = self.live(), "retiring vu");
        self.retiring.push(RetiringVu {
            id: vu.id,
            handle: vu.handle,
            since: now,
        });
    }

    fn scale_to<F, Fut>(&mut self, target: u64, spawn: &mut F, now: Instant)
    where
        F: FnMut(u64, Arc<StopSignal>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        while self.live() < target {
            self.spawn_one(spawn);
        }
        while self.live() > target {
            self.retire_newest(now);
        }
    }

    fn abort_overdue(&mut self, now: Instant, graceful_stop: Duration) {
        let stats = &mut self.stats;
        self.retiring.retain(|vu| {
            if now.saturating_duration_since(vu.since) < graceful_stop {
                return true;
            }
            abort_vu(stats, vu.id, &vu.handle);
            false
        });
    }

    fn abort_all(&mut self) {
        for vu in self.live.drain(..) {
            abort_vu(&mut self.stats, vu.id, &vu.handle);
        }
        for vu in self.retiring.drain(..) {
            abort_vu(&mut self.stats, vu.id, &vu.handle);
        }
    }
}

fn abort_vu(stats: &mut SchedulerStats, id: u64, handle: &JoinHandle<()>) {
    if handle.is_finished() {
        stats.retired += 1;
        return;
    }
    handle.abort();
    stats.aborted += 1;
    tracing::warn!(vu = id, "vu did not stop in time, aborted");
}

/// Keeps the number of live VUs equal to the schedule's target.
///
/// `spawn` builds the future for a new VU from its id and stop signal; the
/// future must return once the signal fires and its current iteration is done.
pub struct RampScheduler<F> {
    schedule: Arc<RampingSchedule>,
    config: SchedulerConfig,
    spawn: F,
    pool: VuPool,
    started: Option<Instant>,
}

impl<F, Fut> RampScheduler<F>
where
    F: FnMut(u64, Arc<StopSignal>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(schedule: Arc<RampingSchedule>, config: SchedulerConfig, spawn: F) -> Self {
        Self {
            schedule,
            config,
            spawn,
            pool: VuPool::default(),
            started: None,
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.pool.stats
    }

    /// `None` when no deadline is configured or it lies beyond what an
    /// `Instant` can represent.
    fn deadline(&self) -> Option<Instant> {
        self.started?.checked_add(self.config.deadline?)
    }

    fn target_at(&self, elapsed: Duration) -> u64 {
        let target = self.schedule.target_at(elapsed);
        match self.config.max_vus {
            Some(max) => target.min(max),
            None => target,
        }
    }

    /// Runs the schedule tick by tick until it completes, `abort` fires, or
    /// the hard deadline passes.
    pub async fn ramp(
        &mut self,
        abort: &StopSignal,
        mut on_tick: impl FnMut(&SchedulerTick),
    ) -> RampEnd {
        let started = Instant::now();
        self.started = Some(started);
        let deadline = self.deadline();

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = abort.stopped() => return RampEnd::Aborted,
                _ = sleep_until_opt(deadline) => return RampEnd::DeadlineReached,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let elapsed = now.saturating_duration_since(started);
            let target = self.target_at(elapsed);

            self.pool.reap();
            self.pool.scale_to(target, &mut self.spawn, now);
            self.pool.abort_overdue(now, self.config.graceful_stop);

            on_tick(&SchedulerTick {
                elapsed,
                target,
                live: self.pool.live(),
                retiring: self.pool.retiring.len() as u64,
                stage: self.schedule.stage_snapshot_at(elapsed),
            });

            if self.schedule.is_done(elapsed) {
                return RampEnd::Completed;
            }
        }
    }

    /// Retires every live VU and waits for each one up to its own graceful
    /// stop period, counted from when it was asked to stop, or the hard
    /// deadline, whichever comes first. Stragglers are aborted.
    pub async fn drain(&mut self) -> SchedulerStats {
        let now = Instant::now();
        while !self.pool.live.is_empty() {
            self.pool.retire_newest(now);
        }

        let hard = self.deadline();
        let mut pending = std::mem::take(&mut self.pool.retiring);
        pending.sort_by_key(|vu| vu.since);

        for mut vu in pending {
            let deadline = match (vu.since.checked_add(self.config.graceful_stop), hard) {
                (Some(own), Some(hard)) => Some(own.min(hard)),
                (own, hard) => own.or(hard),
            };

            let finished = match deadline {
                Some(at) => tokio::time::timeout_at(at, &mut vu.handle).await.is_ok(),
                None => {
                    let _ = (&mut vu.handle).await;
                    true
                }
            };

            if finished {
                self.pool.stats.retired += 1;
            } else {
                abort_vu(&mut self.pool.stats, vu.id, &vu.handle);
            }
        }

        self.pool.abort_all();
        self.pool.stats
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Stage;
    use std::sync::Mutex;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn schedule(stages: &[(u64, u64)]) -> Arc<RampingSchedule> {
        let stages = stages
            .iter()
            .map(|&(d, t)| Stage::new(secs(d), t))
            .collect();
        Arc::new(RampingSchedule::new(stages).unwrap_or_else(|e| panic!("{e}")))
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            tick: secs(1),
            max_vus: None,
            graceful_stop: secs(30),
            deadline: None,
        }
    }

    /// VU that idles until told to stop, logging its id on exit.
    fn cooperative(
        exits: Arc<Mutex<Vec<u64>>>,
    ) -> impl FnMut(u64, Arc<StopSignal>) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> {
        move |id, stop| {
            let exits = exits.clone();
            Box::pin(async move {
                stop.stopped().await;
                exits.lock().unwrap_or_else(|e| e.into_inner()).push(id);
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn follows_ramp_up_and_down() {
        let exits = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = RampScheduler::new(
            schedule(&[(10, 5), (20, 10), (10, 0)]),
            config(),
            cooperative(exits.clone()),
        );

        let mut ticks = Vec::new();
        let end = scheduler
            .ramp(&StopSignal::new(), |t| ticks.push(t.clone()))
            .await;
        assert_eq!(end, RampEnd::Completed);

        let live_at = |s: u64| {
            ticks
                .iter()
                .find(|t| t.elapsed >= secs(s))
                .map(|t| t.live)
                .unwrap_or_else(|| panic!("no tick at {s}s"))
        };
        assert!(live_at(10) >= 5);
        assert!(live_at(30) >= 10);
        assert_eq!(live_at(40), 0);
        assert!(ticks.iter().all(|t| t.live == t.target));
        assert_eq!(ticks.last().map(|t| t.elapsed), Some(secs(40)));

        let stats = scheduler.drain().await;
        assert_eq!(stats.spawned, 10);
        assert_eq!(stats.peak_live, 10);
        assert_eq!(stats.aborted, 0);
        assert_eq!(stats.retired, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn max_vus_caps_live_count() {
        let mut scheduler = RampScheduler::new(
            schedule(&[(5, 10)]),
            SchedulerConfig {
                max_vus: Some(3),
                ..config()
            },
            cooperative(Arc::default()),
        );

        let mut peak = 0;
        scheduler
            .ramp(&StopSignal::new(), |t| peak = peak.max(t.live))
            .await;
        assert_eq!(peak, 3);
        assert_eq!(scheduler.drain().await.spawned, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ids_are_monotonic_and_retirement_is_lifo() {
        let exits = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = RampScheduler::new(
            schedule(&[(3, 3), (2, 1)]),
            config(),
            cooperative(exits.clone()),
        );

        scheduler.ramp(&StopSignal::new(), |_| {}).await;
        // Let the retired VUs observe their stop signal.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*exits.lock().unwrap_or_else(|e| e.into_inner()), vec![3, 2]);

        scheduler.drain().await;
        assert_eq!(
            *exits.lock().unwrap_or_else(|e| e.into_inner()),
            vec![3, 2, 1]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_vus_are_aborted_after_graceful_stop() {
        let spawn = |_id: u64, _stop: Arc<StopSignal>| async {
            std::future::pending::<()>().await;
        };
        let mut scheduler = RampScheduler::new(
            schedule(&[(2, 4)]),
            SchedulerConfig {
                graceful_stop: secs(5),
                ..config()
            },
            spawn,
        );

        scheduler.ramp(&StopSignal::new(), |_| {}).await;
        let before = Instant::now();
        let stats = scheduler.drain().await;

        assert_eq!(stats.aborted, 4);
        assert_eq!(stats.retired, 0);
        assert_eq!(before.elapsed(), secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_signal_ends_ramp_early() {
        let abort = Arc::new(StopSignal::new());
        let mut scheduler =
            RampScheduler::new(schedule(&[(60, 2)]), config(), cooperative(Arc::default()));

        let trigger = {
            let abort = abort.clone();
            tokio::spawn(async move {
                tokio::time::sleep(secs(5)).await;
                abort.request_stop();
            })
        };

        let started = Instant::now();
        let end = scheduler.ramp(&abort, |_| {}).await;
        assert_eq!(end, RampEnd::Aborted);
        assert_eq!(started.elapsed(), secs(5));
        trigger.await.unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(scheduler.drain().await.aborted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_deadline_cuts_ramp_and_aborts_everyone() {
        let spawn = |_id: u64, _stop: Arc<StopSignal>| async {
            std::future::pending::<()>().await;
        };
        let mut scheduler = RampScheduler::new(
            schedule(&[(10, 2)]),
            SchedulerConfig {
                deadline: Some(Duration::from_millis(6_500)),
                ..config()
            },
            spawn,
        );

        let started = Instant::now();
        let end = scheduler.ramp(&StopSignal::new(), |_| {}).await;
        assert_eq!(end, RampEnd::DeadlineReached);
        assert_eq!(started.elapsed(), Duration::from_millis(6_500));

        let stats = scheduler.drain().await;
        assert_eq!(started.elapsed(), Duration::from_millis(6_500));
        assert_eq!(stats.aborted, stats.spawned);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_counts_graceful_stop_from_retirement() {
        // VU 1 stops when asked; VU 2 never does.
        let spawn = |id: u64, stop: Arc<StopSignal>| async move {
            if id == 1 {
                stop.stopped().await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        let mut scheduler = RampScheduler::new(
            schedule(&[(1, 2), (1, 1), (4, 1)]),
            SchedulerConfig {
                graceful_stop: secs(5),
                ..config()
            },
            spawn,
        );

        // VU 2 is retired at t=2 and still running when the ramp ends at t=6.
        let mut retiring_at_end = 0;
        scheduler
            .ramp(&StopSignal::new(), |t| retiring_at_end = t.retiring)
            .await;
        assert_eq!(retiring_at_end, 1);

        let before = Instant::now();
        let stats = scheduler.drain().await;

        assert_eq!(before.elapsed(), secs(1));
        assert_eq!(stats.aborted, 1);
        assert_eq!(stats.retired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_deadline_means_no_deadline() {
        let abort = Arc::new(StopSignal::new());
        let mut scheduler = RampScheduler::new(
            schedule(&[(60, 2)]),
            SchedulerConfig {
                deadline: Some(Duration::MAX),
                graceful_stop: Duration::MAX,
                ..config()
            },
            cooperative(Arc::default()),
        );

        let trigger = {
            let abort = abort.clone();
            tokio::spawn(async move {
                tokio::time::sleep(secs(3)).await;
                abort.request_stop();
            })
        };

        assert_eq!(scheduler.ramp(&abort, |_| {}).await, RampEnd::Aborted);
        trigger.await.unwrap_or_else(|e| panic!("{e}"));

        let stats = scheduler.drain().await;
        assert_eq!(stats.aborted, 0);
        assert_eq!(stats.retired, 2);
    }
}
