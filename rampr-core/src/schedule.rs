use std::time::Duration;

use crate::config::Stage;
use crate::error::ScheduleError;

/// Position within the schedule at a given elapsed time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    /// 0-based stage index.
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear VU target over time, starting from zero.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(stages: Vec<Stage>) -> Result<Self, ScheduleError> {
        if stages.is_empty() {
            return Err(ScheduleError::Empty);
        }
        if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ScheduleError::NonPositiveDuration { index });
        }

        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Ok(Self {
            stages,
            cumulative_ends,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    pub fn peak_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Index of the stage covering `elapsed`; a boundary instant belongs to
    /// the stage that ends there.
    fn stage_index(&self, elapsed: Duration) -> usize {
        let idx = match self.cumulative_ends.binary_search(&elapsed) {
            Ok(i) | Err(i) => i,
        };
        idx.min(self.stages.len().saturating_sub(1))
    }

    fn bounds(&self, idx: usize) -> (Duration, Duration, u64, u64) {
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let start_target = if idx == 0 {
            0
        } else {
            self.stages[idx - 1].target
        };
        (
            start,
            self.cumulative_ends[idx],
            start_target,
            self.stages[idx].target,
        )
    }

    /// Desired concurrency at `elapsed`. After the last stage the final
    /// target persists.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if elapsed.is_zero() {
            return 0;
        }
        if elapsed >= self.total_duration() {
            return self.stages.last().map(|s| s.target).unwrap_or(0);
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end, start_target, end_target) = self.bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        if stage_duration.is_zero() {
            return end_target;
        }

        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;
        let num = elapsed.saturating_sub(stage_start).as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        let cur = start_i + delta.saturating_mul(num) / den.max(1);
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> StageSnapshot {
        let clamped = elapsed.min(self.total_duration());
        let idx = self.stage_index(clamped);
        let (stage_start, stage_end, start_target, end_target) = self.bounds(idx);

        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);

        StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target,
            end_target,
            current_target: self.target_at(clamped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn scenario_a() -> RampingSchedule {
        RampingSchedule::new(vec![
            Stage::new(secs(10), 5),
            Stage::new(secs(20), 10),
            Stage::new(secs(10), 0),
        ])
        .unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn rejects_empty_schedule() {
        assert_eq!(RampingSchedule::new(vec![]).err(), Some(ScheduleError::Empty));
    }

    #[test]
    fn rejects_zero_duration_stage() {
        let err = RampingSchedule::new(vec![Stage::new(secs(5), 1), Stage::new(Duration::ZERO, 3)]);
        assert_eq!(
            err.err(),
            Some(ScheduleError::NonPositiveDuration { index: 1 })
        );
    }

    #[test]
    fn interpolates_linearly_within_stages() {
        let s = scenario_a();
        assert_eq!(s.total_duration(), secs(40));
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(secs(2)), 1);
        assert_eq!(s.target_at(secs(10)), 5);
        assert_eq!(s.target_at(secs(20)), 7);
        assert_eq!(s.target_at(secs(30)), 10);
        assert_eq!(s.target_at(secs(35)), 5);
        assert_eq!(s.target_at(secs(40)), 0);
    }

    #[test]
    fn final_target_persists_after_schedule() {
        let s = RampingSchedule::new(vec![Stage::new(secs(4), 8)])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(s.target_at(secs(4)), 8);
        assert_eq!(s.target_at(secs(400)), 8);
        assert!(s.is_done(secs(4)));
        assert!(!s.is_done(secs(3)));
    }

    #[test]
    fn flat_stage_holds_target() {
        let s = RampingSchedule::new(vec![Stage::new(secs(1), 3), Stage::new(secs(10), 3)])
            .unwrap_or_else(|e| panic!("{e}"));
        for t in 1..=11 {
            assert_eq!(s.target_at(secs(t)), 3, "t={t}");
        }
    }

    #[test]
    fn stage_snapshot_reports_position() {
        let s = scenario_a();

        let snap = s.stage_snapshot_at(secs(15));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.stage_elapsed, secs(5));
        assert_eq!(snap.stage_remaining, secs(15));
        assert_eq!((snap.start_target, snap.end_target), (5, 10));

        // Boundaries belong to the stage that ends there.
        assert_eq!(s.stage_snapshot_at(secs(10)).index, 0);
        // Past the end clamps to the last stage.
        let end = s.stage_snapshot_at(secs(99));
        assert_eq!(end.index, 2);
        assert_eq!(end.stage_remaining, Duration::ZERO);
    }

    #[test]
    fn ticks_spent_per_stage_match_stage_duration() {
        let tick = Duration::from_millis(250);
        let s = RampingSchedule::new(vec![
            Stage::new(Duration::from_millis(1_300), 4),
            Stage::new(secs(7), 20),
            Stage::new(Duration::from_millis(2_050), 0),
            Stage::new(secs(3), 0),
        ])
        .unwrap_or_else(|e| panic!("{e}"));

        let mut spent = vec![Duration::ZERO; s.stages().len()];
        let mut t = Duration::ZERO;
        while t < s.total_duration() {
            spent[s.stage_snapshot_at(t + tick).index] += tick;
            t += tick;
        }

        for (i, stage) in s.stages().iter().enumerate() {
            let diff = spent[i].abs_diff(stage.duration);
            assert!(
                diff <= tick,
                "stage {i}: spent {:?}, expected {:?}",
                spent[i],
                stage.duration
            );
        }
    }

    #[test]
    fn target_is_monotonic_within_a_ramp() {
        let s = scenario_a();
        let mut prev = 0;
        for ms in (0..=30_000).step_by(100) {
            let cur = s.target_at(Duration::from_millis(ms));
            assert!(cur >= prev, "target dropped at {ms}ms");
            prev = cur;
        }
    }
}
