//! Target VU count over time.
//!
//! The ramp profile is piecewise-linear: each stage moves the target from where the previous
//! stage ended to its own target over its duration. Past the last stage `target_at` keeps
//! returning the final target, but the run loop drains as soon as [`Schedule::is_drained`]
//! reports the stages complete.
use barrage_core::Stage;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Schedule {
    start: usize,
    stages: Vec<Stage>,
    total: Duration,
}

impl Schedule {
    pub fn new(start: usize, stages: &[Stage]) -> Self {
        Self {
            start,
            stages: stages.to_vec(),
            total: stages.iter().map(|s| s.duration).sum(),
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Target VU count at `elapsed` since the start of the run.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut from = self.start as f64;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                return interpolate(from, stage.target as f64, progress);
            }
            from = stage.target as f64;
            stage_start = stage_end;
        }

        self.stages.last().map(|s| s.target).unwrap_or(self.start)
    }

    /// Index of the stage active at `elapsed`, `None` once every stage is complete.
    pub fn stage_at(&self, elapsed: Duration) -> Option<usize> {
        let mut stage_end = Duration::ZERO;
        for (idx, stage) in self.stages.iter().enumerate() {
            stage_end += stage.duration;
            if elapsed < stage_end {
                return Some(idx);
            }
        }
        None
    }

    /// True once every stage is complete, or the target is zero for the rest of the run.
    pub fn is_drained(&self, elapsed: Duration) -> bool {
        let Some(current) = self.stage_at(elapsed) else {
            return true;
        };
        self.target_at(elapsed) == 0 && self.stages[current..].iter().all(|s| s.target == 0)
    }
}

/// Linear decay to zero VUs after an external stop.
#[derive(Debug, Copy, Clone)]
pub struct RampDown {
    from: usize,
    start: Duration,
    grace: Duration,
}

impl RampDown {
    pub fn new(at: Duration, from: usize, grace: Duration) -> Self {
        Self {
            from,
            start: at,
            grace,
        }
    }

    pub fn target_at(&self, elapsed: Duration) -> usize {
        if self.grace.is_zero() {
            return 0;
        }
        let progress = elapsed.saturating_sub(self.start).as_secs_f64() / self.grace.as_secs_f64();
        interpolate(self.from as f64, 0., progress)
    }

    pub fn done(&self, elapsed: Duration) -> bool {
        elapsed >= self.start + self.grace
    }
}

fn interpolate(from: f64, to: f64, progress: f64) -> usize {
    let progress = progress.clamp(0., 1.);
    (from + (to - from) * progress).round() as usize
}
