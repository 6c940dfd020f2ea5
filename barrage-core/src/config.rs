use crate::{builtin_kind, constants::*, ConfigError, MetricKind, Threshold};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::ops::RangeInclusive;
use std::time::Duration;

/// One segment of the ramp profile: reach `target` VUs over `duration`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    /// Per-request timeout, after which the request is a network error.
    pub timeout: Duration,
    /// Global cap on requests per second across all VUs.
    pub rps: Option<NonZeroU32>,
    /// Status codes that do not count towards `http_req_failed`.
    pub expected_statuses: Vec<RangeInclusive<u16>>,
    pub user_agent: Option<String>,
}

impl HttpConfig {
    pub fn is_expected(&self, status: u16) -> bool {
        self.expected_statuses.iter().any(|r| r.contains(&status))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HTTP_TIMEOUT,
            rps: None,
            expected_statuses: vec![200..=399],
            user_agent: None,
        }
    }
}

/// Immutable description of a run. Validated once before the run starts.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub name: String,
    pub start_vus: usize,
    pub stages: Vec<Stage>,
    pub thresholds: Vec<Threshold>,
    /// Metrics recorded by scenario code on top of the built-in ones.
    pub custom_metrics: BTreeMap<String, MetricKind>,
    pub tick: Duration,
    pub graceful_ramp_down: Duration,
    pub graceful_stop: Duration,
    pub progress_interval: Duration,
    /// Pause between iterations of a single VU.
    pub think_time: Option<Duration>,
    pub http: HttpConfig,
}

impl RunConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start_vus: 0,
            stages: vec![],
            thresholds: vec![],
            custom_metrics: BTreeMap::new(),
            tick: DEFAULT_TICK,
            graceful_ramp_down: DEFAULT_GRACEFUL_RAMP_DOWN,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            think_time: None,
            http: HttpConfig::default(),
        }
    }

    pub fn metric_kind(&self, name: &str) -> Option<MetricKind> {
        builtin_kind(name).or_else(|| self.custom_metrics.get(name).copied())
    }

    /// Sum of all stage durations.
    pub fn planned_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn max_vus(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .chain(std::iter::once(self.start_vus))
            .max()
            .unwrap_or(0)
    }

    /// Percentiles a final report must carry for the configured thresholds to be judged.
    pub fn required_percentiles(&self) -> Vec<f64> {
        let mut percentiles: Vec<f64> = DEFAULT_PERCENTILES.to_vec();
        for t in &self.thresholds {
            if let crate::Aggregation::Percentile(p) = t.expr.aggregation {
                if !percentiles.contains(&p) {
                    percentiles.push(p);
                }
            }
        }
        percentiles.sort_by(f64::total_cmp);
        percentiles
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }

        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }

        self.stages
            .iter()
            .try_fold(Duration::ZERO, |total, s| total.checked_add(s.duration))
            .ok_or(ConfigError::DurationOverflow)?;

        for name in self.custom_metrics.keys() {
            if builtin_kind(name).is_some() {
                return Err(ConfigError::ShadowedMetric(name.clone()));
            }
        }

        for threshold in &self.thresholds {
            let kind = self
                .metric_kind(&threshold.metric)
                .ok_or_else(|| ConfigError::UnknownMetric(threshold.metric.clone()))?;
            threshold.validate(kind)?;
        }

        Ok(())
    }
}
