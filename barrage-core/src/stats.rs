use crate::{Aggregation, MetricKind, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregated view of one metric.
///
/// Empty metrics are still present (with zero counts) so that a threshold can tell "no data"
/// apart from "unknown metric".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricSummary {
    Counter {
        samples: u64,
        count: f64,
        /// `count` per second of run time.
        rate: f64,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        by_tag: BTreeMap<String, f64>,
    },
    Gauge {
        samples: u64,
        value: f64,
        min: f64,
        max: f64,
    },
    Rate {
        passes: u64,
        fails: u64,
        rate: f64,
    },
    /// Values in the metric's unit; milliseconds for the built-in durations.
    Trend {
        count: u64,
        avg: f64,
        min: f64,
        med: f64,
        max: f64,
        /// Keyed by the aggregation name, e.g. `p(99)`.
        percentiles: BTreeMap<String, f64>,
    },
}

impl MetricSummary {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSummary::Counter { .. } => MetricKind::Counter,
            MetricSummary::Gauge { .. } => MetricKind::Gauge,
            MetricSummary::Rate { .. } => MetricKind::Rate,
            MetricSummary::Trend { .. } => MetricKind::Trend,
        }
    }

    pub fn sample_count(&self) -> u64 {
        match self {
            MetricSummary::Counter { samples, .. } | MetricSummary::Gauge { samples, .. } => {
                *samples
            }
            MetricSummary::Rate { passes, fails, .. } => passes + fails,
            MetricSummary::Trend { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// The statistic an aggregation reads, or `None` if this summary does not carry it.
    pub fn value(&self, aggregation: &Aggregation) -> Option<f64> {
        use Aggregation::*;
        match (self, aggregation) {
            (MetricSummary::Counter { count, .. }, Count) => Some(*count),
            (MetricSummary::Counter { rate, .. }, Rate) => Some(*rate),
            (MetricSummary::Gauge { value, .. }, Value) => Some(*value),
            (MetricSummary::Gauge { min, .. }, Min) => Some(*min),
            (MetricSummary::Gauge { max, .. }, Max) => Some(*max),
            (MetricSummary::Rate { rate, .. }, Rate) => Some(*rate),
            (MetricSummary::Trend { count, .. }, Count) => Some(*count as f64),
            (MetricSummary::Trend { avg, .. }, Avg) => Some(*avg),
            (MetricSummary::Trend { min, .. }, Min) => Some(*min),
            (MetricSummary::Trend { med, .. }, Med) => Some(*med),
            (MetricSummary::Trend { max, .. }, Max) => Some(*max),
            (MetricSummary::Trend { percentiles, .. }, p @ Percentile(_)) => {
                percentiles.get(&p.to_string()).copied()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn rate(&self) -> f64 {
        let total = self.passes + self.fails;
        if total == 0 {
            0.
        } else {
            self.passes as f64 / total as f64
        }
    }
}

/// Result of judging one threshold against a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub verdict: Verdict,
    /// The statistic the expression was compared against, when there was one.
    pub observed: Option<f64>,
}

/// Summary of a run. The final report is produced once at shutdown; live snapshots share
/// the shape but have `finished` unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub name: String,
    /// RFC 3339 start time.
    pub started_at: String,
    pub elapsed_secs: f64,
    pub finished: bool,
    /// Stopped by an external signal before the stages completed.
    pub interrupted: bool,
    /// Stopped early by an `abortOnFail` threshold.
    pub aborted_by_threshold: bool,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: BTreeMap<String, CheckSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub verdict: Verdict,
}

impl RunReport {
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}
