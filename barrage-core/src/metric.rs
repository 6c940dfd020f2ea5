use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// How samples of a metric are folded together.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Sum of values, e.g. request count or bytes received.
    Counter,
    /// Last observed value, plus its extremes.
    Gauge,
    /// Share of non-zero samples.
    Rate,
    /// Distribution of values (avg, min, max, percentiles).
    Trend,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        };
        f.write_str(s)
    }
}

/// Metrics produced by the harness itself.
pub const BUILTIN_METRICS: [(&str, MetricKind); 10] = [
    (HTTP_REQS, MetricKind::Counter),
    (HTTP_REQ_DURATION, MetricKind::Trend),
    (HTTP_REQ_FAILED, MetricKind::Rate),
    (DATA_RECEIVED, MetricKind::Counter),
    (ITERATIONS, MetricKind::Counter),
    (ITERATION_DURATION, MetricKind::Trend),
    (INTERRUPTED_ITERATIONS, MetricKind::Counter),
    (CHECKS, MetricKind::Rate),
    (VUS, MetricKind::Gauge),
    (VUS_MAX, MetricKind::Gauge),
];

pub fn builtin_kind(name: &str) -> Option<MetricKind> {
    BUILTIN_METRICS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, kind)| *kind)
}

/// A single measurement. Immutable once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: SystemTime,
    pub metric: String,
    pub value: f64,
    pub tags: Vec<(String, String)>,
}

impl Sample {
    pub fn new(metric: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp: SystemTime::now(),
            metric: metric.into(),
            value,
            tags: vec![],
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Samples of rate metrics carry a boolean as 0/1.
    pub fn flag(metric: impl Into<String>, value: bool) -> Self {
        Self::new(metric, if value { 1. } else { 0. })
    }
}

/// Outcome of one named check against one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
        }
    }
}

/// Bucket a status code the way the report groups them, `error` for no response at all.
pub fn status_bucket(status: Option<u16>) -> &'static str {
    match status {
        Some(100..=199) => "1xx",
        Some(200..=299) => "2xx",
        Some(300..=399) => "3xx",
        Some(400..=499) => "4xx",
        Some(500..=599) => "5xx",
        Some(_) => "other",
        None => "error",
    }
}
