use crate::MetricKind;
use thiserror::Error;

/// Problems with a run definition. Always detected before the run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No stages defined")]
    NoStages,

    #[error("Scheduler tick must be non-zero")]
    ZeroTick,

    #[error("Stage durations add up to more than the longest representable run")]
    DurationOverflow,

    #[error("Invalid duration `{0}`: {1}")]
    InvalidDuration(String, humantime::DurationError),

    #[error("Invalid threshold `{expression}` on `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("Threshold references unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("Aggregation `{aggregation}` is not supported by {kind} metric `{metric}`")]
    UnsupportedAggregation {
        metric: String,
        kind: MetricKind,
        aggregation: String,
    },

    #[error("Custom metric `{0}` shadows a built-in metric")]
    ShadowedMetric(String),

    #[error("Invalid check `{0}`: {1}")]
    InvalidCheck(String, String),

    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("Unable to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to parse config: {0}")]
    Parse(String),
}
