use std::time::Duration;

/// How often the scheduler re-evaluates the target VU count.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Time given to VUs to finish their iteration when ramped down or interrupted.
pub const DEFAULT_GRACEFUL_RAMP_DOWN: Duration = Duration::from_secs(30);

/// Upper bound on the drain at the end of a run before remaining VUs are aborted.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Percentiles always present in a trend summary, in addition to any a threshold asks for.
pub const DEFAULT_PERCENTILES: [f64; 3] = [90., 95., 99.];

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_RECEIVED: &str = "data_received";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const INTERRUPTED_ITERATIONS: &str = "interrupted_iterations";
pub const CHECKS: &str = "checks";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";
