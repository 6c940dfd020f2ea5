#![cfg_attr(docsrs, feature(doc_cfg))]
//! Staged-ramp load generation with SLO thresholds.
//!
//! A [`Scenario`] wraps an async function that is run in a loop by every virtual user (VU).
//! The number of VUs follows the configured stages, every request made through
//! [`http::get`] is measured, and once the stages complete the thresholds are judged
//! against the aggregated metrics.
//!
//! ```no_run
//! use barrage::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), HarnessError> {
//!     let report = Scenario::new("hello", hello)
//!         .stage(Duration::from_secs(10), 500)
//!         .stage(Duration::from_secs(60), 1000)
//!         .stage(Duration::from_secs(10), 0)
//!         .check(Check::status("status is 200 or 429", &[200, 429]))
//!         .check(Check::max_duration("response time <50ms", Duration::from_millis(50)))
//!         .threshold("http_req_duration", "p(99)<50")
//!         .threshold("http_req_failed", "rate<0.01")
//!         .await?;
//!
//!     assert!(report.passed());
//!     Ok(())
//! }
//!
//! async fn hello() {
//!     let _ = barrage::http::get("http://localhost:8081/hello").await;
//! }
//! ```

pub mod checks;
pub mod evaluator;
pub mod http;
pub mod scenario;

mod aggregator;
mod error;
mod hook;
mod pool;
mod scheduler;
mod state;
mod timer;

pub use aggregator::Aggregator;
pub use barrage_core as core;
pub use error::{HarnessError, RequestError};
pub use hook::{check, record, record_sample, vu_id};
pub use scenario::Scenario;
pub use scheduler::{RampDown, Schedule};
pub use state::RunState;

pub mod prelude {
    pub use crate::checks::{Check, CheckPredicate};
    pub use crate::scenario::{ConfigurableScenario, Scenario};
    pub use crate::{HarnessError, RequestError, RunState};
    pub use barrage_core::{HttpConfig, MetricKind, RunConfig, RunReport, Verdict};
}
