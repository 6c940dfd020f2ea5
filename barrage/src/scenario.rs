//! Scenario logic and builder
use crate::checks::{Check, CheckSet};
use crate::state::RunState;
use crate::HarnessError;
use barrage_core::{ConfigError, HttpConfig, MetricKind, RunConfig, RunReport, Stage, Threshold};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

mod ramping;

/// Load test scenario structure
///
/// Awaiting a `Scenario` runs it to completion and resolves to the final [`RunReport`], with
/// every configured threshold evaluated. Configuration mistakes (no stages, a malformed
/// threshold, a threshold on an unknown metric) surface as [`HarnessError::Config`] before
/// any VU starts.
#[pin_project::pin_project]
pub struct Scenario<T> {
    func: T,
    runner_fut: Option<Pin<Box<dyn Future<Output = Result<RunReport, HarnessError>> + Send>>>,
    config: RunConfig,
    checks: Vec<Check>,
    stop: CancellationToken,
    state: Option<watch::Sender<RunState>>,
    error: Option<ConfigError>,
}

impl<T> Scenario<T> {
    pub fn new(name: &str, func: T) -> Self {
        Self::with_config(RunConfig::new(name), func)
    }

    /// Build a scenario from an already assembled configuration.
    pub fn with_config(config: RunConfig, func: T) -> Self {
        Self {
            func,
            runner_fut: None,
            config,
            checks: vec![],
            stop: CancellationToken::new(),
            state: None,
            error: None,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}

impl<T, F> Future for Scenario<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    type Output = Result<RunReport, HarnessError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.runner_fut.is_none() {
            if let Some(err) = this.error.take() {
                return Poll::Ready(Err(err.into()));
            }

            let func = this.func.clone();
            let config = this.config.clone();
            let checks = CheckSet::new(this.checks.clone());
            let stop = this.stop.clone();
            let state = this
                .state
                .take()
                .unwrap_or_else(|| watch::channel(RunState::Idle).0);

            *this.runner_fut = Some(Box::pin(ramping::run_ramping(
                func, config, checks, stop, state,
            )));
        }

        match this.runner_fut {
            Some(runner) => runner.as_mut().poll(cx),
            None => unreachable!(),
        }
    }
}

pub trait ConfigurableScenario<T: Send>: Future<Output = T> + Sized + Send {
    fn stage(self, duration: Duration, target: usize) -> Self;
    fn start_vus(self, vus: usize) -> Self;
    fn threshold(self, metric: &str, expression: &str) -> Self;
    fn abort_threshold(self, metric: &str, expression: &str, delay: Duration) -> Self;
    fn check(self, check: Check) -> Self;
    fn metric(self, name: &str, kind: MetricKind) -> Self;
    fn think_time(self, pause: Duration) -> Self;
    fn tick(self, tick: Duration) -> Self;
    fn graceful_ramp_down(self, grace: Duration) -> Self;
    fn graceful_stop(self, grace: Duration) -> Self;
    fn http(self, http: HttpConfig) -> Self;
    fn stop_on(self, token: CancellationToken) -> Self;
    fn publish_state(self, tx: watch::Sender<RunState>) -> Self;
}

impl<T, F> ConfigurableScenario<Result<RunReport, HarnessError>> for Scenario<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    /// Append a stage reaching `target` VUs over `duration`.
    ///
    /// # Example
    /// ```no_run
    /// use barrage::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let report = Scenario::new("hello", my_scenario)
    ///         .stage(Duration::from_secs(10), 500)
    ///         .stage(Duration::from_secs(60), 1000)
    ///         .stage(Duration::from_secs(10), 0)
    ///         .await;
    /// }
    ///
    /// async fn my_scenario() {
    ///     let _ = barrage::http::get("http://localhost:8081/hello").await;
    /// }
    /// ```
    fn stage(mut self, duration: Duration, target: usize) -> Self {
        self.config.stages.push(Stage::new(duration, target));
        self
    }

    /// VU count at the start of the first stage. Defaults to 0.
    fn start_vus(mut self, vus: usize) -> Self {
        self.config.start_vus = vus;
        self
    }

    /// Judge `metric` against `expression` once the run completes.
    ///
    /// # Example
    /// ```no_run
    /// use barrage::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let report = Scenario::new("hello", my_scenario)
    ///         .stage(Duration::from_secs(30), 100)
    ///         .threshold("http_req_duration", "p(99)<50")
    ///         .threshold("http_req_failed", "rate<0.01")
    ///         .await;
    /// }
    ///
    /// async fn my_scenario() {
    /// }
    /// ```
    fn threshold(mut self, metric: &str, expression: &str) -> Self {
        match Threshold::parse(metric, expression) {
            Ok(t) => self.config.thresholds.push(t),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    /// Like [`threshold`](Self::threshold), but also judged every tick once `delay` has
    /// elapsed; a failure stops the run early.
    fn abort_threshold(mut self, metric: &str, expression: &str, delay: Duration) -> Self {
        match Threshold::parse(metric, expression) {
            Ok(t) => self.config.thresholds.push(t.abort_on_fail_after(delay)),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    /// Register a check evaluated against every response.
    fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    /// Register a custom metric recorded with [`crate::record`].
    fn metric(mut self, name: &str, kind: MetricKind) -> Self {
        self.config.custom_metrics.insert(name.to_string(), kind);
        self
    }

    fn think_time(mut self, pause: Duration) -> Self {
        self.config.think_time = Some(pause);
        self
    }

    /// How often the VU count is adjusted. Defaults to 1s.
    fn tick(mut self, tick: Duration) -> Self {
        self.config.tick = tick;
        self
    }

    fn graceful_ramp_down(mut self, grace: Duration) -> Self {
        self.config.graceful_ramp_down = grace;
        self
    }

    fn graceful_stop(mut self, grace: Duration) -> Self {
        self.config.graceful_stop = grace;
        self
    }

    fn http(mut self, http: HttpConfig) -> Self {
        self.config.http = http;
        self
    }

    /// Ramp down and finish the run once `token` is cancelled.
    fn stop_on(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    /// Publish state transitions of the run on `tx`.
    fn publish_state(mut self, tx: watch::Sender<RunState>) -> Self {
        self.state = Some(tx);
        self
    }
}

impl<T> Scenario<T> {
    /// Replace the registered checks.
    pub fn with_checks(mut self, checks: Vec<Check>) -> Self {
        self.checks = checks;
        self
    }
}
