//! The set of running VUs.
//!
//! Scaling up spawns one task per VU, each looping over the scenario inside its own
//! [`VU`](crate::hook::VU) scope. Scaling down retires the most recently spawned VUs: their
//! token is cancelled so they stop after the current iteration, and [`VuPool::reap`] aborts
//! any that are still busy once `graceful_ramp_down` has passed.
use crate::aggregator::Aggregator;
use crate::checks::CheckSet;
use crate::hook::{self, VuContext, VU};
use crate::http::Client;
use barrage_core::{Sample, INTERRUPTED_ITERATIONS, ITERATIONS, ITERATION_DURATION};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, trace_span, warn, Instrument};

struct Vu {
    id: usize,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Retiring {
    vu: Vu,
    since: Instant,
}

pub(crate) struct VuPool<T> {
    scenario: T,
    client: Client,
    checks: CheckSet,
    aggregator: Aggregator,
    think_time: Option<Duration>,
    graceful_ramp_down: Duration,
    active: Vec<Vu>,
    retiring: Vec<Retiring>,
    next_id: usize,
}

impl<T, F> VuPool<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    pub fn new(
        scenario: T,
        client: Client,
        checks: CheckSet,
        aggregator: Aggregator,
        think_time: Option<Duration>,
        graceful_ramp_down: Duration,
    ) -> Self {
        Self {
            scenario,
            client,
            checks,
            aggregator,
            think_time,
            graceful_ramp_down,
            active: vec![],
            retiring: vec![],
            next_id: 1,
        }
    }

    /// Number of VUs not asked to stop.
    pub fn active(&self) -> usize {
        self.active.len()
    }

    /// Number of VUs asked to stop that are still finishing an iteration.
    pub fn retiring(&self) -> usize {
        self.retiring.len()
    }

    pub fn set_target(&mut self, target: usize) {
        let before = self.active.len();
        self.active.retain(|vu| {
            if vu.handle.is_finished() {
                error!("VU {} exited unexpectedly; replacing it.", vu.id);
                false
            } else {
                true
            }
        });
        self.record_interrupted(before - self.active.len());

        if self.active.len() > target {
            let now = Instant::now();
            for vu in self.active.drain(target..).rev() {
                trace!("Retiring VU {}", vu.id);
                vu.token.cancel();
                self.retiring.push(Retiring { vu, since: now });
            }
        } else {
            while self.active.len() < target {
                let vu = self.spawn();
                trace!("Spawned VU {}", vu.id);
                self.active.push(vu);
            }
        }
    }

    /// Drop retired VUs that have exited and abort those past their grace period.
    /// Returns how many were aborted.
    pub fn reap(&mut self) -> usize {
        let grace = self.graceful_ramp_down;
        let mut forced = 0;
        self.retiring.retain(|r| {
            if r.vu.handle.is_finished() {
                false
            } else if r.since.elapsed() >= grace {
                warn!(
                    "VU {} still busy {} after retirement; aborting it.",
                    r.vu.id,
                    humantime::format_duration(grace)
                );
                r.vu.handle.abort();
                forced += 1;
                false
            } else {
                true
            }
        });

        self.record_interrupted(forced);
        forced
    }

    /// Stop every VU, waiting at most `timeout` for in-flight iterations to finish.
    /// Returns how many VUs had to be aborted.
    pub async fn shutdown(&mut self, timeout: Duration) -> usize {
        self.set_target(0);
        let deadline = Instant::now() + timeout;

        let mut forced = 0;
        for r in self.retiring.drain(..) {
            let abort = r.vu.handle.abort_handle();
            if tokio::time::timeout_at(deadline, r.vu.handle).await.is_err() {
                debug!("VU {} did not stop in time", r.vu.id);
                abort.abort();
                forced += 1;
            }
        }

        if forced > 0 {
            warn!("Aborted {forced} VUs still running after graceful stop.");
        }
        self.record_interrupted(forced);
        forced
    }

    fn record_interrupted(&self, count: usize) {
        if count > 0 {
            self.aggregator
                .record(Sample::new(INTERRUPTED_ITERATIONS, count as f64));
        }
    }

    fn spawn(&mut self) -> Vu {
        let id = self.next_id;
        self.next_id += 1;

        let token = CancellationToken::new();
        let scenario = self.scenario.clone();
        let aggregator = self.aggregator.clone();
        let think_time = self.think_time;
        let context = VuContext::new(id, self.client.clone(), self.checks.clone());

        let handle = tokio::spawn(VU.scope(context, {
            let token = token.clone();
            async move {
                while !token.is_cancelled() {
                    let start = Instant::now();
                    scenario().await;

                    let mut batch = hook::take_batch();
                    batch.samples.push(Sample::new(ITERATIONS, 1.));
                    batch.samples.push(Sample::new(
                        ITERATION_DURATION,
                        start.elapsed().as_secs_f64() * 1e3,
                    ));
                    aggregator.submit(batch);

                    match think_time {
                        Some(pause) => {
                            tokio::select! {
                                _ = token.cancelled() => break,
                                _ = tokio::time::sleep(pause) => {}
                            }
                        }
                        None => tokio::task::yield_now().await,
                    }
                }
            }
        })
        .instrument(trace_span!("vu", id)));

        Vu { id, token, handle }
    }
}

impl<T> Drop for VuPool<T> {
    fn drop(&mut self) {
        for vu in self.active.iter().chain(self.retiring.iter().map(|r| &r.vu)) {
            vu.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barrage_core::{HttpConfig, RunConfig};

    fn pool<T, F>(scenario: T, grace: Duration) -> (VuPool<T>, Aggregator)
    where
        T: Fn() -> F + Send + Sync + 'static + Clone,
        F: Future<Output = ()> + Send + 'static,
    {
        let aggregator = Aggregator::new(&RunConfig::new("pool"));
        let pool = VuPool::new(
            scenario,
            Client::new(&HttpConfig::default()).unwrap(),
            CheckSet::default(),
            aggregator.clone(),
            None,
            grace,
        );
        (pool, aggregator)
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn converges_to_target() {
        let (mut pool, _) = pool(
            || async { tokio::time::sleep(Duration::from_millis(10)).await },
            Duration::from_secs(30),
        );

        for target in [1, 10, 1_000, 250, 0, 1_200] {
            pool.set_target(target);
            assert_eq!(pool.active(), target);
        }
        pool.shutdown(Duration::from_secs(5)).await;
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.retiring(), 0);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn retired_vus_finish_their_iteration() {
        let (mut pool, agg) = pool(
            || async { tokio::time::sleep(Duration::from_millis(50)).await },
            Duration::from_secs(30),
        );

        pool.set_target(5);
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.set_target(0);
        assert_eq!(pool.retiring(), 5);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.reap(), 0);
        assert_eq!(pool.retiring(), 0);

        agg.flush().unwrap();
        assert_eq!(agg.total(ITERATIONS).unwrap(), 5.);
        assert_eq!(agg.total(INTERRUPTED_ITERATIONS).unwrap(), 0.);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn stuck_vus_are_aborted() {
        let (mut pool, agg) = pool(
            || async { tokio::time::sleep(Duration::from_secs(3600)).await },
            Duration::from_millis(50),
        );

        pool.set_target(3);
        tokio::task::yield_now().await;
        pool.set_target(1);
        assert_eq!(pool.reap(), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(pool.reap(), 2);
        assert!(logs_contain("aborting it"));

        assert_eq!(pool.shutdown(Duration::from_millis(10)).await, 1);

        agg.flush().unwrap();
        assert_eq!(agg.total(ITERATIONS).unwrap(), 0.);
        assert_eq!(agg.total(INTERRUPTED_ITERATIONS).unwrap(), 3.);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn panicked_vus_are_replaced() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let panicked = std::sync::Arc::new(AtomicBool::new(false));
        let (mut pool, agg) = pool(
            {
                let panicked = panicked.clone();
                move || {
                    let panicked = panicked.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        if !panicked.swap(true, Ordering::SeqCst) {
                            panic!("scenario bug");
                        }
                    }
                }
            },
            Duration::from_secs(1),
        );

        pool.set_target(2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.set_target(2);
        assert_eq!(pool.active(), 2);
        assert!(logs_contain("exited unexpectedly"));
        assert!(pool.active.iter().all(|vu| !vu.handle.is_finished()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown(Duration::from_secs(1)).await;

        agg.flush().unwrap();
        assert!(agg.total(ITERATIONS).unwrap() > 0.);
        assert_eq!(agg.total(INTERRUPTED_ITERATIONS).unwrap(), 1.);
    }

    #[tokio::test]
    async fn vu_ids_are_unique() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(std::collections::BTreeSet::new()));
        let (mut pool, _) = pool(
            {
                let seen = seen.clone();
                move || {
                    let seen = seen.clone();
                    async move {
                        if let Some(id) = crate::vu_id() {
                            seen.lock().unwrap().insert(id);
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                }
            },
            Duration::from_secs(1),
        );

        pool.set_target(4);
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown(Duration::from_secs(1)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().copied().collect::<Vec<_>>(), [1, 2, 3, 4]);
    }
}
