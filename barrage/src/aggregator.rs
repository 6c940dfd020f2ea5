//! Metric collection shared by every VU.
//!
//! VUs never touch the metric state directly. Each VU buffers one iteration worth of samples
//! and commits it as a single [`Batch`] to a lock-free bucket; the run loop folds pending
//! batches into the per-metric state on every tick and before every snapshot. A batch is
//! therefore either fully visible in a snapshot or not at all.
use crate::HarnessError;
use barrage_core::{
    CheckResult, CheckSummary, MetricKind, MetricSummary, RunConfig, RunReport, Sample, Verdict,
    BUILTIN_METRICS, CHECKS,
};
use metrics_util::AtomicBucket;
use pdatastructs::tdigest::{TDigest, K1};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

const TDIGEST_BACKLOG_SIZE: usize = 100;
const TDIGEST_COMPRESSION: f64 = 100.;

/// Samples and check results of one scenario iteration.
#[derive(Debug, Default, Clone)]
pub(crate) struct Batch {
    pub samples: Vec<Sample>,
    pub checks: Vec<CheckResult>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.checks.is_empty()
    }
}

#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    started_at: SystemTime,
    percentiles: Vec<f64>,
    pending: AtomicBucket<Batch>,
    store: Mutex<MetricStore>,
}

impl Aggregator {
    pub fn new(config: &RunConfig) -> Self {
        let kinds = BUILTIN_METRICS
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .chain(config.custom_metrics.clone())
            .collect();

        Self {
            inner: Arc::new(Inner {
                name: config.name.clone(),
                started_at: SystemTime::now(),
                percentiles: config.required_percentiles(),
                pending: AtomicBucket::new(),
                store: Mutex::new(MetricStore::new(kinds)),
            }),
        }
    }

    /// Record a single sample. Safe to call from any task.
    pub fn record(&self, sample: Sample) {
        self.inner.pending.push(Batch {
            samples: vec![sample],
            checks: vec![],
        });
    }

    pub fn record_check(&self, result: CheckResult) {
        self.inner.pending.push(Batch {
            samples: vec![],
            checks: vec![result],
        });
    }

    pub(crate) fn submit(&self, batch: Batch) {
        if !batch.is_empty() {
            self.inner.pending.push(batch);
        }
    }

    /// Fold pending batches into the metric state.
    pub fn flush(&self) -> Result<(), HarnessError> {
        let mut store = self.inner.store.lock()?;
        self.drain_into(&mut store);
        Ok(())
    }

    /// Sum of a counter's values so far; 0 for anything else.
    pub fn total(&self, metric: &str) -> Result<f64, HarnessError> {
        let store = self.inner.store.lock()?;
        let total = match store.metrics.get(metric) {
            Some(MetricState::Counter { sum, .. }) => *sum,
            _ => 0.,
        };
        Ok(total)
    }

    /// Consistent summary of everything recorded so far. Thresholds are left unevaluated.
    pub fn snapshot(&self, elapsed: Duration) -> Result<RunReport, HarnessError> {
        let mut store = self.inner.store.lock()?;
        self.drain_into(&mut store);

        let metrics = store
            .metrics
            .iter()
            .map(|(name, state)| {
                (
                    name.clone(),
                    state.summarize(elapsed, &self.inner.percentiles),
                )
            })
            .collect();

        Ok(RunReport {
            name: self.inner.name.clone(),
            started_at: humantime::format_rfc3339_seconds(self.inner.started_at).to_string(),
            elapsed_secs: elapsed.as_secs_f64(),
            finished: false,
            interrupted: false,
            aborted_by_threshold: false,
            metrics,
            checks: store.checks.clone(),
            thresholds: vec![],
            verdict: Verdict::Indeterminate,
        })
    }

    fn drain_into(&self, store: &mut MetricStore) {
        self.inner.pending.clear_with(|batches| {
            for batch in batches {
                store.apply(batch);
            }
        });
    }
}

struct MetricStore {
    metrics: BTreeMap<String, MetricState>,
    checks: BTreeMap<String, CheckSummary>,
    unknown: HashSet<String>,
}

impl MetricStore {
    fn new(kinds: BTreeMap<String, MetricKind>) -> Self {
        Self {
            metrics: kinds
                .into_iter()
                .map(|(name, kind)| (name, MetricState::new(kind)))
                .collect(),
            checks: BTreeMap::new(),
            unknown: HashSet::new(),
        }
    }

    fn apply(&mut self, batch: &Batch) {
        for sample in &batch.samples {
            if let Some(state) = self.metrics.get_mut(&sample.metric) {
                state.add(sample);
            } else if self.unknown.insert(sample.metric.clone()) {
                warn!(
                    "Dropping samples for unregistered metric `{}`.",
                    sample.metric
                );
            }
        }

        for check in &batch.checks {
            let summary = self.checks.entry(check.name.clone()).or_default();
            if check.passed {
                summary.passes += 1;
            } else {
                summary.fails += 1;
            }

            if let Some(state) = self.metrics.get_mut(CHECKS) {
                state.add(&Sample::flag(CHECKS, check.passed));
            }
        }
    }
}

enum MetricState {
    Counter {
        samples: u64,
        sum: f64,
        by_tag: BTreeMap<String, f64>,
    },
    Gauge {
        samples: u64,
        last: f64,
        min: f64,
        max: f64,
    },
    Rate {
        passes: u64,
        fails: u64,
    },
    Trend(TrendState),
}

impl MetricState {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricState::Counter {
                samples: 0,
                sum: 0.,
                by_tag: BTreeMap::new(),
            },
            MetricKind::Gauge => MetricState::Gauge {
                samples: 0,
                last: 0.,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            },
            MetricKind::Rate => MetricState::Rate {
                passes: 0,
                fails: 0,
            },
            MetricKind::Trend => MetricState::Trend(TrendState::new()),
        }
    }

    fn add(&mut self, sample: &Sample) {
        if !sample.value.is_finite() {
            warn!(
                "Ignoring non-finite sample {} for `{}`.",
                sample.value, sample.metric
            );
            return;
        }

        match self {
            MetricState::Counter {
                samples,
                sum,
                by_tag,
            } => {
                *samples += 1;
                *sum += sample.value;
                if !sample.tags.is_empty() {
                    *by_tag.entry(tag_key(&sample.tags)).or_default() += sample.value;
                }
            }
            MetricState::Gauge {
                samples,
                last,
                min,
                max,
            } => {
                *samples += 1;
                *last = sample.value;
                *min = min.min(sample.value);
                *max = max.max(sample.value);
            }
            MetricState::Rate { passes, fails } => {
                if sample.value != 0. {
                    *passes += 1;
                } else {
                    *fails += 1;
                }
            }
            MetricState::Trend(trend) => trend.insert(sample.value),
        }
    }

    fn summarize(&self, elapsed: Duration, percentiles: &[f64]) -> MetricSummary {
        match self {
            MetricState::Counter {
                samples,
                sum,
                by_tag,
            } => {
                let secs = elapsed.as_secs_f64();
                MetricSummary::Counter {
                    samples: *samples,
                    count: *sum,
                    rate: if secs > 0. { sum / secs } else { 0. },
                    by_tag: by_tag.clone(),
                }
            }
            MetricState::Gauge {
                samples,
                last,
                min,
                max,
            } => {
                if *samples == 0 {
                    MetricSummary::Gauge {
                        samples: 0,
                        value: 0.,
                        min: 0.,
                        max: 0.,
                    }
                } else {
                    MetricSummary::Gauge {
                        samples: *samples,
                        value: *last,
                        min: *min,
                        max: *max,
                    }
                }
            }
            MetricState::Rate { passes, fails } => {
                let total = passes + fails;
                MetricSummary::Rate {
                    passes: *passes,
                    fails: *fails,
                    rate: if total == 0 {
                        0.
                    } else {
                        *passes as f64 / total as f64
                    },
                }
            }
            MetricState::Trend(trend) => trend.summarize(percentiles),
        }
    }
}

struct TrendState {
    digest: TDigest<K1>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl TrendState {
    fn new() -> Self {
        Self {
            digest: default_tdigest(),
            count: 0,
            sum: 0.,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn insert(&mut self, value: f64) {
        self.digest.insert(value);
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn quantile(&self, q: f64) -> f64 {
        let v = self.digest.quantile(q);
        if v.is_finite() {
            v.clamp(self.min, self.max)
        } else {
            error!("NaN quantile estimate for q={q}; reporting the maximum instead.");
            self.max
        }
    }

    fn summarize(&self, percentiles: &[f64]) -> MetricSummary {
        if self.count == 0 {
            return MetricSummary::Trend {
                count: 0,
                avg: 0.,
                min: 0.,
                med: 0.,
                max: 0.,
                percentiles: BTreeMap::new(),
            };
        }

        let percentiles = percentiles
            .iter()
            .map(|p| {
                (
                    barrage_core::Aggregation::Percentile(*p).to_string(),
                    self.quantile(p / 100.),
                )
            })
            .collect();

        MetricSummary::Trend {
            count: self.count,
            avg: self.sum / self.count as f64,
            min: self.min,
            med: self.quantile(0.5),
            max: self.max,
            percentiles,
        }
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(TDIGEST_COMPRESSION), TDIGEST_BACKLOG_SIZE)
}

fn tag_key(tags: &[(String, String)]) -> String {
    tags.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
