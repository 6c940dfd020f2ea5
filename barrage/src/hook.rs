//! Per-VU iteration context.
//!
//! Every VU task runs inside a [`VU`] scope. Anything recorded during an iteration lands in
//! the scope's batch and is committed by the pool once the iteration completes, so an
//! iteration that never completes leaves nothing behind.
use crate::aggregator::Batch;
use crate::checks::CheckSet;
use crate::http::{Client, Response};
use crate::RequestError;
use barrage_core::{CheckResult, Sample};
use std::cell::RefCell;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

pub(crate) struct VuContext {
    pub id: usize,
    pub client: Client,
    pub checks: CheckSet,
    pub batch: RefCell<Batch>,
}

impl VuContext {
    pub fn new(id: usize, client: Client, checks: CheckSet) -> Self {
        Self {
            id,
            client,
            checks,
            batch: RefCell::new(Batch::default()),
        }
    }
}

tokio::task_local! {
    pub(crate) static VU: VuContext;
}

/// Record a value for `metric` as part of the current iteration.
///
/// The metric must be built in or registered on the scenario; anything else is dropped when
/// the iteration is committed.
pub fn record(metric: &str, value: f64) {
    record_sample(Sample::new(metric, value))
}

pub fn record_sample(sample: Sample) {
    if VU
        .try_with(|vu| vu.batch.borrow_mut().samples.push(sample))
        .is_err()
    {
        error!("No VU context available.");
    }
}

/// Record the outcome of an ad-hoc check.
pub fn check(name: &str, passed: bool) -> bool {
    if VU
        .try_with(|vu| {
            vu.batch
                .borrow_mut()
                .checks
                .push(CheckResult::new(name, passed))
        })
        .is_err()
    {
        error!("No VU context available.");
    }
    passed
}

/// Id of the VU running the current task, if any. Ids start at 1 and are never reused
/// within a run.
pub fn vu_id() -> Option<usize> {
    VU.try_with(|vu| vu.id).ok()
}

pub(crate) fn client() -> Option<Client> {
    // NOTE: Cheap clone, the reqwest client and limiter are behind Arcs
    VU.try_with(|vu| vu.client.clone()).ok()
}

/// Stage the samples of one request and run the registered checks against it.
pub(crate) fn record_response(samples: Vec<Sample>, outcome: Result<&Response, &RequestError>) {
    let res = VU.try_with(|vu| {
        let mut batch = vu.batch.borrow_mut();
        batch.samples.extend(samples);
        for check in vu.checks.iter() {
            let passed = check.evaluate(outcome);
            if !passed {
                trace!("VU {} failed check `{}`", vu.id, check.name);
            }
            batch.checks.push(CheckResult::new(&check.name, passed));
        }
    });

    if res.is_err() {
        error!("No VU context available.");
    }
}

/// Take everything staged by the current iteration.
pub(crate) fn take_batch() -> Batch {
    VU.try_with(|vu| std::mem::take(&mut *vu.batch.borrow_mut()))
        .unwrap_or_default()
}
