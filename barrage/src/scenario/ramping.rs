use crate::aggregator::Aggregator;
use crate::checks::CheckSet;
use crate::evaluator;
use crate::http::Client;
use crate::pool::VuPool;
use crate::scheduler::{RampDown, Schedule};
use crate::state::RunState;
use crate::timer::Timer;
use crate::HarnessError;
use barrage_core::{
    Aggregation, RunConfig, RunReport, Sample, HTTP_REQS, HTTP_REQ_DURATION, VUS, VUS_MAX,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

#[instrument(name="scenario", skip_all, fields(name=config.name))]
pub(crate) async fn run_ramping<T, F>(
    scenario: T,
    config: RunConfig,
    checks: CheckSet,
    stop: CancellationToken,
    state: watch::Sender<RunState>,
) -> Result<RunReport, HarnessError>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;
    info!(
        "Running {} over {} stages ({}), peaking at {} VUs",
        config.name,
        config.stages.len(),
        humantime::format_duration(config.planned_duration()),
        config.max_vus()
    );

    let client = Client::new(&config.http)?;
    let aggregator = Aggregator::new(&config);
    let schedule = Schedule::new(config.start_vus, &config.stages);
    let mut pool = VuPool::new(
        scenario,
        client,
        checks,
        aggregator.clone(),
        config.think_time,
        config.graceful_ramp_down,
    );
    aggregator.record(Sample::new(VUS_MAX, config.max_vus() as f64));

    let live_eval = config.thresholds.iter().any(|t| t.abort_on_fail);
    let start = Instant::now();
    let mut timer = Timer::new(config.tick).await;
    debug!("Scheduling every {timer}");

    let mut stage = None;
    let mut ramp_down: Option<RampDown> = None;
    let mut interrupted = false;
    let mut aborted_by_threshold = false;
    let mut next_progress = config.progress_interval;

    loop {
        let elapsed = start.elapsed();

        let target = match &ramp_down {
            Some(ramp) => ramp.target_at(elapsed),
            None => schedule.target_at(elapsed),
        };
        pool.set_target(target);
        pool.reap();
        aggregator.record(Sample::new(VUS, pool.active() as f64));

        match &ramp_down {
            Some(ramp) => {
                if ramp.done(elapsed) {
                    break;
                }
            }
            None => {
                let current = schedule.stage_at(elapsed);
                if current != stage {
                    if let Some(idx) = current {
                        info!(
                            "Stage {}/{}: ramping to {} VUs over {}",
                            idx + 1,
                            config.stages.len(),
                            config.stages[idx].target,
                            humantime::format_duration(config.stages[idx].duration)
                        );
                        state.send_replace(RunState::Ramping { stage: idx });
                    }
                    stage = current;
                }

                if schedule.is_drained(elapsed) {
                    debug!("Schedule drained at {}", format_elapsed(elapsed));
                    break;
                }
            }
        }

        if live_eval && ramp_down.is_none() {
            let report = aggregator.snapshot(elapsed)?;
            if let Some(threshold) =
                evaluator::should_abort(&config.thresholds, &report, elapsed)
            {
                warn!("Threshold `{threshold}` failed; aborting the run.");
                aborted_by_threshold = true;
                break;
            }
        } else {
            aggregator.flush()?;
        }

        if elapsed >= next_progress {
            next_progress = elapsed + config.progress_interval;
            log_progress(&aggregator, elapsed, pool.active(), stage, &config)?;
        }

        tokio::select! {
            _ = timer.tick() => {}
            _ = stop.cancelled(), if ramp_down.is_none() => {
                let at = start.elapsed();
                info!(
                    "Stop requested at {}; ramping down over {}",
                    format_elapsed(at),
                    humantime::format_duration(config.graceful_ramp_down)
                );
                interrupted = true;
                ramp_down = Some(RampDown::new(at, pool.active(), config.graceful_ramp_down));
                state.send_replace(RunState::Draining);
            }
        }
    }

    state.send_replace(RunState::Draining);
    let forced = pool.shutdown(config.graceful_stop).await;
    if forced > 0 {
        warn!("{forced} iterations were interrupted and excluded from the report.");
    }

    let elapsed = start.elapsed();
    let mut report = aggregator.snapshot(elapsed)?;
    report.finished = true;
    report.interrupted = interrupted;
    report.aborted_by_threshold = aborted_by_threshold;
    evaluator::apply(&mut report, &config.thresholds);

    for outcome in &report.thresholds {
        info!(
            "{}: {} -> {}",
            outcome.metric, outcome.expression, outcome.verdict
        );
    }
    info!(
        "Scenario complete in {}: {}",
        format_elapsed(elapsed),
        report.verdict
    );

    state.send_replace(RunState::Finished);
    Ok(report)
}

fn log_progress(
    aggregator: &Aggregator,
    elapsed: Duration,
    vus: usize,
    stage: Option<usize>,
    config: &RunConfig,
) -> Result<(), HarnessError> {
    let report = aggregator.snapshot(elapsed)?;
    let reqs = report
        .metric(HTTP_REQS)
        .and_then(|m| m.value(&Aggregation::Count))
        .unwrap_or(0.);
    let p99 = report
        .metric(HTTP_REQ_DURATION)
        .filter(|m| !m.is_empty())
        .and_then(|m| m.value(&Aggregation::Percentile(99.)));

    let stage = stage
        .map(|s| format!("{}/{}", s + 1, config.stages.len()))
        .unwrap_or_else(|| "-".to_string());
    match p99 {
        Some(p99) => info!(
            "[{}] stage {stage}, {vus} VUs, {reqs} requests, p(99)={p99:.2}ms",
            format_elapsed(elapsed)
        ),
        None => info!(
            "[{}] stage {stage}, {vus} VUs, {reqs} requests",
            format_elapsed(elapsed)
        ),
    }
    Ok(())
}

fn format_elapsed(elapsed: Duration) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
}
