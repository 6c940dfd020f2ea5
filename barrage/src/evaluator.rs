//! Judging thresholds against a report.
use barrage_core::{RunReport, Threshold, ThresholdOutcome, Verdict};
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Judge every threshold against `report`.
///
/// A threshold whose metric recorded no samples, or whose statistic the report does not
/// carry, is indeterminate rather than passing.
pub fn evaluate(thresholds: &[Threshold], report: &RunReport) -> Vec<ThresholdOutcome> {
    thresholds
        .iter()
        .map(|t| {
            let observed = report
                .metric(&t.metric)
                .filter(|m| !m.is_empty())
                .and_then(|m| m.value(&t.expr.aggregation));

            let verdict = match observed {
                None => Verdict::Indeterminate,
                Some(v) if t.expr.holds(v) => Verdict::Pass,
                Some(_) => Verdict::Fail,
            };

            ThresholdOutcome {
                metric: t.metric.clone(),
                expression: t.source.clone(),
                verdict,
                observed,
            }
        })
        .collect()
}

/// Write threshold outcomes and the overall verdict into `report`.
pub fn apply(report: &mut RunReport, thresholds: &[Threshold]) {
    report.thresholds = evaluate(thresholds, report);
    report.verdict = Verdict::combine(report.thresholds.iter().map(|o| &o.verdict));
}

/// First `abortOnFail` threshold that fails on a live snapshot taken at `elapsed`.
pub fn should_abort<'a>(
    thresholds: &'a [Threshold],
    report: &RunReport,
    elapsed: Duration,
) -> Option<&'a Threshold> {
    thresholds
        .iter()
        .filter(|t| t.abort_on_fail && elapsed >= t.delay_abort_eval)
        .find(|t| {
            evaluate(std::slice::from_ref(*t), report)
                .iter()
                .any(|o| o.verdict == Verdict::Fail)
        })
}
