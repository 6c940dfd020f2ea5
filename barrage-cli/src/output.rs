use crate::error::CliError;
use barrage_core::{MetricSummary, RunReport, Verdict};
use std::fmt::Write as _;
use std::path::Path;

/// Human readable end-of-run summary.
pub fn summary(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n  scenario: {} ({:.1}s{})\n",
        report.name,
        report.elapsed_secs,
        if report.interrupted {
            ", interrupted"
        } else if report.aborted_by_threshold {
            ", aborted by threshold"
        } else {
            ""
        }
    );

    if !report.checks.is_empty() {
        for (name, check) in &report.checks {
            let mark = if check.fails == 0 { '✓' } else { '✗' };
            let _ = writeln!(
                out,
                "  {mark} {name}: {:.2}% ({} passed, {} failed)",
                check.rate() * 100.,
                check.passes,
                check.fails
            );
        }
        out.push('\n');
    }

    for (name, metric) in &report.metrics {
        let _ = writeln!(out, "  {name:.<28} {}", format_metric(metric));
    }

    if !report.thresholds.is_empty() {
        out.push_str("\n  thresholds:\n");
        for t in &report.thresholds {
            let mark = match t.verdict {
                Verdict::Pass => '✓',
                Verdict::Fail => '✗',
                Verdict::Indeterminate => '?',
            };
            let observed = t
                .observed
                .map(|v| format!(" (observed {v:.4})"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {mark} {}: {} -> {}{observed}",
                t.metric, t.expression, t.verdict
            );
        }
    }

    let _ = writeln!(out, "\n  verdict: {}", report.verdict);
    out
}

fn format_metric(metric: &MetricSummary) -> String {
    match metric {
        MetricSummary::Counter { count, rate, .. } => format!("{count} {rate:.2}/s"),
        MetricSummary::Gauge {
            value, min, max, ..
        } => format!("{value} min={min} max={max}"),
        MetricSummary::Rate {
            passes,
            fails,
            rate,
        } => format!("{:.2}% {passes} of {}", rate * 100., passes + fails),
        MetricSummary::Trend {
            avg,
            min,
            med,
            max,
            percentiles,
            ..
        } => {
            let mut s = format!("avg={avg:.2} min={min:.2} med={med:.2} max={max:.2}");
            for (p, v) in percentiles {
                let _ = write!(s, " {p}={v:.2}");
            }
            s
        }
    }
}

pub fn write_report(path: &Path, report: &RunReport) -> Result<(), CliError> {
    let json =
        serde_json::to_string_pretty(report).map_err(|e| CliError::Report(e.to_string()))?;
    std::fs::write(path, json)
        .map_err(|e| CliError::Report(format!("{}: {e}", path.display())))
}
