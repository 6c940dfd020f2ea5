use barrage::HarnessError;
use barrage_core::{ConfigError, RunReport, Verdict};
use thiserror::Error;

pub const EXIT_PASS: i32 = 0;
pub const EXIT_THRESHOLDS_FAILED: i32 = 99;
pub const EXIT_INTERNAL: i32 = 103;
pub const EXIT_CONFIG: i32 = 104;
pub const EXIT_INTERRUPTED: i32 = 105;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error("Unable to write report: {0}")]
    Report(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Harness(HarnessError::Config(_)) => EXIT_CONFIG,
            CliError::Harness(_) | CliError::Report(_) => EXIT_INTERNAL,
        }
    }
}

/// Exit code for a completed run. A failed threshold outranks an interrupt.
pub fn exit_code(report: &RunReport) -> i32 {
    match report.verdict {
        Verdict::Fail => EXIT_THRESHOLDS_FAILED,
        _ if report.interrupted => EXIT_INTERRUPTED,
        Verdict::Indeterminate => EXIT_THRESHOLDS_FAILED,
        Verdict::Pass => EXIT_PASS,
    }
}
