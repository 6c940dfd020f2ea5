use std::fmt;

/// Lifecycle of a run, published on a [`tokio::sync::watch`] channel.
///
/// `Idle -> Ramping(0) -> Ramping(1) -> ... -> Draining -> Finished`. An interrupt or an
/// `abortOnFail` threshold moves any `Ramping` state straight to `Draining`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Index into the configured stages.
    Ramping { stage: usize },
    Draining,
    Finished,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Ramping { stage } => write!(f, "ramping (stage {})", stage + 1),
            RunState::Draining => f.write_str("draining"),
            RunState::Finished => f.write_str("finished"),
        }
    }
}
