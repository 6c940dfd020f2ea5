mod config;
mod constants;
mod duration;
mod error;
mod metric;
mod stats;
mod threshold;

pub use config::*;
pub use constants::*;
pub use duration::*;
pub use error::*;
pub use metric::*;
pub use stats::*;
pub use threshold::*;
