//! Data models for PaySentinel

mod alert;
mod metrics;
mod rule;

pub use alert::*;
pub use metrics::*;
pub use rule::*;
