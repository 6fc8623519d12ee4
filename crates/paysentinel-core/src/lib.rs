//! # PaySentinel
//!
//! Anomaly detection and alerting for payment transaction outcomes.
//!
//! PaySentinel periodically aggregates windowed outcome counters, evaluates
//! them against configurable alert rules (or a statistical baseline when no
//! rule applies), confirms breaches across cycles, and emits deduplicated
//! alerts carrying a root cause, a suggested action and revenue at risk.
//!
//! ## Architecture
//!
//! - **Alerting**: the detection engine and its collaborator seams
//! - **Storage**: Redis for windowed counters, PostgreSQL for the event log, rules and alerts
//! - **API**: read-only operations endpoints and Prometheus scraping
//!
//! ## Quick Start
//!
//! ```bash
//! # Apply migrations and start the engine
//! paysentinel db migrate
//! paysentinel serve
//!
//! # Add a rule
//! paysentinel rules create --name "stripe errors" --metric error_rate --operator gt --threshold 0.2
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]

pub mod alerting;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{Collaborators, CycleReport, DetectionEngine};
    pub use crate::config::Config;
    pub use crate::db::Database;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
}
