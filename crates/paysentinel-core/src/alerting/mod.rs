//! Anomaly detection and alerting for PaySentinel
//!
//! Aggregates windowed outcome counters, evaluates alert rules (or the
//! statistical fallback), confirms and deduplicates breaches, and emits
//! enriched alerts to storage and notification channels.

mod aggregator;
mod confirmer;
mod emitter;
mod engine;
mod evaluator;
mod fallback;
mod notifier;
mod reasoning;
mod repository;
mod root_cause;
mod sources;
mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{aggregate, CounterKey};
pub use engine::{Collaborators, CycleReport, DetectionEngine};
pub use notifier::{KamContact, NotificationResult, NotificationSender};
pub use reasoning::{HttpReasoner, IncidentContext, ReasoningResponse};
pub use repository::{AlertRepository, RuleRepository};
pub use root_cause::{resolve as resolve_root_cause, Evidence};
pub use sources::{AlertStore, CounterSource, EventLog, KamDirectory, Notifier, Reasoner, RuleSource};
pub use state::{DetectionState, DetectionStatus, DetectorId, EvaluationKey, StateStore};
