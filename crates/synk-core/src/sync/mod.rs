//! Sync engine: change detection, reconciliation and the cycle orchestrator.
//!
//! A cycle fetches both providers, classifies their items against the link
//! table, reconciles the two deltas into operations and applies them one by
//! one. Links, cursors and snapshots are committed together at the end.

pub mod detector;
pub mod orchestrator;
pub mod reconciler;

#[cfg(test)]
mod reconciler_tests;

pub use detector::{classify, current_view, detect, ChangeKind, DetectedChange, ProviderDelta};
pub use orchestrator::{
    AccountGate, AdapterSet, CyclePhase, CycleResult, OperationOutcome, OutcomeState, StaticGate,
    SyncOrchestrator, SyncReport, SyncStatus,
};
pub use reconciler::reconcile;
