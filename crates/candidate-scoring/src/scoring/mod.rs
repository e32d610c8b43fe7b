//! Composite scoring and reconciliation.
//!
//! Producers normalize a provider payload into a [`ComponentUpdate`] and hand it to
//! [`ReconciliationService::update_component_and_recompute`]. The service serializes
//! the merge per applicant through [`ApplicantLock`], runs the pure
//! [`RecomputeEngine`], and overwrites the applicant's [`CompositeResult`] snapshot.

pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod lock;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    FlagRules, InMemoryScoringConfig, JsonFileScoringConfig, ScoringConfig, ScoringConfigError,
    ScoringConfigSource,
};
pub use domain::{
    ApplicantId, ComponentKey, ComponentRecord, ComponentSet, ComponentUpdate, CompositeResult,
    Grade, StatusFlag, ValidationError,
};
pub use engine::RecomputeEngine;
pub use lock::{ApplicantGuard, ApplicantLock, LockTimeout, LockWait};
pub use repository::{
    ComponentStore, CompositeSnapshotStore, InMemoryComponentStore, InMemorySnapshotStore,
    JsonDirStore, SnapshotRow, StoreError,
};
pub use router::scoring_router;
pub use service::{BatchItem, BatchOutcome, ReconciliationService, ScoringError};
