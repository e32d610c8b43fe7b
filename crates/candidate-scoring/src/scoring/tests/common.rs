use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::config::ScoringSettings;
use crate::scoring::clock::FixedClock;
use crate::scoring::config::{FlagRules, InMemoryScoringConfig, ScoringConfig};
use crate::scoring::domain::{ApplicantId, ComponentKey, ComponentRecord, ComponentSet};
use crate::scoring::engine::RecomputeEngine;
use crate::scoring::repository::{
    ComponentStore, CompositeSnapshotStore, InMemoryComponentStore, InMemorySnapshotStore,
    StoreError,
};
use crate::scoring::service::ReconciliationService;
use crate::scoring::CompositeResult;

pub(super) type MemoryService = ReconciliationService<InMemoryComponentStore, InMemorySnapshotStore>;

pub(super) fn stamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn settings() -> ScoringSettings {
    ScoringSettings::default()
}

pub(super) fn engine() -> RecomputeEngine {
    RecomputeEngine::new(FlagRules::from_settings(&settings()), "renorm-v2")
}

pub(super) fn record(norm: Option<f64>, flags: &[&str]) -> ComponentRecord {
    ComponentRecord {
        raw: norm.map(|value| value * 10.0),
        norm,
        flags: flags.iter().map(|flag| flag.to_string()).collect::<BTreeSet<_>>(),
        meta: Map::new(),
        updated_at: stamp(),
    }
}

pub(super) fn components(entries: &[(ComponentKey, Option<f64>, &[&str])]) -> ComponentSet {
    entries
        .iter()
        .map(|(key, norm, flags)| (*key, record(*norm, flags)))
        .collect()
}

pub(super) fn build_service() -> (
    Arc<MemoryService>,
    Arc<InMemoryComponentStore>,
    Arc<InMemorySnapshotStore>,
) {
    let components = Arc::new(InMemoryComponentStore::default());
    let snapshots = Arc::new(InMemorySnapshotStore::default());
    let service = build_service_with(components.clone(), snapshots.clone());
    (Arc::new(service), components, snapshots)
}

pub(super) fn build_service_with<C, S>(
    components: Arc<C>,
    snapshots: Arc<S>,
) -> ReconciliationService<C, S>
where
    C: ComponentStore + 'static,
    S: CompositeSnapshotStore + 'static,
{
    let config = Arc::new(
        InMemoryScoringConfig::new(ScoringConfig::default()).expect("default config is valid"),
    );
    ReconciliationService::new(components, snapshots, config, &settings())
        .with_clock(Arc::new(FixedClock(stamp())))
}

pub(super) const APPLICANT: ApplicantId = ApplicantId(4021);

pub(super) fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

/// Snapshot store whose writes can be switched off to simulate an outage.
#[derive(Default)]
pub(super) struct FlakySnapshotStore {
    pub(super) inner: InMemorySnapshotStore,
    pub(super) failing: AtomicBool,
}

impl FlakySnapshotStore {
    pub(super) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl CompositeSnapshotStore for FlakySnapshotStore {
    fn put(&self, applicant: ApplicantId, result: CompositeResult) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("snapshot table locked".to_string()));
        }
        self.inner.put(applicant, result)
    }

    fn get(&self, applicant: ApplicantId) -> Result<Option<CompositeResult>, StoreError> {
        self.inner.get(applicant)
    }
}

pub(super) struct UnavailableComponentStore;

impl ComponentStore for UnavailableComponentStore {
    fn upsert(
        &self,
        _applicant: ApplicantId,
        _key: ComponentKey,
        _record: ComponentRecord,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn get_all(&self, _applicant: ApplicantId) -> Result<ComponentSet, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn scratch_dir(label: &str) -> std::path::PathBuf {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    std::env::temp_dir().join(format!(
        "candidate-scoring-{label}-{}-{nanos}",
        std::process::id()
    ))
}
