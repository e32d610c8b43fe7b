use candidate_scoring::config::ScoringSettings;
use candidate_scoring::error::AppError;
use candidate_scoring::scoring::{
    ApplicantId, ComponentKey, ComponentSet, ComponentStore, ComponentUpdate, CompositeResult,
    CompositeSnapshotStore, InMemoryComponentStore, InMemoryScoringConfig, InMemorySnapshotStore,
    JsonDirStore, JsonFileScoringConfig, RecomputeEngine, ReconciliationService, ScoringConfig,
    ScoringConfigSource, ScoringError,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type ApiService = ReconciliationService<dyn ComponentStore, dyn CompositeSnapshotStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) service: Arc<ApiService>,
}

pub(crate) fn build_config_source(settings: &ScoringSettings) -> Arc<dyn ScoringConfigSource> {
    match &settings.config_path {
        Some(path) => {
            info!(path = %path.display(), "scoring config backed by file");
            Arc::new(JsonFileScoringConfig::new(path.clone()))
        }
        None => Arc::new(InMemoryScoringConfig::default()),
    }
}

pub(crate) fn build_service(settings: &ScoringSettings) -> Result<Arc<ApiService>, AppError> {
    let (components, snapshots): (Arc<dyn ComponentStore>, Arc<dyn CompositeSnapshotStore>) =
        match &settings.data_dir {
            Some(dir) => {
                let store = Arc::new(JsonDirStore::open(dir.clone())?);
                info!(dir = %dir.display(), "component and snapshot files enabled");
                (store.clone(), store)
            }
            None => (
                Arc::new(InMemoryComponentStore::default()),
                Arc::new(InMemorySnapshotStore::default()),
            ),
        };

    Ok(Arc::new(ReconciliationService::new(
        components,
        snapshots,
        build_config_source(settings),
        settings,
    )))
}

/// Components supplied inline for a dry-run score; keys are validated like updates.
#[derive(Debug, Deserialize)]
pub(crate) struct PreviewRequest {
    #[serde(default)]
    pub(crate) applicant_id: Option<u64>,
    pub(crate) components: BTreeMap<String, ComponentUpdate>,
}

/// Score components without locking or persisting anything.
pub(crate) fn preview(
    engine: &RecomputeEngine,
    config: &ScoringConfig,
    request: PreviewRequest,
    now: DateTime<Utc>,
) -> Result<CompositeResult, ScoringError> {
    let mut components = ComponentSet::new();
    for (key, update) in request.components {
        let key = key.parse::<ComponentKey>()?;
        components.insert(key, update.into_record(key, now)?);
    }

    let applicant = ApplicantId(request.applicant_id.unwrap_or_default());
    Ok(engine.compute(applicant, &components, config, now))
}
