use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::{FlagRules, ScoringConfig, ScoringConfigError, ScoringConfigSource};
use super::domain::{ApplicantId, ComponentKey, ComponentUpdate, CompositeResult, ValidationError};
use super::engine::RecomputeEngine;
use super::lock::{ApplicantGuard, ApplicantLock, LockTimeout, LockWait};
use super::repository::{ComponentStore, CompositeSnapshotStore, StoreError};
use crate::config::ScoringSettings;

/// Orchestrates lock, merge, compute and persist for each applicant.
///
/// Component values only reach the snapshot through this service: every cycle reads
/// the full component set back under the applicant lock, so a recompute never misses
/// an update that finished before it started.
pub struct ReconciliationService<C: ?Sized, S: ?Sized> {
    components: Arc<C>,
    snapshots: Arc<S>,
    config: Arc<dyn ScoringConfigSource>,
    lock: ApplicantLock,
    engine: RecomputeEngine,
    clock: Arc<dyn Clock>,
    request_wait: Duration,
    batch_wait: Duration,
}

impl<C, S> ReconciliationService<C, S>
where
    C: ComponentStore + ?Sized + 'static,
    S: CompositeSnapshotStore + ?Sized + 'static,
{
    pub fn new(
        components: Arc<C>,
        snapshots: Arc<S>,
        config: Arc<dyn ScoringConfigSource>,
        settings: &ScoringSettings,
    ) -> Self {
        let engine = RecomputeEngine::new(
            FlagRules::from_settings(settings),
            settings.formula_version.clone(),
        );

        Self {
            components,
            snapshots,
            config,
            lock: ApplicantLock::new(),
            engine,
            clock: Arc::new(SystemClock),
            request_wait: settings.request_lock_timeout,
            batch_wait: settings.batch_lock_timeout,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine(&self) -> &RecomputeEngine {
        &self.engine
    }

    pub fn lock(&self) -> &ApplicantLock {
        &self.lock
    }

    /// Store one component result and recompute the applicant's composite.
    ///
    /// Unknown keys and malformed values are rejected before anything is written.
    pub async fn update_component_and_recompute(
        &self,
        applicant: ApplicantId,
        key: &str,
        update: ComponentUpdate,
        wait: LockWait,
    ) -> Result<CompositeResult, ScoringError> {
        let key = key.parse::<ComponentKey>().inspect_err(|err| {
            warn!(%applicant, error = %err, "component update rejected");
        })?;
        let mut record = update.into_record(key, self.clock.now()).inspect_err(|err| {
            warn!(%applicant, error = %err, "component update rejected");
        })?;

        let _guard = self.acquire(applicant, wait).await?;

        record.updated_at = self.clock.now();
        self.components
            .upsert(applicant, key, record)
            .map_err(ScoringError::ComponentStore)?;
        debug!(%applicant, component = %key, "component stored");

        self.recompute_locked(applicant, true)
    }

    /// Recompute from the stored components without writing any. Picks up config
    /// changes and repairs snapshots left stale by an earlier failed write.
    pub async fn recompute_now(
        &self,
        applicant: ApplicantId,
        wait: LockWait,
    ) -> Result<CompositeResult, ScoringError> {
        let _guard = self.acquire(applicant, wait).await?;
        self.recompute_locked(applicant, false)
    }

    pub fn get_snapshot(
        &self,
        applicant: ApplicantId,
    ) -> Result<Option<CompositeResult>, ScoringError> {
        self.snapshots
            .get(applicant)
            .map_err(|source| ScoringError::Snapshot {
                source,
                component_written: false,
            })
    }

    pub fn get_config(&self) -> ScoringConfig {
        self.config.load()
    }

    /// Replace weights and bands. Existing snapshots keep the values they were
    /// computed with until their next recompute.
    pub fn set_config(&self, config: ScoringConfig) -> Result<ScoringConfig, ScoringError> {
        self.config.store(config.clone())?;
        info!(weights = ?config.weights, bands = ?config.bands, "scoring config updated");
        Ok(config)
    }

    /// Apply a sync job's updates. Each applicant's items run in order; different
    /// applicants run concurrently. One failure never aborts the rest.
    pub async fn apply_batch(
        self: &Arc<Self>,
        items: Vec<BatchItem>,
    ) -> Vec<BatchOutcome> {
        let mut by_applicant: BTreeMap<ApplicantId, Vec<(usize, BatchItem)>> = BTreeMap::new();
        for (index, item) in items.into_iter().enumerate() {
            by_applicant
                .entry(item.applicant)
                .or_default()
                .push((index, item));
        }

        let mut tasks = JoinSet::new();
        for (_, queue) in by_applicant {
            let service = Arc::clone(self);
            tasks.spawn(async move {
                let mut outcomes = Vec::with_capacity(queue.len());
                for (index, item) in queue {
                    let result = service
                        .update_component_and_recompute(
                            item.applicant,
                            &item.key,
                            item.update,
                            LockWait::Batch,
                        )
                        .await;
                    outcomes.push(BatchOutcome {
                        index,
                        applicant: item.applicant,
                        key: item.key,
                        result,
                    });
                }
                outcomes
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(batch) => outcomes.extend(batch),
                Err(err) => error!(error = %err, "batch worker aborted"),
            }
        }
        outcomes.sort_by_key(|outcome| outcome.index);
        outcomes
    }

    async fn acquire(
        &self,
        applicant: ApplicantId,
        wait: LockWait,
    ) -> Result<ApplicantGuard<'_>, ScoringError> {
        let wait = match wait {
            LockWait::Request => self.request_wait,
            LockWait::Batch => self.batch_wait,
            LockWait::Within(duration) => duration,
        };

        let guard = self.lock.acquire(applicant, wait).await.inspect_err(|err| {
            warn!(%applicant, waited_ms = err.waited.as_millis() as u64, "applicant lock timed out");
        })?;
        debug!(%applicant, "applicant lock acquired");
        Ok(guard)
    }

    // Caller holds the applicant lock. No await points from here on.
    fn recompute_locked(
        &self,
        applicant: ApplicantId,
        component_written: bool,
    ) -> Result<CompositeResult, ScoringError> {
        let components = self.components.get_all(applicant).map_err(|source| {
            if component_written {
                error!(%applicant, error = %source, "component stored but snapshot not refreshed");
            }
            ScoringError::ComponentStore(source)
        })?;

        let config = self.config.load();
        let result = self
            .engine
            .compute(applicant, &components, &config, self.clock.now());

        let previous = match self.snapshots.get(applicant) {
            Ok(previous) => previous.map(|snapshot| snapshot.status_flag),
            Err(err) => {
                debug!(%applicant, error = %err, "previous snapshot unreadable");
                None
            }
        };

        if let Err(source) = self.snapshots.put(applicant, result.clone()) {
            if component_written {
                error!(
                    %applicant,
                    error = %source,
                    "component stored but snapshot write failed; next recompute will reconcile"
                );
            } else {
                error!(%applicant, error = %source, "snapshot write failed");
            }
            return Err(ScoringError::Snapshot {
                source,
                component_written,
            });
        }

        if previous != Some(result.status_flag) {
            info!(
                %applicant,
                from = previous.map(|status| status.label()).unwrap_or("none"),
                to = result.status_flag.label(),
                composite = result.composite,
                "composite status changed"
            );
        }
        debug!(
            %applicant,
            composite = result.composite,
            grade = %result.grade,
            status = %result.status_flag,
            "composite recomputed"
        );

        Ok(result)
    }
}

/// One update in a sync batch. `key` is validated like any other update.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub applicant: ApplicantId,
    pub key: String,
    pub update: ComponentUpdate,
}

#[derive(Debug)]
pub struct BatchOutcome {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub applicant: ApplicantId,
    pub key: String,
    pub result: Result<CompositeResult, ScoringError>,
}

/// Error raised by the reconciliation service.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),
    #[error("component store failed: {0}")]
    ComponentStore(#[source] StoreError),
    #[error("snapshot store failed: {source}")]
    Snapshot {
        #[source]
        source: StoreError,
        /// The component write landed before the snapshot failed.
        component_written: bool,
    },
    #[error("invalid scoring config: {0}")]
    Config(#[from] ScoringConfigError),
}

impl ScoringError {
    /// Worth retrying later: the update was not lost to a bad payload.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScoringError::LockTimeout(_) => true,
            ScoringError::ComponentStore(source) | ScoringError::Snapshot { source, .. } => {
                matches!(source, StoreError::Unavailable(_))
            }
            ScoringError::Validation(_) | ScoringError::Config(_) => false,
        }
    }
}
