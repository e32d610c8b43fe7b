use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{
    ApplicantId, ComponentKey, ComponentRecord, ComponentSet, CompositeResult, Grade, StatusFlag,
};

/// Latest normalized result per applicant and component key. Knows nothing about
/// scoring. Writes to the same key must serialize even without the applicant lock.
pub trait ComponentStore: Send + Sync {
    /// Replace the stored record for `key`; there is no per-key history.
    fn upsert(
        &self,
        applicant: ApplicantId,
        key: ComponentKey,
        record: ComponentRecord,
    ) -> Result<(), StoreError>;

    /// Owned copy of every stored component for the applicant.
    fn get_all(&self, applicant: ApplicantId) -> Result<ComponentSet, StoreError>;
}

/// Current composite per applicant. `put` overwrites, it never merges.
pub trait CompositeSnapshotStore: Send + Sync {
    fn put(&self, applicant: ApplicantId, result: CompositeResult) -> Result<(), StoreError>;
    fn get(&self, applicant: ApplicantId) -> Result<Option<CompositeResult>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored data could not be encoded: {0}")]
    Serialization(String),
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Unavailable(value.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryComponentStore {
    records: Mutex<HashMap<ApplicantId, ComponentSet>>,
}

impl ComponentStore for InMemoryComponentStore {
    fn upsert(
        &self,
        applicant: ApplicantId,
        key: ComponentKey,
        record: ComponentRecord,
    ) -> Result<(), StoreError> {
        let mut guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry(applicant).or_default().insert(key, record);
        Ok(())
    }

    fn get_all(&self, applicant: ApplicantId) -> Result<ComponentSet, StoreError> {
        let guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(&applicant).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<ApplicantId, CompositeResult>>,
}

impl CompositeSnapshotStore for InMemorySnapshotStore {
    fn put(&self, applicant: ApplicantId, result: CompositeResult) -> Result<(), StoreError> {
        let mut guard = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        guard.insert(applicant, result);
        Ok(())
    }

    fn get(&self, applicant: ApplicantId) -> Result<Option<CompositeResult>, StoreError> {
        let guard = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(&applicant).cloned())
    }
}

/// Relational shape of a snapshot: scalars as columns, maps as JSON blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub applicant_id: u64,
    pub components: String,
    pub weights: String,
    pub bands: String,
    pub composite: f64,
    pub grade: String,
    pub status_flag: String,
    pub formula_version: String,
    pub computed_at: DateTime<Utc>,
    /// `{present, missing, reasons}`.
    pub audit: String,
}

#[derive(Serialize, Deserialize)]
struct AuditBlob {
    present: Vec<ComponentKey>,
    missing: Vec<ComponentKey>,
    reasons: Vec<String>,
}

impl SnapshotRow {
    pub fn from_result(result: &CompositeResult) -> Result<Self, StoreError> {
        let audit = AuditBlob {
            present: result.present.clone(),
            missing: result.missing.clone(),
            reasons: result.reasons.clone(),
        };

        Ok(Self {
            applicant_id: result.applicant_id.0,
            components: serde_json::to_string(&result.components)?,
            weights: serde_json::to_string(&result.weights)?,
            bands: serde_json::to_string(&result.bands)?,
            composite: result.composite,
            grade: result.grade.label().to_string(),
            status_flag: result.status_flag.label().to_string(),
            formula_version: result.formula_version.clone(),
            computed_at: result.computed_at,
            audit: serde_json::to_string(&audit)?,
        })
    }

    pub fn into_result(self) -> Result<CompositeResult, StoreError> {
        let components: ComponentSet = serde_json::from_str(&self.components)?;
        let weights: BTreeMap<ComponentKey, f64> = serde_json::from_str(&self.weights)?;
        let bands: BTreeMap<Grade, f64> = serde_json::from_str(&self.bands)?;
        let grade: Grade = serde_json::from_value(Value::String(self.grade))?;
        let status_flag: StatusFlag = serde_json::from_value(Value::String(self.status_flag))?;
        let audit: AuditBlob = serde_json::from_str(&self.audit)?;

        Ok(CompositeResult {
            applicant_id: ApplicantId(self.applicant_id),
            components,
            weights,
            bands,
            composite: self.composite,
            grade,
            status_flag,
            present: audit.present,
            missing: audit.missing,
            reasons: audit.reasons,
            formula_version: self.formula_version,
            computed_at: self.computed_at,
        })
    }
}

/// Durable store keeping one directory per applicant with `components.json` and
/// `snapshot.json`. Files are replaced via rename so readers never see partial writes.
/// Writes serialize per applicant directory; unrelated applicants never wait on
/// each other. File I/O is blocking and runs on the caller's thread.
#[derive(Debug)]
pub struct JsonDirStore {
    root: PathBuf,
    writes: Mutex<HashMap<ApplicantId, Arc<Mutex<()>>>>,
}

impl JsonDirStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            writes: Mutex::new(HashMap::new()),
        })
    }

    /// Write slot guarding one applicant's directory.
    pub(crate) fn applicant_writes(&self, applicant: ApplicantId) -> Arc<Mutex<()>> {
        let mut slots = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(applicant).or_default())
    }

    fn applicant_dir(&self, applicant: ApplicantId) -> PathBuf {
        self.root.join(applicant.to_string())
    }

    fn components_path(&self, applicant: ApplicantId) -> PathBuf {
        self.applicant_dir(applicant).join("components.json")
    }

    fn snapshot_path(&self, applicant: ApplicantId) -> PathBuf {
        self.applicant_dir(applicant).join("snapshot.json")
    }

    fn read_components(&self, applicant: ApplicantId) -> Result<ComponentSet, StoreError> {
        match read_optional(&self.components_path(applicant))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(ComponentSet::new()),
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn replace_file(path: &Path, payload: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, payload)?;
    fs::rename(&staging, path)?;
    Ok(())
}

impl ComponentStore for JsonDirStore {
    fn upsert(
        &self,
        applicant: ApplicantId,
        key: ComponentKey,
        record: ComponentRecord,
    ) -> Result<(), StoreError> {
        let slot = self.applicant_writes(applicant);
        let _writes = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let mut components = self.read_components(applicant)?;
        components.insert(key, record);
        let payload = serde_json::to_vec_pretty(&components)?;
        replace_file(&self.components_path(applicant), &payload)
    }

    fn get_all(&self, applicant: ApplicantId) -> Result<ComponentSet, StoreError> {
        self.read_components(applicant)
    }
}

impl CompositeSnapshotStore for JsonDirStore {
    fn put(&self, applicant: ApplicantId, result: CompositeResult) -> Result<(), StoreError> {
        let row = SnapshotRow::from_result(&result)?;
        let payload = serde_json::to_vec_pretty(&row)?;
        let slot = self.applicant_writes(applicant);
        let _writes = slot.lock().unwrap_or_else(PoisonError::into_inner);
        replace_file(&self.snapshot_path(applicant), &payload)
    }

    fn get(&self, applicant: ApplicantId) -> Result<Option<CompositeResult>, StoreError> {
        match read_optional(&self.snapshot_path(applicant))? {
            Some(bytes) => {
                let row: SnapshotRow = serde_json::from_slice(&bytes)?;
                row.into_result().map(Some)
            }
            None => Ok(None),
        }
    }
}
