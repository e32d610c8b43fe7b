use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque applicant identifier assigned by the applicant-tracking system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicantId(pub u64);

impl fmt::Display for ApplicantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Assessment domains that contribute to the composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKey {
    Psymetrics,
    Autoproctor,
    Physical,
    Skills,
    Medical,
}

impl ComponentKey {
    pub const ALL: [ComponentKey; 5] = [
        ComponentKey::Psymetrics,
        ComponentKey::Autoproctor,
        ComponentKey::Physical,
        ComponentKey::Skills,
        ComponentKey::Medical,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ComponentKey::Psymetrics => "psymetrics",
            ComponentKey::Autoproctor => "autoproctor",
            ComponentKey::Physical => "physical",
            ComponentKey::Skills => "skills",
            ComponentKey::Medical => "medical",
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKey {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim();
        ComponentKey::ALL
            .into_iter()
            .find(|key| key.as_str() == needle)
            .ok_or_else(|| ValidationError::UnknownComponent(value.to_string()))
    }
}

/// Normalized result reported by a collaborator for one component.
///
/// `raw` is kept for audit only; `norm` (0-100) is what scoring uses and may be absent
/// while the source is still pending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentUpdate {
    #[serde(default)]
    pub raw: Option<f64>,
    #[serde(default)]
    pub norm: Option<f64>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl ComponentUpdate {
    pub fn scored(norm: f64) -> Self {
        Self {
            norm: Some(norm),
            ..Self::default()
        }
    }

    pub fn with_raw(mut self, raw: f64) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Validate the update and stamp it with the engine's write time.
    pub fn into_record(
        self,
        key: ComponentKey,
        updated_at: DateTime<Utc>,
    ) -> Result<ComponentRecord, ValidationError> {
        if let Some(raw) = self.raw {
            if !raw.is_finite() {
                return Err(ValidationError::NonFiniteValue { key, field: "raw" });
            }
        }

        if let Some(norm) = self.norm {
            if !norm.is_finite() {
                return Err(ValidationError::NonFiniteValue { key, field: "norm" });
            }
            if !(0.0..=100.0).contains(&norm) {
                return Err(ValidationError::NormOutOfRange { key, value: norm });
            }
        }

        let mut flags = BTreeSet::new();
        for flag in self.flags {
            let flag = flag.trim().to_ascii_lowercase();
            if flag.is_empty() {
                return Err(ValidationError::EmptyFlag { key });
            }
            flags.insert(flag);
        }

        Ok(ComponentRecord {
            raw: self.raw,
            norm: self.norm,
            flags,
            meta: self.meta,
            updated_at,
        })
    }
}

/// Stored, validated form of the latest update for one component key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub raw: Option<f64>,
    pub norm: Option<f64>,
    pub flags: BTreeSet<String>,
    pub meta: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

pub type ComponentSet = BTreeMap<ComponentKey, ComponentRecord>;

/// Letter grade; declaration order is best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    pub const ALL: [Grade; 4] = [Grade::A, Grade::B, Grade::C, Grade::D];

    pub const fn label(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Hiring eligibility state of a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFlag {
    Pending,
    Hold,
    Provisional,
    Disqualified,
    Final,
}

impl StatusFlag {
    pub const fn label(self) -> &'static str {
        match self {
            StatusFlag::Pending => "pending",
            StatusFlag::Hold => "hold",
            StatusFlag::Provisional => "provisional",
            StatusFlag::Disqualified => "disqualified",
            StatusFlag::Final => "final",
        }
    }

    /// Only a clean, complete composite may be used to grant eligibility.
    pub const fn is_eligible(self) -> bool {
        matches!(self, StatusFlag::Final)
    }
}

impl fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Persisted current-state snapshot for one applicant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    pub applicant_id: ApplicantId,
    pub components: ComponentSet,
    pub weights: BTreeMap<ComponentKey, f64>,
    pub bands: BTreeMap<Grade, f64>,
    pub composite: f64,
    pub grade: Grade,
    pub status_flag: StatusFlag,
    /// Configured components that carried a `norm` at computation time.
    pub present: Vec<ComponentKey>,
    /// Weighted components still awaiting a `norm`.
    pub missing: Vec<ComponentKey>,
    pub reasons: Vec<String>,
    pub formula_version: String,
    pub computed_at: DateTime<Utc>,
}

/// Rejections raised before anything is stored.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown component key '{0}'")]
    UnknownComponent(String),
    #[error("{key}: norm {value} is outside 0..=100")]
    NormOutOfRange { key: ComponentKey, value: f64 },
    #[error("{key}: {field} must be a finite number")]
    NonFiniteValue {
        key: ComponentKey,
        field: &'static str,
    },
    #[error("{key}: flags must not be blank")]
    EmptyFlag { key: ComponentKey },
}
