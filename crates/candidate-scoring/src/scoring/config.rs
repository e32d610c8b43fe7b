use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::domain::{ComponentKey, Grade};
use crate::config::ScoringSettings;

/// Weights per component and minimum composite per grade.
///
/// Values handed out by a [`ScoringConfigSource`] are snapshots: a recompute works on
/// its own copy and later edits never leak into a computation in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: BTreeMap<ComponentKey, f64>,
    pub bands: BTreeMap<Grade, f64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            bands: default_bands(),
        }
    }
}

pub fn default_weights() -> BTreeMap<ComponentKey, f64> {
    BTreeMap::from([
        (ComponentKey::Psymetrics, 40.0),
        (ComponentKey::Autoproctor, 20.0),
        (ComponentKey::Physical, 20.0),
        (ComponentKey::Skills, 20.0),
        (ComponentKey::Medical, 0.0),
    ])
}

pub fn default_bands() -> BTreeMap<Grade, f64> {
    BTreeMap::from([
        (Grade::A, 85.0),
        (Grade::B, 70.0),
        (Grade::C, 55.0),
        (Grade::D, 0.0),
    ])
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ScoringConfigError> {
        validate_weights(&self.weights)?;
        validate_bands(&self.bands)
    }

    /// Replace whichever half is unusable with the built-in default. Returns the
    /// problems found so the caller can log them.
    pub fn sanitized(self) -> (Self, Vec<ScoringConfigError>) {
        let mut problems = Vec::new();

        let weights = match validate_weights(&self.weights) {
            Ok(()) => self.weights,
            Err(err) => {
                problems.push(err);
                default_weights()
            }
        };

        let bands = match validate_bands(&self.bands) {
            Ok(()) => self.bands,
            Err(err) => {
                problems.push(err);
                default_bands()
            }
        };

        (Self { weights, bands }, problems)
    }

    /// Components with a positive weight; these must all be present for a final status.
    pub fn weighted_keys(&self) -> BTreeSet<ComponentKey> {
        self.weights
            .iter()
            .filter(|(_, weight)| **weight > 0.0)
            .map(|(key, _)| *key)
            .collect()
    }
}

fn validate_weights(weights: &BTreeMap<ComponentKey, f64>) -> Result<(), ScoringConfigError> {
    if weights.is_empty() {
        return Err(ScoringConfigError::NoWeights);
    }
    for (key, weight) in weights {
        if !weight.is_finite() {
            return Err(ScoringConfigError::NonFiniteWeight(*key));
        }
        if *weight < 0.0 {
            return Err(ScoringConfigError::NegativeWeight {
                key: *key,
                weight: *weight,
            });
        }
    }
    Ok(())
}

fn validate_bands(bands: &BTreeMap<Grade, f64>) -> Result<(), ScoringConfigError> {
    let mut previous: Option<(Grade, f64)> = None;
    for grade in Grade::ALL {
        let threshold = *bands
            .get(&grade)
            .ok_or(ScoringConfigError::MissingBand(grade))?;
        if !threshold.is_finite() {
            return Err(ScoringConfigError::NonFiniteBand(grade));
        }
        if let Some((higher, higher_threshold)) = previous {
            if threshold > higher_threshold {
                return Err(ScoringConfigError::BandsNotDescending {
                    higher,
                    lower: grade,
                });
            }
        }
        previous = Some((grade, threshold));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringConfigError {
    #[error("at least one component weight is required")]
    NoWeights,
    #[error("weight for {key} must not be negative (got {weight})")]
    NegativeWeight { key: ComponentKey, weight: f64 },
    #[error("weight for {0} must be a finite number")]
    NonFiniteWeight(ComponentKey),
    #[error("grade band {0} is missing")]
    MissingBand(Grade),
    #[error("grade band {0} must be a finite number")]
    NonFiniteBand(Grade),
    #[error("grade band {lower} exceeds {higher}; bands must descend from A to D")]
    BandsNotDescending { higher: Grade, lower: Grade },
    #[error("scoring config file unavailable: {0}")]
    Io(#[from] io::Error),
    #[error("scoring config is not valid json: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScoringConfigError {
    /// True when the caller supplied a bad config, as opposed to storage failing.
    pub fn is_invalid_input(&self) -> bool {
        !matches!(
            self,
            ScoringConfigError::Io(_) | ScoringConfigError::Serialization(_)
        )
    }
}

/// Where the current weights and bands come from. `load` is called at the start of
/// every recompute and never fails; unusable stored values fall back to defaults.
pub trait ScoringConfigSource: Send + Sync {
    fn load(&self) -> ScoringConfig;
    fn store(&self, config: ScoringConfig) -> Result<(), ScoringConfigError>;
}

/// Process-local config, the default when no config file is configured.
#[derive(Debug, Default)]
pub struct InMemoryScoringConfig {
    current: RwLock<ScoringConfig>,
}

impl InMemoryScoringConfig {
    pub fn new(config: ScoringConfig) -> Result<Self, ScoringConfigError> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(config),
        })
    }
}

impl ScoringConfigSource for InMemoryScoringConfig {
    fn load(&self) -> ScoringConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, config: ScoringConfig) -> Result<(), ScoringConfigError> {
        config.validate()?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }
}

/// JSON file holding `{weights, bands}`, re-read on every load so edits by an
/// operator take effect on the next recompute. Stores share one staging file and
/// are serialized through `writes`.
#[derive(Debug)]
pub struct JsonFileScoringConfig {
    path: PathBuf,
    writes: Mutex<()>,
}

impl JsonFileScoringConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<ScoringConfig>, ScoringConfigError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl ScoringConfigSource for JsonFileScoringConfig {
    fn load(&self) -> ScoringConfig {
        let stored = match self.read() {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!(path = %self.path.display(), "no scoring config file; using defaults");
                return ScoringConfig::default();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "scoring config unreadable; using defaults");
                return ScoringConfig::default();
            }
        };

        let (config, problems) = stored.sanitized();
        for problem in problems {
            warn!(path = %self.path.display(), error = %problem, "scoring config rejected; default substituted");
        }
        config
    }

    fn store(&self, config: ScoringConfig) -> Result<(), ScoringConfigError> {
        config.validate()?;
        let payload = serde_json::to_vec_pretty(&config)?;
        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, payload)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

/// Flag classification. Exact matches and prefixes are both compared against the
/// trimmed, lowercased flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagRules {
    pub disqualifying: BTreeSet<String>,
    pub disqualifying_prefixes: Vec<String>,
    pub hold: BTreeSet<String>,
    pub hold_prefixes: Vec<String>,
}

impl FlagRules {
    pub fn from_settings(settings: &ScoringSettings) -> Self {
        Self {
            disqualifying: normalize_all(&settings.disqualifying_flags).collect(),
            disqualifying_prefixes: normalize_all(&settings.disqualifying_prefixes).collect(),
            hold: normalize_all(&settings.hold_flags).collect(),
            hold_prefixes: normalize_all(&settings.hold_prefixes).collect(),
        }
    }

    pub fn is_disqualifying(&self, flag: &str) -> bool {
        matches_rule(flag, &self.disqualifying, &self.disqualifying_prefixes)
    }

    pub fn is_hold(&self, flag: &str) -> bool {
        matches_rule(flag, &self.hold, &self.hold_prefixes)
    }
}

fn normalize_all(values: &[String]) -> impl Iterator<Item = String> + '_ {
    values
        .iter()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}

fn matches_rule(flag: &str, exact: &BTreeSet<String>, prefixes: &[String]) -> bool {
    let flag = flag.trim().to_ascii_lowercase();
    exact.contains(&flag) || prefixes.iter().any(|prefix| flag.starts_with(prefix.as_str()))
}
