mod policy;
mod rules;

use chrono::{DateTime, Utc};

use super::config::{FlagRules, ScoringConfig};
use super::domain::{ApplicantId, ComponentSet, CompositeResult, Grade, StatusFlag};
use policy::{classify_flags, decide_status, grade_for};
use rules::{round_hundredths, weighted_composite};

/// Pure evaluator: the same components, config and timestamp always produce the
/// same result. Holds no I/O handles.
#[derive(Debug, Clone)]
pub struct RecomputeEngine {
    rules: FlagRules,
    formula_version: String,
}

impl RecomputeEngine {
    pub fn new(rules: FlagRules, formula_version: impl Into<String>) -> Self {
        Self {
            rules,
            formula_version: formula_version.into(),
        }
    }

    pub fn rules(&self) -> &FlagRules {
        &self.rules
    }

    pub fn formula_version(&self) -> &str {
        &self.formula_version
    }

    pub fn compute(
        &self,
        applicant_id: ApplicantId,
        components: &ComponentSet,
        config: &ScoringConfig,
        computed_at: DateTime<Utc>,
    ) -> CompositeResult {
        let findings = classify_flags(components, &self.rules);
        let signals = weighted_composite(components, &config.weights);
        let status_flag = decide_status(&findings, &signals);

        let (composite, grade) = if status_flag == StatusFlag::Pending {
            (0.0, Grade::D)
        } else {
            (
                round_hundredths(signals.composite),
                grade_for(signals.composite, &config.bands),
            )
        };

        let mut reasons = findings.disqualifying;
        reasons.extend(findings.hold);
        reasons.extend(signals.missing.iter().map(|key| format!("awaiting {key}")));

        CompositeResult {
            applicant_id,
            components: components.clone(),
            weights: config.weights.clone(),
            bands: config.bands.clone(),
            composite,
            grade,
            status_flag,
            present: signals.present,
            missing: signals.missing,
            reasons,
            formula_version: self.formula_version.clone(),
            computed_at,
        }
    }
}
