use std::collections::BTreeMap;

use super::super::config::FlagRules;
use super::super::domain::{ComponentSet, Grade, StatusFlag};
use super::rules::CompositeSignals;

/// Flags that influence status, formatted as `component:flag` for the audit trail.
#[derive(Debug, Default)]
pub(crate) struct FlagFindings {
    pub disqualifying: Vec<String>,
    pub hold: Vec<String>,
}

pub(crate) fn classify_flags(components: &ComponentSet, rules: &FlagRules) -> FlagFindings {
    let mut findings = FlagFindings::default();
    for (key, record) in components {
        for flag in &record.flags {
            if rules.is_disqualifying(flag) {
                findings.disqualifying.push(format!("{key}:{flag}"));
            } else if rules.is_hold(flag) {
                findings.hold.push(format!("{key}:{flag}"));
            }
        }
    }
    findings
}

/// Precedence: disqualified, pending, hold, provisional, final.
pub(crate) fn decide_status(findings: &FlagFindings, signals: &CompositeSignals) -> StatusFlag {
    if !findings.disqualifying.is_empty() {
        return StatusFlag::Disqualified;
    }
    if signals.is_empty() {
        return StatusFlag::Pending;
    }
    if !findings.hold.is_empty() {
        return StatusFlag::Hold;
    }
    if !signals.missing.is_empty() {
        return StatusFlag::Provisional;
    }
    StatusFlag::Final
}

/// First grade, highest threshold first, whose threshold is at or below the
/// composite. Equal thresholds resolve to the better grade.
pub(crate) fn grade_for(composite: f64, bands: &BTreeMap<Grade, f64>) -> Grade {
    let mut ordered: Vec<(Grade, f64)> = bands.iter().map(|(grade, min)| (*grade, *min)).collect();
    ordered.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));

    ordered
        .into_iter()
        .find(|(_, threshold)| *threshold <= composite)
        .map(|(grade, _)| grade)
        .unwrap_or(Grade::D)
}
