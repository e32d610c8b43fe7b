use std::collections::BTreeMap;

use super::super::domain::{ComponentKey, ComponentSet};

pub(crate) struct CompositeSignals {
    pub composite: f64,
    pub present: Vec<ComponentKey>,
    pub missing: Vec<ComponentKey>,
    pub present_weight: f64,
}

impl CompositeSignals {
    /// Nothing scoreable: no configured component has a norm, or every present one
    /// carries zero weight.
    pub fn is_empty(&self) -> bool {
        self.present.is_empty() || self.present_weight <= 0.0
    }
}

/// Weighted average over the configured components that have a norm. Absent
/// components drop out of both the numerator and the denominator.
pub(crate) fn weighted_composite(
    components: &ComponentSet,
    weights: &BTreeMap<ComponentKey, f64>,
) -> CompositeSignals {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    let mut weighted_sum = 0.0;
    let mut present_weight = 0.0;

    for (key, weight) in weights {
        match components.get(key).and_then(|record| record.norm) {
            Some(norm) => {
                present.push(*key);
                weighted_sum += weight * norm;
                present_weight += weight;
            }
            None if *weight > 0.0 => missing.push(*key),
            None => {}
        }
    }

    let composite = if present_weight > 0.0 {
        (weighted_sum / present_weight).clamp(0.0, 100.0)
    } else {
        0.0
    };

    CompositeSignals {
        composite,
        present,
        missing,
        present_weight,
    }
}

/// Presentation rounding for the stored composite; banding uses the exact value.
pub(crate) fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
