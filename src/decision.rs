use crate::labels::{Label, LabelMap};
use crate::window::MeanVector;
use crate::ConfigurationError;

/// Resolved decision for one iteration. Carries no identity across iterations.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub label: Label,
    pub confidence: f32,
    /// Only confident decisions may drive a notification.
    pub confident: bool,
}

/// Arg-max + threshold over a mean vector.
#[derive(Clone, Debug)]
pub struct DecisionResolver {
    labels: LabelMap,
    threshold: f32,
}

impl DecisionResolver {
    pub fn new(labels: LabelMap, threshold: f32) -> Self {
        Self { labels, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Ties go to the lowest index. NaN entries never win.
    ///
    /// A mean whose length differs from the label count has no valid label
    /// for some indices and is rejected.
    pub fn resolve(&self, mean: &MeanVector) -> Result<Decision, ConfigurationError> {
        self.labels.check_output_len(mean.len())?;
        let (index, confidence) = argmax(mean.as_slice());
        let label = self
            .labels
            .get(index)
            .ok_or_else(|| ConfigurationError::new(format!("no label for index {}", index)))?
            .clone();
        Ok(Decision {
            label,
            confidence,
            confident: confidence >= self.threshold,
        })
    }
}

fn argmax(values: &[f32]) -> (usize, f32) {
    let mut best_index = 0;
    let mut best_value = f32::NAN;
    for (index, value) in values.iter().copied().enumerate() {
        if value.is_nan() {
            continue;
        }
        if best_value.is_nan() || value > best_value {
            best_index = index;
            best_value = value;
        }
    }
    if best_value.is_nan() {
        (0, 0.0)
    } else {
        (best_index, best_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(threshold: f32) -> DecisionResolver {
        let labels = LabelMap::new(["Circulo", "Triangulo", "Quadrado"]).unwrap();
        DecisionResolver::new(labels, threshold)
    }

    #[test]
    fn picks_largest_entry() {
        let decision = resolver(0.7)
            .resolve(&MeanVector::from_values(vec![0.1, 0.8, 0.1]))
            .unwrap();
        assert_eq!(decision.label.name(), "Triangulo");
        assert!((decision.confidence - 0.8).abs() < 1e-6);
        assert!(decision.confident);
    }

    #[test]
    fn ties_resolve_to_first_index() {
        let decision = resolver(0.7)
            .resolve(&MeanVector::from_values(vec![0.5, 0.5, 0.0]))
            .unwrap();
        assert_eq!(decision.label.index(), 0);
        assert!(!decision.confident);
    }

    #[test]
    fn threshold_is_inclusive() {
        let at = resolver(0.5)
            .resolve(&MeanVector::from_values(vec![0.5, 0.25, 0.25]))
            .unwrap();
        assert!(at.confident);

        let below_value = 0.5 - f32::EPSILON;
        let below = resolver(0.5)
            .resolve(&MeanVector::from_values(vec![below_value, 0.25, 0.25]))
            .unwrap();
        assert!(!below.confident);
    }

    #[test]
    fn unconfident_decision_still_names_label() {
        let decision = resolver(0.9)
            .resolve(&MeanVector::from_values(vec![0.2, 0.3, 0.5]))
            .unwrap();
        assert_eq!(decision.label.name(), "Quadrado");
        assert!(!decision.confident);
    }

    #[test]
    fn nan_entries_are_ignored() {
        let decision = resolver(0.1)
            .resolve(&MeanVector::from_values(vec![f32::NAN, 0.2, 0.6]))
            .unwrap();
        assert_eq!(decision.label.index(), 2);
    }

    #[test]
    fn mean_longer_than_label_map_is_rejected() {
        let err = resolver(0.5)
            .resolve(&MeanVector::from_values(vec![0.0, 0.0, 0.0, 1.0]))
            .unwrap_err();
        assert!(err.message.contains("4 scores"));
    }
}
