//! Ranked species predictions

use serde::Serialize;

use crate::{
    entities::ClassMapping,
    errors::DomainError,
    value_objects::{SpeciesLabel, TopK},
};

/// Numerically stable softmax over the full class set
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let Some(max) = logits.iter().copied().reduce(f32::max) else {
        return Vec::new();
    };
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// One ranked entry of a prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPrediction {
    pub label: SpeciesLabel,
    /// Softmax probability in `[0, 1]`
    pub probability: f32,
}

impl RankedPrediction {
    /// Probability as a percentage rounded to two decimals
    pub fn probability_percent(&self) -> f64 {
        (f64::from(self.probability) * 10_000.0).round() / 100.0
    }
}

/// The top-k classes for one image, highest probability first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    predictions: Vec<RankedPrediction>,
}

impl PredictionResult {
    /// Rank raw logits against a class mapping
    ///
    /// Applies a softmax over every class, then keeps the `top_k` most
    /// probable (capped at the class count). Equal probabilities keep class
    /// index order so the output is deterministic.
    pub fn from_logits(
        logits: &[f32],
        classes: &ClassMapping,
        top_k: TopK,
    ) -> Result<Self, DomainError> {
        if logits.len() != classes.len() {
            return Err(DomainError::shape_mismatch(classes.len(), logits.len()));
        }
        if logits.iter().any(|l| !l.is_finite()) {
            return Err(DomainError::ValidationError(
                "logits contain non-finite values".to_string(),
            ));
        }

        let probabilities = softmax(logits);
        let mut order: Vec<usize> = (0..probabilities.len()).collect();
        order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]).then(a.cmp(&b)));

        let predictions = order
            .into_iter()
            .take(top_k.clamp_to(classes.len()))
            .filter_map(|idx| {
                classes.label(idx).map(|label| RankedPrediction {
                    label: label.clone(),
                    probability: probabilities[idx],
                })
            })
            .collect();

        Ok(Self { predictions })
    }

    /// Ranked entries
    pub fn predictions(&self) -> &[RankedPrediction] {
        &self.predictions
    }

    /// Most probable entry
    pub fn top_match(&self) -> Option<&RankedPrediction> {
        self.predictions.first()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big_cats() -> ClassMapping {
        ClassMapping::from_pairs([("Panthera_onca", 0), ("Panthera_leo", 1)]).unwrap()
    }

    #[test]
    fn softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn softmax_handles_large_logits() {
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert!(p.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn softmax_empty() {
        assert!(softmax(&[]).is_empty());
    }

    #[test]
    fn ranks_two_big_cats() {
        let result =
            PredictionResult::from_logits(&[2.0, 0.5], &big_cats(), TopK::new(2).unwrap())
                .unwrap();
        let preds = result.predictions();
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[0].label.display_name(), "Panthera onca");
        assert_eq!(preds[1].label.display_name(), "Panthera leo");
        assert!(preds[0].probability > preds[1].probability);
        assert!(preds[0].probability + preds[1].probability <= 1.0 + 1e-6);
    }

    #[test]
    fn top_k_is_capped_at_class_count() {
        let result =
            PredictionResult::from_logits(&[0.1, 0.2], &big_cats(), TopK::new(50).unwrap())
                .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.top_match().unwrap().label.as_str(), "Panthera_leo");
    }

    #[test]
    fn ties_keep_index_order() {
        let result =
            PredictionResult::from_logits(&[1.0, 1.0], &big_cats(), TopK::new(2).unwrap())
                .unwrap();
        assert_eq!(result.predictions()[0].label.as_str(), "Panthera_onca");
    }

    #[test]
    fn logits_length_must_match_classes() {
        let err = PredictionResult::from_logits(&[1.0], &big_cats(), TopK::default()).unwrap_err();
        assert_eq!(err, DomainError::shape_mismatch(2, 1));
    }

    #[test]
    fn non_finite_logits_rejected() {
        let err = PredictionResult::from_logits(&[f32::NAN, 1.0], &big_cats(), TopK::default())
            .unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(_)));
    }

    #[test]
    fn percent_rounds_to_two_decimals() {
        let p = RankedPrediction {
            label: SpeciesLabel::new("x").unwrap(),
            probability: 0.817_645,
        };
        assert!((p.probability_percent() - 81.76).abs() < 1e-9);
    }
}
