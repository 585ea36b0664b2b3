//! FixMatch: pseudo-labeling with one fixed confidence threshold.

use rand::Rng;

use super::{confidence_mask, pseudo_labels, MatchCore, StepMetrics};
use crate::config::ExperimentConfig;
use crate::dataset::TrainBatch;
use crate::model::SoftmaxClassifier;

pub struct FixMatchClassifier {
    core: MatchCore,
}

impl FixMatchClassifier {
    pub fn from_config(config: &ExperimentConfig, input_dim: usize, rng: &mut impl Rng) -> Self {
        Self {
            core: MatchCore::from_config(config, input_dim, rng),
        }
    }

    /// Pseudo-label the weak views, keep those at or above the fixed
    /// threshold, and fit the strong views to them.
    pub fn training_step(&mut self, batch: &TrainBatch, lr: f64) -> StepMetrics {
        let weak_probs = self.core.model.probabilities(&batch.unlabeled.weak);
        let pseudo = pseudo_labels(&weak_probs);
        let mask = confidence_mask(&pseudo.confidences, self.core.criterion.threshold as f32);
        self.core.step_with_mask(batch, &pseudo.classes, &mask, lr)
    }

    pub fn model(&self) -> &SoftmaxClassifier {
        &self.core.model
    }

    pub fn ema_model(&self) -> &SoftmaxClassifier {
        &self.core.ema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::test_support;
    use crate::methods::Method;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_uncertain_pseudo_labels_are_all_masked_out() {
        let config = test_support::config(Method::Fixmatch);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut classifier = FixMatchClassifier::from_config(&config, 4, &mut rng);
        // uniform confidence 0.1 over ten classes, far below 0.95
        let batch = test_support::zero_batch(4, 4, 8, 10);

        let metrics = classifier.training_step(&batch, 0.1);

        assert_eq!(metrics.mask_ratio, 0.0);
        assert_eq!(metrics.unsup_loss, 0.0);
        assert!((metrics.loss - metrics.sup_loss).abs() < 1e-12);
        assert!((metrics.sup_loss - 10f64.ln()).abs() < 1e-3);
    }

    #[test]
    fn test_masked_out_batch_matches_labeled_only_update() {
        let config = test_support::config(Method::Fixmatch);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut classifier = FixMatchClassifier::from_config(&config, 4, &mut rng);
        let mut reference = classifier.model().clone();
        let batch = test_support::zero_batch(4, 4, 8, 10);

        let metrics = classifier.training_step(&batch, 0.1);
        assert_eq!(metrics.mask_ratio, 0.0);

        let weights = vec![1.0 / 4.0; 4];
        reference.sgd_step(
            &batch.labeled.inputs,
            &batch.labeled.targets,
            &weights,
            &config.optimizer,
            0.1,
        );

        let probe = Array2::from_shape_fn((3, 4), |(i, j)| (i + j) as f32 * 0.1);
        let diff = (&classifier.model().probabilities(&probe) - &reference.probabilities(&probe))
            .mapv(f32::abs)
            .fold(0.0f32, |m, &v| m.max(v));
        assert!(diff < 1e-6, "max diff {}", diff);
    }

    #[test]
    fn test_ema_trails_the_trained_model() {
        let config = test_support::config(Method::Fixmatch);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut classifier = FixMatchClassifier::from_config(&config, 4, &mut rng);
        let initial = classifier.model().clone();
        let batch = test_support::zero_batch(4, 4, 8, 10);

        for _ in 0..5 {
            classifier.training_step(&batch, 0.5);
        }

        let probe = test_support::zero_batch(4, 2, 2, 10).labeled.inputs;
        let model_probs = classifier.model().probabilities(&probe);
        let ema_probs = classifier.ema_model().probabilities(&probe);
        let init_probs = initial.probabilities(&probe);

        // the model moved, while the EMA copy stayed near initialization
        assert_ne!(model_probs, init_probs);
        let ema_drift = (&ema_probs - &init_probs).mapv(f32::abs).sum();
        let model_drift = (&model_probs - &init_probs).mapv(f32::abs).sum();
        assert!(ema_drift < model_drift);
    }
}
