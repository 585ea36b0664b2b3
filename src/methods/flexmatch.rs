//! FlexMatch: curriculum pseudo-labeling with per-class dynamic thresholds.
//!
//! The fixed FixMatch threshold penalizes classes the model learns slowly.
//! FlexMatch tracks which unlabeled samples have ever been confidently
//! selected, derives a per-class learning status from those counts, and
//! scales the threshold down for poorly learned classes. Selection itself
//! always uses the fixed base threshold; only the masking rule flexes.

use rand::Rng;

use super::{pseudo_labels, MatchCore, StepMetrics};
use crate::config::ExperimentConfig;
use crate::dataset::TrainBatch;
use crate::model::SoftmaxClassifier;

/// Per-sample selection state driving the dynamic thresholds
pub struct CurriculumState {
    /// Most recent confidently selected class per unlabeled sample,
    /// -1 for samples never selected
    selected: Vec<i64>,
    num_classes: usize,
    /// Include never-selected samples in the status denominator
    warmup: bool,
}

impl CurriculumState {
    pub fn new(num_unlabeled: usize, num_classes: usize, warmup: bool) -> Self {
        Self {
            selected: vec![-1; num_unlabeled],
            num_classes,
            warmup,
        }
    }

    /// Record that `index` passed the fixed threshold with `class`
    pub fn record(&mut self, index: usize, class: usize) {
        debug_assert!(class < self.num_classes);
        if let Some(slot) = self.selected.get_mut(index) {
            *slot = class as i64;
        }
    }

    pub fn num_selected(&self) -> usize {
        self.selected.iter().filter(|&&s| s >= 0).count()
    }

    /// Per-class learning status `beta`, the selection count normalized by
    /// the best-learned class. During warmup the denominator also counts
    /// never-selected samples, which keeps thresholds low early on.
    pub fn learning_status(&self) -> Vec<f32> {
        let mut counts = vec![0usize; self.num_classes];
        let mut unselected = 0usize;
        for &s in &self.selected {
            if s >= 0 {
                counts[s as usize] += 1;
            } else {
                unselected += 1;
            }
        }
        let mut denominator = counts.iter().copied().max().unwrap_or(0);
        if self.warmup {
            denominator = denominator.max(unselected);
        }
        if denominator == 0 {
            return vec![0.0; self.num_classes];
        }
        counts
            .iter()
            .map(|&c| c as f32 / denominator as f32)
            .collect()
    }

    /// Dynamic thresholds `base * beta / (2 - beta)` per class.
    /// The convex mapping keeps thresholds low until a class is
    /// substantially learned.
    pub fn thresholds(&self, base: f32) -> Vec<f32> {
        self.learning_status()
            .iter()
            .map(|&beta| base * beta / (2.0 - beta))
            .collect()
    }
}

pub struct FlexMatchClassifier {
    core: MatchCore,
    state: CurriculumState,
}

impl FlexMatchClassifier {
    pub fn from_config(
        config: &ExperimentConfig,
        input_dim: usize,
        num_unlabeled: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let core = MatchCore::from_config(config, input_dim, rng);
        let state = CurriculumState::new(
            num_unlabeled,
            config.dataset.name.num_classes(),
            config.criterion.threshold_warmup,
        );
        Self { core, state }
    }

    /// Mask against the current per-class thresholds, then update the
    /// selection state with the fixed base threshold.
    pub fn training_step(&mut self, batch: &TrainBatch, lr: f64) -> StepMetrics {
        let base = self.core.criterion.threshold as f32;
        let weak_probs = self.core.model.probabilities(&batch.unlabeled.weak);
        let pseudo = pseudo_labels(&weak_probs);

        let thresholds = self.state.thresholds(base);
        let mask: Vec<bool> = pseudo
            .classes
            .iter()
            .zip(&pseudo.confidences)
            .map(|(&class, &conf)| conf >= thresholds[class])
            .collect();

        for ((&index, &class), &conf) in batch
            .unlabeled
            .indices
            .iter()
            .zip(&pseudo.classes)
            .zip(&pseudo.confidences)
        {
            if conf >= base {
                self.state.record(index, class);
            }
        }

        self.core.step_with_mask(batch, &pseudo.classes, &mask, lr)
    }

    pub fn curriculum(&self) -> &CurriculumState {
        &self.state
    }

    pub fn model(&self) -> &SoftmaxClassifier {
        &self.core.model
    }

    pub fn ema_model(&self) -> &SoftmaxClassifier {
        &self.core.ema
    }
}
