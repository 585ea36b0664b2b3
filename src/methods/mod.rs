//! Consistency-regularization methods.
//!
//! Both methods follow the same loop: pseudo-label the weakly augmented view
//! of each unlabeled image, keep the confident ones, and train the model to
//! reproduce those labels on the strongly augmented view. They differ only in
//! how the confidence cutoff is chosen, so the shared plumbing lives in
//! [`MatchCore`] and each method contributes its masking rule.

mod fixmatch;
mod flexmatch;

pub use fixmatch::FixMatchClassifier;
pub use flexmatch::{CurriculumState, FlexMatchClassifier};

use std::fmt;
use std::str::FromStr;

use ndarray::{s, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{CriterionConfig, ExperimentConfig, OptimizerConfig};
use crate::dataset::TrainBatch;
use crate::model::{argmax_rows, SoftmaxClassifier};
use crate::utils::error::SemiMatchError;

/// Method selector, keyed exactly as it appears in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Fixmatch,
    Flexmatch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Fixmatch => "fixmatch",
            Method::Flexmatch => "flexmatch",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = SemiMatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixmatch" => Ok(Method::Fixmatch),
            "flexmatch" => Ok(Method::Flexmatch),
            other => Err(SemiMatchError::Config(format!(
                "unknown method '{}', expected 'fixmatch' or 'flexmatch'",
                other
            ))),
        }
    }
}

/// Scalars produced by one optimization step
#[derive(Debug, Clone, Copy)]
pub struct StepMetrics {
    /// `sup_loss + lambda_u * unsup_loss`
    pub loss: f64,
    pub sup_loss: f64,
    pub unsup_loss: f64,
    /// Fraction of the unlabeled batch that passed its threshold
    pub mask_ratio: f64,
}

/// Keep samples whose pseudo-label confidence reaches `threshold`
pub fn confidence_mask(confidences: &[f32], threshold: f32) -> Vec<bool> {
    confidences.iter().map(|&c| c >= threshold).collect()
}

/// Argmax classes and their probabilities for a batch of weak views
pub(crate) struct PseudoLabels {
    pub classes: Vec<usize>,
    pub confidences: Vec<f32>,
}

pub(crate) fn pseudo_labels(weak_probs: &Array2<f32>) -> PseudoLabels {
    let classes = argmax_rows(weak_probs);
    let confidences = classes
        .iter()
        .enumerate()
        .map(|(i, &c)| weak_probs[[i, c]])
        .collect();
    PseudoLabels { classes, confidences }
}

/// Model, EMA copy, and the combined-batch update shared by both methods
struct MatchCore {
    model: SoftmaxClassifier,
    ema: SoftmaxClassifier,
    optimizer: OptimizerConfig,
    criterion: CriterionConfig,
}

impl MatchCore {
    fn from_config(config: &ExperimentConfig, input_dim: usize, rng: &mut impl Rng) -> Self {
        let model = SoftmaxClassifier::new(
            input_dim,
            config.model.hidden_size,
            config.dataset.name.num_classes(),
            rng,
        );
        let ema = model.clone();
        Self {
            model,
            ema,
            optimizer: config.optimizer.clone(),
            criterion: config.criterion.clone(),
        }
    }

    /// One SGD step on the stacked labeled + strong-view batch.
    ///
    /// Labeled rows carry weight `1/B_l`; unlabeled rows carry
    /// `lambda_u/B_u` when masked in and zero otherwise, so the update
    /// realizes `mean(sup CE) + lambda_u * sum(masked CE)/B_u`.
    fn step_with_mask(
        &mut self,
        batch: &TrainBatch,
        pseudo: &[usize],
        mask: &[bool],
        lr: f64,
    ) -> StepMetrics {
        let bl = batch.labeled.targets.len();
        let bu = batch.unlabeled.indices.len();
        let dim = batch.labeled.inputs.ncols();

        let mut inputs = Array2::zeros((bl + bu, dim));
        inputs.slice_mut(s![..bl, ..]).assign(&batch.labeled.inputs);
        inputs.slice_mut(s![bl.., ..]).assign(&batch.unlabeled.strong);

        let mut targets = Vec::with_capacity(bl + bu);
        targets.extend_from_slice(&batch.labeled.targets);
        targets.extend_from_slice(pseudo);

        let lambda_u = self.criterion.lambda_u as f32;
        let labeled_weight = 1.0 / bl.max(1) as f32;
        let unsup_norm = 1.0 / bu.max(1) as f32;
        let mut weights = vec![labeled_weight; bl];
        weights.extend(
            mask.iter()
                .map(|&m| if m { lambda_u * unsup_norm } else { 0.0 }),
        );

        let losses = self
            .model
            .sgd_step(&inputs, &targets, &weights, &self.optimizer, lr);
        self.ema
            .ema_update_from(&self.model, self.criterion.ema_decay as f32);

        let sup_loss = f64::from(losses[..bl].iter().sum::<f32>() / bl.max(1) as f32);
        let masked_sum: f32 = mask
            .iter()
            .zip(&losses[bl..])
            .filter_map(|(&m, &l)| m.then_some(l))
            .sum();
        let unsup_loss = f64::from(masked_sum / bu.max(1) as f32);
        let masked = mask.iter().filter(|&&m| m).count();

        StepMetrics {
            loss: sup_loss + self.criterion.lambda_u * unsup_loss,
            sup_loss,
            unsup_loss,
            mask_ratio: masked as f64 / bu.max(1) as f64,
        }
    }
}

/// A constructed method, dispatched over the config's `method` key
pub enum MethodClassifier {
    FixMatch(FixMatchClassifier),
    FlexMatch(FlexMatchClassifier),
}

impl MethodClassifier {
    /// Build the method the config selects.
    ///
    /// `num_unlabeled` sizes FlexMatch's per-sample curriculum state and is
    /// ignored by FixMatch.
    pub fn from_config(
        config: &ExperimentConfig,
        input_dim: usize,
        num_unlabeled: usize,
        rng: &mut impl Rng,
    ) -> Self {
        match config.method {
            Method::Fixmatch => {
                MethodClassifier::FixMatch(FixMatchClassifier::from_config(config, input_dim, rng))
            }
            Method::Flexmatch => MethodClassifier::FlexMatch(FlexMatchClassifier::from_config(
                config,
                input_dim,
                num_unlabeled,
                rng,
            )),
        }
    }

    pub fn method(&self) -> Method {
        match self {
            MethodClassifier::FixMatch(_) => Method::Fixmatch,
            MethodClassifier::FlexMatch(_) => Method::Flexmatch,
        }
    }

    pub fn training_step(&mut self, batch: &TrainBatch, lr: f64) -> StepMetrics {
        match self {
            MethodClassifier::FixMatch(m) => m.training_step(batch, lr),
            MethodClassifier::FlexMatch(m) => m.training_step(batch, lr),
        }
    }

    pub fn probabilities(&self, inputs: &Array2<f32>) -> Array2<f32> {
        self.model().probabilities(inputs)
    }

    /// Probabilities under the EMA weight copy
    pub fn ema_probabilities(&self, inputs: &Array2<f32>) -> Array2<f32> {
        self.ema_model().probabilities(inputs)
    }

    pub fn model(&self) -> &SoftmaxClassifier {
        match self {
            MethodClassifier::FixMatch(m) => m.model(),
            MethodClassifier::FlexMatch(m) => m.model(),
        }
    }

    pub fn ema_model(&self) -> &SoftmaxClassifier {
        match self {
            MethodClassifier::FixMatch(m) => m.ema_model(),
            MethodClassifier::FlexMatch(m) => m.ema_model(),
        }
    }
}
