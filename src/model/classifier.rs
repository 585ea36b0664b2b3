//! Two-layer ReLU network with a softmax head.
//!
//! Small enough to train on CPU yet enough capacity to show the
//! labeled/unlabeled dynamics of the matching methods. Forward math and the
//! SGD step are hand-written on `ndarray`; the backward pass folds the
//! per-sample loss weights into the logit gradients, so supervised and
//! masked unsupervised terms share one update.

use ndarray::{Array, Array1, Array2, Axis, Dimension};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::OptimizerConfig;

/// Floor applied before `ln` so empty probability mass stays finite
const PROB_FLOOR: f32 = 1e-12;

/// Momentum buffers, one per parameter
#[derive(Debug, Clone)]
struct Velocity {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
}

impl Velocity {
    fn zeros(w1: (usize, usize), b1: usize, w2: (usize, usize), b2: usize) -> Self {
        Self {
            w1: Array2::zeros(w1),
            b1: Array1::zeros(b1),
            w2: Array2::zeros(w2),
            b2: Array1::zeros(b2),
        }
    }
}

/// The classifier backbone shared by both matching methods
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftmaxClassifier {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
    #[serde(skip)]
    velocity: Option<Velocity>,
}

impl SoftmaxClassifier {
    /// He-uniform initialization
    pub fn new(input_dim: usize, hidden_size: usize, num_classes: usize, rng: &mut impl Rng) -> Self {
        let limit1 = (6.0 / input_dim as f32).sqrt();
        let limit2 = (6.0 / hidden_size as f32).sqrt();
        Self {
            w1: Array2::from_shape_fn((input_dim, hidden_size), |_| rng.gen_range(-limit1..limit1)),
            b1: Array1::zeros(hidden_size),
            w2: Array2::from_shape_fn((hidden_size, num_classes), |_| {
                rng.gen_range(-limit2..limit2)
            }),
            b2: Array1::zeros(num_classes),
            velocity: None,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.w1.nrows()
    }

    pub fn hidden_size(&self) -> usize {
        self.w1.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.w2.ncols()
    }

    pub fn num_parameters(&self) -> usize {
        self.w1.len() + self.b1.len() + self.w2.len() + self.b2.len()
    }

    fn hidden(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut h = x.dot(&self.w1) + &self.b1;
        h.mapv_inplace(|v| v.max(0.0));
        h
    }

    pub fn logits(&self, x: &Array2<f32>) -> Array2<f32> {
        self.hidden(x).dot(&self.w2) + &self.b2
    }

    /// Row-wise softmax of the logits
    pub fn probabilities(&self, x: &Array2<f32>) -> Array2<f32> {
        softmax(self.logits(x))
    }

    /// One SGD step on a combined batch.
    ///
    /// `sample_weights[i]` multiplies sample `i`'s gradient. The caller bakes
    /// batch normalization and the unlabeled loss weight into these, so a
    /// masked-out sample simply carries weight zero. Returns the unweighted
    /// per-sample cross-entropy against `targets`.
    pub fn sgd_step(
        &mut self,
        x: &Array2<f32>,
        targets: &[usize],
        sample_weights: &[f32],
        optimizer: &OptimizerConfig,
        lr: f64,
    ) -> Vec<f32> {
        debug_assert_eq!(x.nrows(), targets.len());
        debug_assert_eq!(x.nrows(), sample_weights.len());

        let h = self.hidden(x);
        let probs = softmax(h.dot(&self.w2) + &self.b2);
        let losses = cross_entropy(&probs, targets);

        // dL/dlogits for weighted CE: (p - onehot) * weight
        let mut dlogits = probs;
        for (i, (&target, &weight)) in targets.iter().zip(sample_weights).enumerate() {
            dlogits[[i, target]] -= 1.0;
            let mut row = dlogits.row_mut(i);
            row *= weight;
        }

        let weight_decay = optimizer.weight_decay as f32;
        let grad_w2 = h.t().dot(&dlogits) + &(&self.w2 * weight_decay);
        let grad_b2 = dlogits.sum_axis(Axis(0));

        let mut dh = dlogits.dot(&self.w2.t());
        dh.zip_mut_with(&h, |d, &hv| {
            if hv <= 0.0 {
                *d = 0.0;
            }
        });
        let grad_w1 = x.t().dot(&dh) + &(&self.w1 * weight_decay);
        let grad_b1 = dh.sum_axis(Axis(0));

        let mut velocity = match self.velocity.take() {
            Some(v) => v,
            None => Velocity::zeros(
                self.w1.dim(),
                self.b1.len(),
                self.w2.dim(),
                self.b2.len(),
            ),
        };

        let momentum = optimizer.momentum as f32;
        let nesterov = optimizer.nesterov;
        let lr = lr as f32;
        step_param(&mut self.w1, &mut velocity.w1, &grad_w1, momentum, nesterov, lr);
        step_param(&mut self.b1, &mut velocity.b1, &grad_b1, momentum, nesterov, lr);
        step_param(&mut self.w2, &mut velocity.w2, &grad_w2, momentum, nesterov, lr);
        step_param(&mut self.b2, &mut velocity.b2, &grad_b2, momentum, nesterov, lr);
        self.velocity = Some(velocity);

        losses
    }

    /// Pull this copy toward `source`: `w = decay * w + (1 - decay) * w_src`
    pub fn ema_update_from(&mut self, source: &SoftmaxClassifier, decay: f32) {
        ema_param(&mut self.w1, &source.w1, decay);
        ema_param(&mut self.b1, &source.b1, decay);
        ema_param(&mut self.w2, &source.w2, decay);
        ema_param(&mut self.b2, &source.b2, decay);
    }
}

fn step_param<D: Dimension>(
    param: &mut Array<f32, D>,
    velocity: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    momentum: f32,
    nesterov: bool,
    lr: f32,
) {
    *velocity = &*velocity * momentum + grad;
    let direction = if nesterov {
        grad + &(&*velocity * momentum)
    } else {
        velocity.clone()
    };
    *param -= &(direction * lr);
}

fn ema_param<D: Dimension>(target: &mut Array<f32, D>, source: &Array<f32, D>, decay: f32) {
    target.zip_mut_with(source, |t, &s| *t = decay * *t + (1.0 - decay) * s);
}

/// Numerically stable row-wise softmax
pub fn softmax(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    logits
}

/// Unweighted per-sample cross-entropy against integer targets
pub fn cross_entropy(probs: &Array2<f32>, targets: &[usize]) -> Vec<f32> {
    targets
        .iter()
        .enumerate()
        .map(|(i, &t)| -probs[[i, t]].max(PROB_FLOOR).ln())
        .collect()
}

/// Highest-probability class per row
pub fn argmax_rows(probs: &Array2<f32>) -> Vec<usize> {
    probs
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                    if v > bv {
                        (i, v)
                    } else {
                        (bi, bv)
                    }
                })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn plain_sgd() -> OptimizerConfig {
        OptimizerConfig {
            momentum: 0.9,
            weight_decay: 0.0,
            nesterov: true,
            ..OptimizerConfig::default()
        }
    }

    fn toy_problem() -> (Array2<f32>, Vec<usize>) {
        // two linearly separable classes in four dimensions
        let x = array![
            [1.0, 0.1, 0.0, 0.0],
            [0.9, 0.0, 0.1, 0.0],
            [1.1, 0.2, 0.0, 0.1],
            [0.0, 0.1, 1.0, 0.9],
            [0.1, 0.0, 0.9, 1.0],
            [0.0, 0.2, 1.1, 0.8],
        ];
        let targets = vec![0, 0, 0, 1, 1, 1];
        (x, targets)
    }

    #[test]
    fn test_parameter_shapes() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let model = SoftmaxClassifier::new(4, 8, 3, &mut rng);

        assert_eq!(model.input_dim(), 4);
        assert_eq!(model.hidden_size(), 8);
        assert_eq!(model.num_classes(), 3);
        assert_eq!(model.num_parameters(), 4 * 8 + 8 + 8 * 3 + 3);

        let x = Array2::zeros((2, 4));
        assert_eq!(model.logits(&x).dim(), (2, 3));
    }

    #[test]
    fn test_probabilities_are_normalized() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let model = SoftmaxClassifier::new(4, 8, 5, &mut rng);
        let (x, _) = toy_problem();

        let probs = model.probabilities(&x);
        for row in probs.axis_iter(Axis(0)) {
            let sum: f32 = row.sum();
            assert!((sum - 1.0).abs() < 1e-5, "row sum {}", sum);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut model = SoftmaxClassifier::new(4, 16, 2, &mut rng);
        let (x, targets) = toy_problem();
        let weights = vec![1.0 / targets.len() as f32; targets.len()];
        let optimizer = plain_sgd();

        let initial: f32 = model
            .sgd_step(&x, &targets, &weights, &optimizer, 0.1)
            .iter()
            .sum();
        let mut last = initial;
        for _ in 0..60 {
            last = model
                .sgd_step(&x, &targets, &weights, &optimizer, 0.1)
                .iter()
                .sum();
        }
        assert!(
            last < initial * 0.5,
            "loss did not drop: {} -> {}",
            initial,
            last
        );
    }

    #[test]
    fn test_zero_weights_leave_parameters_unchanged() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut model = SoftmaxClassifier::new(4, 8, 2, &mut rng);
        let before = model.clone();
        let (x, targets) = toy_problem();
        let weights = vec![0.0; targets.len()];

        model.sgd_step(&x, &targets, &weights, &plain_sgd(), 0.1);

        assert_eq!(model.probabilities(&x), before.probabilities(&x));
    }

    #[test]
    fn test_ema_with_zero_decay_copies_source() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let source = SoftmaxClassifier::new(4, 8, 2, &mut rng);
        let mut target = SoftmaxClassifier::new(4, 8, 2, &mut rng);

        target.ema_update_from(&source, 0.0);

        let (x, _) = toy_problem();
        assert_eq!(target.probabilities(&x), source.probabilities(&x));
    }

    #[test]
    fn test_ema_moves_toward_source() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let source = SoftmaxClassifier::new(4, 8, 2, &mut rng);
        let mut target = SoftmaxClassifier::new(4, 8, 2, &mut rng);
        let start = target.clone();

        target.ema_update_from(&source, 0.5);

        // halfway between start and source on every weight
        let diff_start = (&target.w1 - &start.w1).mapv(f32::abs).sum();
        let diff_source = (&target.w1 - &source.w1).mapv(f32::abs).sum();
        assert!((diff_start - diff_source).abs() < 1e-3);
    }

    #[test]
    fn test_cross_entropy_known_value() {
        let probs = array![[0.5, 0.5], [0.25, 0.75]];
        let losses = cross_entropy(&probs, &[0, 1]);
        assert!((losses[0] - 0.5f32.recip().ln()).abs() < 1e-6);
        assert!((losses[1] - 0.75f32.ln().abs()).abs() < 1e-6);
    }

    #[test]
    fn test_argmax_rows() {
        let probs = array![[0.1, 0.7, 0.2], [0.6, 0.3, 0.1]];
        assert_eq!(argmax_rows(&probs), vec![1, 0]);
    }

    #[test]
    fn test_serde_round_trip_preserves_outputs() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let model = SoftmaxClassifier::new(4, 8, 3, &mut rng);
        let json = serde_json::to_string(&model).unwrap();
        let restored: SoftmaxClassifier = serde_json::from_str(&json).unwrap();

        let (x, _) = toy_problem();
        assert_eq!(model.probabilities(&x), restored.probabilities(&x));
    }
}
