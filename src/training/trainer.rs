//! The training loop: epochs, validation, and checkpoint scheduling.
//!
//! [`Trainer`] owns everything the loop needs besides the method and the
//! data: the scheduler, the metrics logger, the checkpoint manager, and the
//! RNG that drives augmentation and shuffling. One `fit` call runs the whole
//! experiment.

use std::time::Instant;

use clap::Args;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::checkpoint::CheckpointManager;
use super::logger::{EpochMetrics, LearningRateMonitor, MetricsLogger};
use super::scheduler::LRScheduler;
use crate::dataset::SemiDataModule;
use crate::methods::MethodClassifier;
use crate::model::{argmax_rows, cross_entropy};
use crate::utils::error::Result;
use crate::utils::format_duration;
use crate::utils::metrics::{AccuracyTracker, RunningAverage};

/// Trainer construction flags, passed through from the command line
#[derive(Args, Debug, Clone)]
pub struct TrainerArgs {
    /// Number of machines participating in training
    #[arg(long = "num_nodes", default_value_t = 1)]
    pub num_nodes: usize,

    /// Accelerators per machine
    #[arg(long = "num_devices", default_value_t = 1)]
    pub num_devices: usize,

    /// Upper bound on training epochs
    #[arg(long = "max_epochs", default_value_t = 50)]
    pub max_epochs: usize,

    /// Emit a progress line every this many steps
    #[arg(long = "log_every_n_steps", default_value_t = 50)]
    pub log_every_n_steps: usize,
}

impl TrainerArgs {
    /// Total device count across all nodes, used to partition batch sizes
    pub fn device_count(&self) -> usize {
        (self.num_nodes * self.num_devices).max(1)
    }
}

impl Default for TrainerArgs {
    fn default() -> Self {
        Self {
            num_nodes: 1,
            num_devices: 1,
            max_epochs: 50,
            log_every_n_steps: 50,
        }
    }
}

/// Progress counters carried across epochs
#[derive(Debug, Clone, Default)]
pub struct TrainingState {
    pub epoch: usize,
    pub global_step: usize,
    pub samples_seen: usize,
    pub best_val_acc_ema: f64,
    pub best_epoch: Option<usize>,
}

/// What a completed `fit` call accomplished
#[derive(Debug, Clone, PartialEq)]
pub struct FitSummary {
    pub epochs_run: usize,
    pub best_val_acc_ema: f64,
    pub best_epoch: Option<usize>,
}

struct EpochAverages {
    loss: f64,
    sup_loss: f64,
    unsup_loss: f64,
    mask_ratio: f64,
}

struct ValMetrics {
    loss: f64,
    acc: f64,
    acc_ema: f64,
}

pub struct Trainer {
    args: TrainerArgs,
    logger: MetricsLogger,
    checkpoints: CheckpointManager,
    scheduler: LRScheduler,
    lr_monitor: LearningRateMonitor,
    state: TrainingState,
    rng: ChaCha8Rng,
}

impl Trainer {
    /// `seed` feeds the training-side RNG for shuffling and augmentation.
    /// It is offset from the model-init stream so the two never collide.
    pub fn from_args(
        args: TrainerArgs,
        logger: MetricsLogger,
        checkpoints: CheckpointManager,
        scheduler: LRScheduler,
        seed: u64,
    ) -> Self {
        Self {
            args,
            logger,
            checkpoints,
            scheduler,
            lr_monitor: LearningRateMonitor::new(),
            state: TrainingState::default(),
            rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
        }
    }

    pub fn args(&self) -> &TrainerArgs {
        &self.args
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn lr_history(&self) -> &[f64] {
        self.lr_monitor.history()
    }

    /// Run the full training loop: one epoch per pass of the unlabeled
    /// stream, validation after every epoch, checkpoint each epoch with
    /// `best.json` tracking the highest `val/acc/ema`.
    pub fn fit(
        &mut self,
        classifier: &mut MethodClassifier,
        data: &mut SemiDataModule,
    ) -> Result<FitSummary> {
        let started = Instant::now();
        info!(
            "training {} on {} for up to {} epochs, {} steps per epoch ({})",
            classifier.method(),
            data.name(),
            self.args.max_epochs,
            data.batches_per_epoch(),
            self.scheduler.description()
        );

        for epoch in 0..self.args.max_epochs {
            self.state.epoch = epoch;
            let lr = self.scheduler.get_lr(epoch);
            self.lr_monitor.observe(epoch, lr);

            let train = self.train_epoch(classifier, data, lr);
            let val = self.validate(classifier, data);

            let improved = val.acc_ema > self.state.best_val_acc_ema;
            if improved {
                info!(
                    "val/acc/ema improved: {:.4} -> {:.4}",
                    self.state.best_val_acc_ema, val.acc_ema
                );
                self.state.best_val_acc_ema = val.acc_ema;
                self.state.best_epoch = Some(epoch);
            }

            let row = EpochMetrics {
                epoch,
                lr,
                train_loss: train.loss,
                train_sup_loss: train.sup_loss,
                train_unsup_loss: train.unsup_loss,
                train_mask_ratio: train.mask_ratio,
                val_loss: val.loss,
                val_acc: val.acc,
                val_acc_ema: val.acc_ema,
            };
            self.logger.log_epoch(&row)?;
            self.checkpoints
                .save(classifier.model(), classifier.ema_model(), &row, improved)?;

            info!(
                "epoch {:>3}/{}: train/loss = {:.4}, mask = {:.2}, val/acc = {:.4}, val/acc/ema = {:.4}",
                epoch + 1,
                self.args.max_epochs,
                train.loss,
                train.mask_ratio,
                val.acc,
                val.acc_ema
            );
        }

        info!(
            "finished {} epochs in {}, best val/acc/ema = {:.4}",
            self.args.max_epochs,
            format_duration(started.elapsed().as_secs_f64()),
            self.state.best_val_acc_ema
        );

        Ok(FitSummary {
            epochs_run: self.args.max_epochs,
            best_val_acc_ema: self.state.best_val_acc_ema,
            best_epoch: self.state.best_epoch,
        })
    }

    fn train_epoch(
        &mut self,
        classifier: &mut MethodClassifier,
        data: &mut SemiDataModule,
        lr: f64,
    ) -> EpochAverages {
        let mut loss = RunningAverage::new();
        let mut sup_loss = RunningAverage::new();
        let mut unsup_loss = RunningAverage::new();
        let mut mask_ratio = RunningAverage::new();

        data.start_epoch();
        let mut step_in_epoch = 0;
        while let Some(batch) = data.next_train_batch(&mut self.rng) {
            let metrics = classifier.training_step(&batch, lr);
            loss.add(metrics.loss);
            sup_loss.add(metrics.sup_loss);
            unsup_loss.add(metrics.unsup_loss);
            mask_ratio.add(metrics.mask_ratio);

            self.state.global_step += 1;
            self.state.samples_seen +=
                batch.labeled.targets.len() + batch.unlabeled.indices.len();
            step_in_epoch += 1;
            if step_in_epoch % self.args.log_every_n_steps.max(1) == 0 {
                debug!(
                    "step {}: loss = {:.4}, mask = {:.2}",
                    self.state.global_step, metrics.loss, metrics.mask_ratio
                );
            }
        }

        EpochAverages {
            loss: loss.average(),
            sup_loss: sup_loss.average(),
            unsup_loss: unsup_loss.average(),
            mask_ratio: mask_ratio.average(),
        }
    }

    /// Evaluate both weight copies on the validation split
    fn validate(&self, classifier: &MethodClassifier, data: &SemiDataModule) -> ValMetrics {
        let mut loss = RunningAverage::new();
        let mut acc = AccuracyTracker::new();
        let mut acc_ema = AccuracyTracker::new();

        for batch in data.val_batches() {
            let probs = classifier.probabilities(&batch.inputs);
            for sample_loss in cross_entropy(&probs, &batch.targets) {
                loss.add(f64::from(sample_loss));
            }
            acc.add_batch(&argmax_rows(&probs), &batch.targets);

            let ema_probs = classifier.ema_probabilities(&batch.inputs);
            acc_ema.add_batch(&argmax_rows(&ema_probs), &batch.targets);
        }

        ValMetrics {
            loss: loss.average(),
            acc: acc.accuracy(),
            acc_ema: acc_ema.accuracy(),
        }
    }
}
