//! Learning rate schedules.
//!
//! The schedule is part of the optimizer section of the experiment config
//! and is evaluated once per epoch.

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SemiMatchError};

/// Epoch-level learning rate schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LRScheduler {
    /// Constant learning rate (no scheduling)
    Constant { lr: f64 },

    /// Multiply by `decay_factor` at each listed epoch
    StepDecay {
        initial_lr: f64,
        decay_factor: f64,
        step_epochs: Vec<usize>,
    },

    /// Smooth decay following a half cosine wave
    CosineAnnealing {
        initial_lr: f64,
        min_lr: f64,
        total_epochs: usize,
    },

    /// Linear warmup followed by cosine annealing
    WarmupCosine {
        initial_lr: f64,
        min_lr: f64,
        warmup_epochs: usize,
        total_epochs: usize,
    },
}

impl LRScheduler {
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    pub fn step_decay(initial_lr: f64, decay_factor: f64, step_epochs: Vec<usize>) -> Self {
        Self::StepDecay {
            initial_lr,
            decay_factor,
            step_epochs,
        }
    }

    pub fn cosine_annealing(initial_lr: f64, min_lr: f64, total_epochs: usize) -> Self {
        Self::CosineAnnealing {
            initial_lr,
            min_lr,
            total_epochs,
        }
    }

    pub fn warmup_cosine(
        initial_lr: f64,
        min_lr: f64,
        warmup_epochs: usize,
        total_epochs: usize,
    ) -> Self {
        Self::WarmupCosine {
            initial_lr,
            min_lr,
            warmup_epochs,
            total_epochs,
        }
    }

    /// Get the learning rate for a given epoch
    pub fn get_lr(&self, epoch: usize) -> f64 {
        match self {
            Self::Constant { lr } => *lr,

            Self::StepDecay {
                initial_lr,
                decay_factor,
                step_epochs,
            } => {
                let mut lr = *initial_lr;
                for &step_epoch in step_epochs {
                    if epoch >= step_epoch {
                        lr *= decay_factor;
                    }
                }
                lr
            }

            Self::CosineAnnealing {
                initial_lr,
                min_lr,
                total_epochs,
            } => {
                let progress = (epoch as f64) / (*total_epochs as f64);
                let cosine_factor = (1.0 + (std::f64::consts::PI * progress).cos()) / 2.0;
                min_lr + (initial_lr - min_lr) * cosine_factor
            }

            Self::WarmupCosine {
                initial_lr,
                min_lr,
                warmup_epochs,
                total_epochs,
            } => {
                if epoch < *warmup_epochs {
                    let progress = (epoch as f64 + 1.0) / (*warmup_epochs as f64);
                    initial_lr * progress
                } else {
                    let remaining_epochs = total_epochs - warmup_epochs;
                    let progress = (epoch - warmup_epochs) as f64 / remaining_epochs as f64;
                    let cosine_factor = (1.0 + (std::f64::consts::PI * progress).cos()) / 2.0;
                    min_lr + (initial_lr - min_lr) * cosine_factor
                }
            }
        }
    }

    /// Reject parameter combinations that would produce zero or undefined
    /// learning rates.
    pub fn validate(&self) -> Result<()> {
        let check_positive = |value: f64, key: &str| {
            if value > 0.0 {
                Ok(())
            } else {
                Err(SemiMatchError::Config(format!(
                    "scheduler: {} must be positive, got {}",
                    key, value
                )))
            }
        };
        match self {
            Self::Constant { lr } => check_positive(*lr, "lr"),
            Self::StepDecay {
                initial_lr,
                decay_factor,
                ..
            } => {
                check_positive(*initial_lr, "initial_lr")?;
                if !(0.0..=1.0).contains(decay_factor) || *decay_factor == 0.0 {
                    return Err(SemiMatchError::Config(format!(
                        "scheduler: decay_factor {} must be in (0, 1]",
                        decay_factor
                    )));
                }
                Ok(())
            }
            Self::CosineAnnealing {
                initial_lr,
                min_lr,
                total_epochs,
            } => {
                check_positive(*initial_lr, "initial_lr")?;
                if *min_lr < 0.0 || min_lr > initial_lr {
                    return Err(SemiMatchError::Config(format!(
                        "scheduler: min_lr {} must be in [0, initial_lr]",
                        min_lr
                    )));
                }
                if *total_epochs == 0 {
                    return Err(SemiMatchError::Config(
                        "scheduler: total_epochs must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            Self::WarmupCosine {
                initial_lr,
                min_lr,
                warmup_epochs,
                total_epochs,
            } => {
                check_positive(*initial_lr, "initial_lr")?;
                if *min_lr < 0.0 || min_lr > initial_lr {
                    return Err(SemiMatchError::Config(format!(
                        "scheduler: min_lr {} must be in [0, initial_lr]",
                        min_lr
                    )));
                }
                if warmup_epochs >= total_epochs {
                    return Err(SemiMatchError::Config(format!(
                        "scheduler: warmup_epochs {} must be below total_epochs {}",
                        warmup_epochs, total_epochs
                    )));
                }
                Ok(())
            }
        }
    }

    /// Short description for the startup log
    pub fn description(&self) -> String {
        match self {
            Self::Constant { lr } => format!("constant lr {:.6}", lr),
            Self::StepDecay {
                initial_lr,
                decay_factor,
                step_epochs,
            } => format!(
                "step decay: initial {:.6}, factor {}, steps {:?}",
                initial_lr, decay_factor, step_epochs
            ),
            Self::CosineAnnealing {
                initial_lr,
                min_lr,
                total_epochs,
            } => format!(
                "cosine annealing: initial {:.6}, min {:.6}, epochs {}",
                initial_lr, min_lr, total_epochs
            ),
            Self::WarmupCosine {
                initial_lr,
                warmup_epochs,
                total_epochs,
                ..
            } => format!(
                "warmup + cosine: initial {:.6}, warmup {}, total {}",
                initial_lr, warmup_epochs, total_epochs
            ),
        }
    }
}

impl Default for LRScheduler {
    fn default() -> Self {
        Self::CosineAnnealing {
            initial_lr: 0.03,
            min_lr: 1e-4,
            total_epochs: 50,
        }
    }
}
