//! # SemiMatch
//!
//! Semi-supervised image classification on CIFAR with FixMatch and
//! FlexMatch. A small labeled pool and a large unlabeled pool are drawn
//! from the same training set; pseudo-labels predicted on weakly
//! augmented views supervise strongly augmented views of the same
//! images.
//!
//! ## Modules
//!
//! - `config`: experiment configuration loaded from JSON with CLI overrides
//! - `dataset`: CIFAR-10/100 download, parsing, and labeled/unlabeled splits
//! - `methods`: FixMatch and FlexMatch training steps
//! - `model`: softmax classifier with SGD and EMA weight averaging
//! - `training`: trainer loop, LR schedules, metrics logging, checkpoints
//! - `transforms`: weak/strong augmentation pipelines
//! - `utils`: error types, logging setup, running metrics

pub mod config;
pub mod dataset;
pub mod methods;
pub mod model;
pub mod training;
pub mod transforms;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{ConfigOverrides, ExperimentConfig};
pub use dataset::{DatasetName, SemiDataModule};
pub use methods::{Method, MethodClassifier};
pub use training::trainer::{Trainer, TrainerArgs};
pub use utils::error::{Result, SemiMatchError};

/// Side length of a CIFAR image in pixels.
pub const IMAGE_SIZE: usize = 32;

/// Flattened input dimension of one image (RGB).
pub const INPUT_DIM: usize = IMAGE_SIZE * IMAGE_SIZE * 3;

/// Version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
