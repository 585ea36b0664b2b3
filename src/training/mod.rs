//! Training orchestration
//!
//! This module provides:
//! - The epoch loop driving a method over the data module
//! - Learning rate scheduling
//! - Versioned metrics logging per run
//! - Top-1 checkpointing on `val/acc/ema`

pub mod checkpoint;
pub mod logger;
pub mod scheduler;
pub mod trainer;

// Re-export main types for convenience
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use logger::{EpochMetrics, LearningRateMonitor, MetricsLogger};
pub use scheduler::LRScheduler;
pub use trainer::{FitSummary, Trainer, TrainerArgs, TrainingState};

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 50;

/// Default confidence threshold for accepting pseudo-labels
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.95;
