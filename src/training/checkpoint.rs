//! Checkpoint files under the run directory.
//!
//! Two files are maintained: the most recent epoch snapshot, and `best.json`
//! holding the single checkpoint with the highest `val/acc/ema` seen so far.
//! Earlier epoch snapshots are pruned as training advances.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::logger::EpochMetrics;
use crate::model::SoftmaxClassifier;
use crate::utils::error::Result;

/// Serialized training snapshot
#[derive(Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    /// RFC 3339 creation time
    pub timestamp: String,
    pub metrics: EpochMetrics,
    pub model: SoftmaxClassifier,
    pub ema: SoftmaxClassifier,
}

impl Checkpoint {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let checkpoint = serde_json::from_str(&text)?;
        Ok(checkpoint)
    }
}

/// Keeps the latest epoch snapshot plus the single best model
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
    last_epoch_file: Option<PathBuf>,
}

impl CheckpointManager {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            last_epoch_file: None,
        }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn best_path(&self) -> PathBuf {
        self.checkpoint_dir.join("best.json")
    }

    /// Write the epoch snapshot, dropping the previous epoch's file, and
    /// overwrite `best.json` when `improved` is set.
    pub fn save(
        &mut self,
        model: &SoftmaxClassifier,
        ema: &SoftmaxClassifier,
        metrics: &EpochMetrics,
        improved: bool,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.checkpoint_dir)?;

        let checkpoint = Checkpoint {
            epoch: metrics.epoch,
            timestamp: Utc::now().to_rfc3339(),
            metrics: metrics.clone(),
            model: model.clone(),
            ema: ema.clone(),
        };
        let json = serde_json::to_string(&checkpoint)?;

        let epoch_path = self
            .checkpoint_dir
            .join(format!("epoch_{:03}.json", metrics.epoch));
        fs::write(&epoch_path, &json)?;

        if let Some(previous) = self.last_epoch_file.take() {
            if previous != epoch_path && previous.exists() {
                fs::remove_file(&previous)?;
            }
        }
        self.last_epoch_file = Some(epoch_path.clone());

        if improved {
            fs::write(self.best_path(), &json)?;
            info!(
                "new best checkpoint at epoch {} (val/acc/ema = {:.4})",
                metrics.epoch, metrics.val_acc_ema
            );
        } else {
            debug!("wrote {}", epoch_path.display());
        }
        Ok(epoch_path)
    }
}
