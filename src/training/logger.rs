//! Versioned run directories and per-epoch metrics logging.
//!
//! Every run gets a fresh `<root>/<dataset>/version_<k>/` directory holding
//! the effective config, a `metrics.csv`, and the checkpoint subdirectory.
//! Versions only ever count up; an existing run is never overwritten.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ExperimentConfig;
use crate::utils::error::Result;

/// One row of `metrics.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub lr: f64,
    pub train_loss: f64,
    pub train_sup_loss: f64,
    pub train_unsup_loss: f64,
    pub train_mask_ratio: f64,
    pub val_loss: f64,
    pub val_acc: f64,
    pub val_acc_ema: f64,
}

const CSV_HEADER: &str =
    "epoch,lr,train/loss,train/loss/sup,train/loss/unsup,train/mask_ratio,val/loss,val/acc,val/acc/ema";

/// Writes experiment artifacts into an auto-versioned run directory
pub struct MetricsLogger {
    run_dir: PathBuf,
    version: usize,
    metrics_path: PathBuf,
    header_written: bool,
}

impl MetricsLogger {
    /// Create `<root>/<name>/version_<k>` with the first unused `k`.
    pub fn new(root: impl AsRef<Path>, name: &str) -> Result<Self> {
        let base = root.as_ref().join(name);
        fs::create_dir_all(&base)?;
        let version = next_version(&base)?;
        let run_dir = base.join(format!("version_{}", version));
        fs::create_dir_all(&run_dir)?;
        info!("logging run artifacts to {}", run_dir.display());

        let metrics_path = run_dir.join("metrics.csv");
        Ok(Self {
            run_dir,
            version,
            metrics_path,
            header_written: false,
        })
    }

    pub fn version(&self) -> usize {
        self.version
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.run_dir.join("checkpoints")
    }

    /// Record the effective config next to the metrics
    pub fn save_config(&self, config: &ExperimentConfig) -> Result<()> {
        config.save(self.run_dir.join("config.json"))
    }

    /// Append one epoch row, writing the header first on initial use
    pub fn log_epoch(&mut self, metrics: &EpochMetrics) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.metrics_path)?;
        if !self.header_written {
            writeln!(file, "{}", CSV_HEADER)?;
            self.header_written = true;
        }
        writeln!(
            file,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            metrics.epoch,
            metrics.lr,
            metrics.train_loss,
            metrics.train_sup_loss,
            metrics.train_unsup_loss,
            metrics.train_mask_ratio,
            metrics.val_loss,
            metrics.val_acc,
            metrics.val_acc_ema,
        )?;
        Ok(())
    }
}

fn next_version(base: &Path) -> Result<usize> {
    let mut next = 0;
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if let Some(rest) = name.strip_prefix("version_") {
            if let Ok(v) = rest.parse::<usize>() {
                next = next.max(v + 1);
            }
        }
    }
    Ok(next)
}

/// Records the learning rate the scheduler produced for each epoch
#[derive(Debug, Clone, Default)]
pub struct LearningRateMonitor {
    history: Vec<f64>,
}

impl LearningRateMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, epoch: usize, lr: f64) {
        debug!("epoch {}: lr = {:.6}", epoch, lr);
        self.history.push(lr);
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn last(&self) -> Option<f64> {
        self.history.last().copied()
    }
}
