//! Experiment configuration.
//!
//! The CLI loads one JSON file into [`ExperimentConfig`], overlays the three
//! supported CLI overrides, validates, and then hands the config out by
//! reference to the trainer, data module, and method constructors. Unknown
//! `method` or `dataset.name` values are rejected at parse time.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dataset::DatasetName;
use crate::methods::Method;
use crate::training::scheduler::LRScheduler;
use crate::transforms::{Compose, TransformOp};
use crate::utils::error::{Result, SemiMatchError};

/// Top-level experiment configuration loaded from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Seed for model init and training-side shuffles
    pub random_seed: u64,
    pub dataset: DatasetConfig,
    pub transform: TransformConfig,
    pub method: Method,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub criterion: CriterionConfig,
}

/// Dataset selection and loader sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: DatasetName,
    /// Total size of the labeled subset, spread evenly over classes
    pub num_labeled: usize,
    /// Seed for the labeled-subset draw and loader shuffles
    pub random_seed: u64,
    pub batch_sizes: BatchSizes,
}

/// Global batch-size targets before device partitioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSizes {
    pub labeled: usize,
    pub unlabeled: usize,
    pub val: usize,
}

impl BatchSizes {
    /// Per-device shares for `devices` parallel workers.
    ///
    /// Labeled and unlabeled targets floor-divide by the device count; the
    /// validation size passes through unpartitioned. A non-divisible target
    /// drops the remainder each step, which is logged but not an error.
    pub fn partition(&self, devices: usize) -> BatchSizes {
        let devices = devices.max(1);
        for (key, size) in [("labeled", self.labeled), ("unlabeled", self.unlabeled)] {
            if size % devices != 0 {
                warn!(
                    "{} batch size {} is not divisible by {} devices; \
                     {} samples dropped per step",
                    key,
                    size,
                    devices,
                    size % devices
                );
            }
        }
        BatchSizes {
            labeled: self.labeled / devices,
            unlabeled: self.unlabeled / devices,
            val: self.val,
        }
    }
}

/// The three augmentation pipelines, keyed as in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub weak: Compose,
    #[serde(rename = "str")]
    pub strong: Compose,
    pub val: Compose,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            weak: Compose::cifar_weak(),
            strong: Compose::cifar_strong(),
            val: Compose::cifar_eval(),
        }
    }
}

/// Classifier backbone settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub hidden_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { hidden_size: 256 }
    }
}

/// SGD settings and the learning-rate schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub momentum: f64,
    pub weight_decay: f64,
    pub nesterov: bool,
    #[serde(default)]
    pub scheduler: LRScheduler,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            momentum: 0.9,
            weight_decay: 5e-4,
            nesterov: true,
            scheduler: LRScheduler::default(),
        }
    }
}

/// Semi-supervised loss settings shared by both methods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionConfig {
    /// Confidence threshold for accepting a pseudo-label
    pub threshold: f64,
    /// Weight of the unlabeled consistency loss
    pub lambda_u: f64,
    /// Decay of the EMA weight copy evaluated as `val/acc/ema`
    pub ema_decay: f64,
    /// FlexMatch only: include unselected samples in the status denominator
    pub threshold_warmup: bool,
}

impl Default for CriterionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            lambda_u: 1.0,
            ema_decay: 0.999,
            threshold_warmup: true,
        }
    }
}

/// The CLI override surface: exactly three nested config keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub num_labeled: Option<usize>,
    pub dataset_random_seed: Option<u64>,
    pub random_seed: Option<u64>,
}

impl ExperimentConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Save to a JSON file (pretty-printed)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Overlay CLI overrides in place.
    ///
    /// Overwrites exactly `dataset.num_labeled`, `dataset.random_seed`, and
    /// `random_seed`, each only when the flag was supplied. Every other
    /// value keeps what the file loaded.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.num_labeled {
            self.dataset.num_labeled = v;
        }
        if let Some(v) = overrides.dataset_random_seed {
            self.dataset.random_seed = v;
        }
        if let Some(v) = overrides.random_seed {
            self.random_seed = v;
        }
    }

    /// Check value ranges before any component construction.
    pub fn validate(&self) -> Result<()> {
        let classes = self.dataset.name.num_classes();
        if self.dataset.num_labeled == 0 {
            return Err(SemiMatchError::Config(
                "dataset.num_labeled must be positive".to_string(),
            ));
        }
        if self.dataset.num_labeled % classes != 0 {
            return Err(SemiMatchError::Config(format!(
                "dataset.num_labeled {} is not a multiple of the {} classes of {}",
                self.dataset.num_labeled, classes, self.dataset.name
            )));
        }
        let sizes = &self.dataset.batch_sizes;
        if sizes.labeled == 0 || sizes.unlabeled == 0 || sizes.val == 0 {
            return Err(SemiMatchError::Config(
                "dataset.batch_sizes entries must be positive".to_string(),
            ));
        }
        if self.model.hidden_size == 0 {
            return Err(SemiMatchError::Config(
                "model.hidden_size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.optimizer.momentum) {
            return Err(SemiMatchError::Config(format!(
                "optimizer.momentum {} must be in [0, 1)",
                self.optimizer.momentum
            )));
        }
        if self.optimizer.weight_decay < 0.0 {
            return Err(SemiMatchError::Config(
                "optimizer.weight_decay must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.criterion.threshold) {
            return Err(SemiMatchError::Config(format!(
                "criterion.threshold {} must be in [0, 1]",
                self.criterion.threshold
            )));
        }
        if self.criterion.lambda_u < 0.0 {
            return Err(SemiMatchError::Config(
                "criterion.lambda_u must be non-negative".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.criterion.ema_decay) {
            return Err(SemiMatchError::Config(format!(
                "criterion.ema_decay {} must be in [0, 1)",
                self.criterion.ema_decay
            )));
        }
        for (label, pipeline) in [
            ("weak", &self.transform.weak),
            ("str", &self.transform.strong),
            ("val", &self.transform.val),
        ] {
            validate_pipeline(label, pipeline.ops())?;
        }
        self.optimizer.scheduler.validate()?;
        Ok(())
    }
}

fn validate_pipeline(label: &str, ops: &[TransformOp]) -> Result<()> {
    for op in ops {
        match op {
            TransformOp::RandomHorizontalFlip { p } => {
                if !(0.0..=1.0).contains(p) {
                    return Err(SemiMatchError::Config(format!(
                        "transform.{}: flip probability {} must be in [0, 1]",
                        label, p
                    )));
                }
            }
            TransformOp::RandomCrop { size, .. } => {
                if *size == 0 {
                    return Err(SemiMatchError::Config(format!(
                        "transform.{}: crop size must be positive",
                        label
                    )));
                }
            }
            TransformOp::Normalize { std, .. } => {
                if std.iter().any(|s| *s <= 0.0) {
                    return Err(SemiMatchError::Config(format!(
                        "transform.{}: normalize std must be positive",
                        label
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn sample_json() -> String {
        r#"{
            "random_seed": 1,
            "dataset": {
                "name": "CIFAR10",
                "num_labeled": 40,
                "random_seed": 1,
                "batch_sizes": { "labeled": 64, "unlabeled": 448, "val": 64 }
            },
            "transform": {
                "weak": [
                    {"name": "RandomHorizontalFlip"},
                    {"name": "RandomCrop", "size": 32, "padding": 4},
                    {"name": "ToTensor"},
                    {"name": "Normalize", "mean": [0.4914, 0.4822, 0.4465],
                     "std": [0.2470, 0.2435, 0.2616]}
                ],
                "str": [
                    {"name": "RandomHorizontalFlip"},
                    {"name": "RandomCrop", "size": 32, "padding": 4},
                    {"name": "RandAugment", "n": 2, "m": 10},
                    {"name": "Cutout", "size": 16},
                    {"name": "ToTensor"},
                    {"name": "Normalize", "mean": [0.4914, 0.4822, 0.4465],
                     "std": [0.2470, 0.2435, 0.2616]}
                ],
                "val": [
                    {"name": "ToTensor"},
                    {"name": "Normalize", "mean": [0.4914, 0.4822, 0.4465],
                     "std": [0.2470, 0.2435, 0.2616]}
                ]
            },
            "method": "fixmatch"
        }"#
        .to_string()
    }

    pub(super) fn sample_config() -> ExperimentConfig {
        serde_json::from_str(&sample_json()).unwrap()
    }

    #[test]
    fn test_parse_sample_config() {
        let config = sample_config();
        assert_eq!(config.random_seed, 1);
        assert_eq!(config.dataset.name, DatasetName::Cifar10);
        assert_eq!(config.dataset.num_labeled, 40);
        assert_eq!(config.dataset.batch_sizes.labeled, 64);
        assert_eq!(config.method, Method::Fixmatch);
        // Expanded sections fall back to defaults when absent.
        assert_eq!(config.model.hidden_size, 256);
        assert!((config.criterion.threshold - 0.95).abs() < 1e-9);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_method_is_rejected_at_parse() {
        let json = sample_json().replace("\"fixmatch\"", "\"mixmatch\"");
        let parsed: std::result::Result<ExperimentConfig, _> = serde_json::from_str(&json);
        let err = parsed.unwrap_err().to_string();
        assert!(err.contains("unknown variant"), "got: {}", err);
    }

    #[test]
    fn test_unknown_dataset_is_rejected_at_parse() {
        let json = sample_json().replace("\"CIFAR10\"", "\"SVHN\"");
        let parsed: std::result::Result<ExperimentConfig, _> = serde_json::from_str(&json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_overrides_apply_only_supplied_flags() {
        let mut config = sample_config();
        let untouched = config.clone();

        config.apply_overrides(&ConfigOverrides {
            num_labeled: Some(250),
            dataset_random_seed: None,
            random_seed: None,
        });

        assert_eq!(config.dataset.num_labeled, 250);
        assert_eq!(config.dataset.random_seed, untouched.dataset.random_seed);
        assert_eq!(config.random_seed, untouched.random_seed);
        assert_eq!(config.transform, untouched.transform);
        assert_eq!(config.dataset.batch_sizes, untouched.dataset.batch_sizes);
    }

    #[test]
    fn test_overrides_noop_when_all_flags_omitted() {
        let mut config = sample_config();
        let untouched = config.clone();
        config.apply_overrides(&ConfigOverrides::default());
        assert_eq!(config, untouched);
    }

    #[test]
    fn test_random_seed_override_scenario() {
        // --random_seed 7 over a file with random_seed: 1
        let mut config = sample_config();
        assert_eq!(config.random_seed, 1);
        config.apply_overrides(&ConfigOverrides {
            num_labeled: None,
            dataset_random_seed: None,
            random_seed: Some(7),
        });
        assert_eq!(config.random_seed, 7);
        assert_eq!(config.dataset.random_seed, 1);
    }

    #[test]
    fn test_partition_two_devices_scenario() {
        let sizes = sample_config().dataset.batch_sizes;
        let per_device = sizes.partition(2);
        assert_eq!(per_device.labeled, 32);
        assert_eq!(per_device.unlabeled, 224);
        assert_eq!(per_device.val, 64);
    }

    #[test]
    fn test_partition_single_device_is_identity() {
        let sizes = BatchSizes { labeled: 64, unlabeled: 448, val: 64 };
        assert_eq!(sizes.partition(1), sizes);
    }

    #[test]
    fn test_partition_truncates_non_divisible() {
        let sizes = BatchSizes { labeled: 65, unlabeled: 449, val: 64 };
        let per_device = sizes.partition(2);
        assert_eq!(per_device.labeled, 32);
        assert_eq!(per_device.unlabeled, 224);
        assert_eq!(per_device.val, 64);
    }

    #[test]
    fn test_validate_rejects_unbalanced_num_labeled() {
        let mut config = sample_config();
        config.dataset.num_labeled = 37;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("multiple"), "got: {}", err);
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = sample_config();
        config.dataset.batch_sizes.unlabeled = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = sample_config();
        config.criterion.threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_flip_probability() {
        let json = sample_json().replace(
            r#"{"name": "RandomHorizontalFlip"},
                    {"name": "RandomCrop", "size": 32, "padding": 4},
                    {"name": "ToTensor"}"#,
            r#"{"name": "RandomHorizontalFlip", "p": 1.5},
                    {"name": "ToTensor"}"#,
        );
        let config: ExperimentConfig = serde_json::from_str(&json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = sample_config();
        config.save(&path).unwrap();
        let loaded = ExperimentConfig::load(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let err = ExperimentConfig::load("/nonexistent/config.json");
        assert!(err.is_err());
    }

    #[test]
    fn test_load_malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ExperimentConfig::load(&path),
            Err(SemiMatchError::Json(_))
        ));
    }
}
