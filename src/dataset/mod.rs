//! Dataset selection, loading, and semi-supervised batching.

mod cifar;
mod semi;

pub use cifar::{ensure_downloaded, load_split, CifarImage, Split, CIFAR10_CLASSES, CIFAR100_CLASSES};
pub use semi::{
    DataTransforms, IndexSampler, LabeledBatch, SemiDataModule, TrainBatch, UnlabeledBatch,
    ValBatches,
};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported datasets, keyed exactly as they appear in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetName {
    #[serde(rename = "CIFAR10")]
    Cifar10,
    #[serde(rename = "CIFAR100")]
    Cifar100,
}

impl DatasetName {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetName::Cifar10 => "CIFAR10",
            DatasetName::Cifar100 => "CIFAR100",
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            DatasetName::Cifar10 => 10,
            DatasetName::Cifar100 => 100,
        }
    }

    pub fn class_names(&self) -> &'static [&'static str] {
        match self {
            DatasetName::Cifar10 => &CIFAR10_CLASSES,
            DatasetName::Cifar100 => &CIFAR100_CLASSES,
        }
    }

    pub fn archive_url(&self) -> &'static str {
        match self {
            DatasetName::Cifar10 => "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz",
            DatasetName::Cifar100 => "https://www.cs.toronto.edu/~kriz/cifar-100-binary.tar.gz",
        }
    }

    /// Directory the archive extracts to
    pub fn batch_dir(&self) -> &'static str {
        match self {
            DatasetName::Cifar10 => "cifar-10-batches-bin",
            DatasetName::Cifar100 => "cifar-100-binary",
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_name_properties() {
        assert_eq!(DatasetName::Cifar10.num_classes(), 10);
        assert_eq!(DatasetName::Cifar100.num_classes(), 100);
        assert_eq!(DatasetName::Cifar10.as_str(), "CIFAR10");
        assert_eq!(DatasetName::Cifar10.batch_dir(), "cifar-10-batches-bin");
        assert_eq!(DatasetName::Cifar100.batch_dir(), "cifar-100-binary");
        assert_eq!(DatasetName::Cifar10.class_names().len(), 10);
        assert_eq!(DatasetName::Cifar100.class_names().len(), 100);
    }

    #[test]
    fn test_dataset_name_serde_keys() {
        let name: DatasetName = serde_json::from_str("\"CIFAR100\"").unwrap();
        assert_eq!(name, DatasetName::Cifar100);
        assert_eq!(serde_json::to_string(&DatasetName::Cifar10).unwrap(), "\"CIFAR10\"");

        let unknown: Result<DatasetName, _> = serde_json::from_str("\"SVHN\"");
        assert!(unknown.is_err());
    }
}
