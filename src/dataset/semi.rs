//! Semi-supervised batch assembly.
//!
//! [`SemiDataModule`] owns both splits and draws one labeled and one
//! unlabeled mini-batch per training step. The labeled subset is a small
//! class-balanced draw; the unlabeled stream iterates the full training set,
//! so labeled images also appear unlabeled, as in standard FixMatch setups.

use std::path::Path;

use ndarray::Array2;
use rand::Rng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use super::cifar::{self, CifarImage, Split};
use super::DatasetName;
use crate::config::BatchSizes;
use crate::transforms::{Compose, TwinTransform};
use crate::utils::error::{Result, SemiMatchError};
use crate::INPUT_DIM;

/// Batch of augmented labeled images
#[derive(Debug, Clone)]
pub struct LabeledBatch {
    /// One flattened image per row
    pub inputs: Array2<f32>,
    pub targets: Vec<usize>,
}

/// Batch of twin-augmented unlabeled images
#[derive(Debug, Clone)]
pub struct UnlabeledBatch {
    pub weak: Array2<f32>,
    pub strong: Array2<f32>,
    /// Positions in the training set, for per-sample curriculum state
    pub indices: Vec<usize>,
}

/// One training step's worth of data
#[derive(Debug, Clone)]
pub struct TrainBatch {
    pub labeled: LabeledBatch,
    pub unlabeled: UnlabeledBatch,
}

/// The three pipelines a semi-supervised run needs
#[derive(Debug, Clone)]
pub struct DataTransforms {
    pub labeled: Compose,
    pub unlabeled: TwinTransform,
    pub val: Compose,
}

impl DataTransforms {
    /// Wire up the standard arrangement: labeled batches get the weak
    /// pipeline, unlabeled batches get a strong/weak twin view.
    pub fn new(weak: Compose, strong: Compose, val: Compose) -> Self {
        Self {
            labeled: weak.clone(),
            unlabeled: TwinTransform::new(strong, weak),
            val,
        }
    }
}

/// Shuffling index iterator over a fixed pool
#[derive(Debug, Clone)]
pub struct IndexSampler {
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
    shuffle: bool,
    rng: ChaCha8Rng,
}

impl IndexSampler {
    pub fn new(indices: Vec<usize>, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            indices,
            batch_size,
            cursor: 0,
            shuffle,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Rewind and reshuffle for a new epoch
    pub fn reset(&mut self) {
        self.cursor = 0;
        if self.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }

    /// Next batch of indices, `None` once the pool is exhausted.
    /// The final batch may be short.
    pub fn next_batch(&mut self) -> Option<Vec<usize>> {
        if self.cursor >= self.indices.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let batch = self.indices[self.cursor..end].to_vec();
        self.cursor = end;
        Some(batch)
    }

    /// Next batch, restarting the pool when exhausted
    pub fn next_cycling(&mut self) -> Vec<usize> {
        if self.indices.is_empty() {
            return Vec::new();
        }
        match self.next_batch() {
            Some(batch) => batch,
            None => {
                self.reset();
                self.next_batch().unwrap_or_default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        (self.indices.len() + self.batch_size - 1) / self.batch_size
    }
}

/// Data module pairing a labeled subset with the full unlabeled pool
pub struct SemiDataModule {
    name: DatasetName,
    train: Vec<CifarImage>,
    val: Vec<CifarImage>,
    labeled_indices: Vec<usize>,
    transforms: DataTransforms,
    batch_sizes: BatchSizes,
    labeled_sampler: IndexSampler,
    unlabeled_sampler: IndexSampler,
}

impl SemiDataModule {
    /// Load from disk, downloading the archive on first use.
    ///
    /// `batch_sizes` are the per-device sizes after partitioning.
    pub fn new(
        root: impl AsRef<Path>,
        name: DatasetName,
        num_labeled: usize,
        transforms: DataTransforms,
        batch_sizes: BatchSizes,
        seed: u64,
    ) -> Result<Self> {
        let root = root.as_ref();
        cifar::ensure_downloaded(root, name)?;
        let train = cifar::load_split(root, name, Split::Train)?;
        let val = cifar::load_split(root, name, Split::Test)?;
        Self::from_images(name, train, val, num_labeled, transforms, batch_sizes, seed)
    }

    /// Build from in-memory splits
    pub fn from_images(
        name: DatasetName,
        train: Vec<CifarImage>,
        val: Vec<CifarImage>,
        num_labeled: usize,
        transforms: DataTransforms,
        batch_sizes: BatchSizes,
        seed: u64,
    ) -> Result<Self> {
        if batch_sizes.labeled == 0 || batch_sizes.unlabeled == 0 {
            return Err(SemiMatchError::Config(
                "per-device batch size is zero; lower the device count or raise \
                 dataset.batch_sizes"
                    .to_string(),
            ));
        }
        if batch_sizes.val == 0 {
            return Err(SemiMatchError::Config(
                "validation batch size must be positive".to_string(),
            ));
        }
        if val.is_empty() {
            return Err(SemiMatchError::Dataset("validation split is empty".to_string()));
        }

        let labeled_indices = balanced_labeled_indices(&train, name.num_classes(), num_labeled, seed)?;
        info!(
            "{}: {} train images, {} labeled, {} val",
            name,
            train.len(),
            labeled_indices.len(),
            val.len()
        );

        let labeled_sampler =
            IndexSampler::new(labeled_indices.clone(), batch_sizes.labeled, true, seed.wrapping_add(1));
        let unlabeled_sampler = IndexSampler::new(
            (0..train.len()).collect(),
            batch_sizes.unlabeled,
            true,
            seed.wrapping_add(2),
        );

        Ok(Self {
            name,
            train,
            val,
            labeled_indices,
            transforms,
            batch_sizes,
            labeled_sampler,
            unlabeled_sampler,
        })
    }

    pub fn name(&self) -> DatasetName {
        self.name
    }

    pub fn num_classes(&self) -> usize {
        self.name.num_classes()
    }

    pub fn num_train(&self) -> usize {
        self.train.len()
    }

    /// Size of the unlabeled pool, which is the whole training set
    pub fn num_unlabeled(&self) -> usize {
        self.train.len()
    }

    pub fn num_val(&self) -> usize {
        self.val.len()
    }

    pub fn labeled_indices(&self) -> &[usize] {
        &self.labeled_indices
    }

    /// Training steps per epoch, set by the unlabeled stream
    pub fn batches_per_epoch(&self) -> usize {
        self.unlabeled_sampler.num_batches()
    }

    /// Rewind and reshuffle both training streams
    pub fn start_epoch(&mut self) {
        self.labeled_sampler.reset();
        self.unlabeled_sampler.reset();
    }

    /// Draw the next training batch. The epoch ends when the unlabeled
    /// stream is exhausted; the labeled stream cycles as needed.
    pub fn next_train_batch(&mut self, rng: &mut ChaCha8Rng) -> Option<TrainBatch> {
        let unlabeled_indices = self.unlabeled_sampler.next_batch()?;
        let labeled_indices = self.labeled_sampler.next_cycling();

        let labeled = self.labeled_batch(&labeled_indices, rng);
        let unlabeled = self.unlabeled_batch(&unlabeled_indices, rng);
        Some(TrainBatch { labeled, unlabeled })
    }

    /// Deterministic pass over the validation split
    pub fn val_batches(&self) -> ValBatches<'_> {
        ValBatches {
            images: &self.val,
            transform: &self.transforms.val,
            batch_size: self.batch_sizes.val,
            cursor: 0,
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    fn labeled_batch<R: Rng>(&self, indices: &[usize], rng: &mut R) -> LabeledBatch {
        let mut inputs = Array2::zeros((indices.len(), INPUT_DIM));
        let mut targets = Vec::with_capacity(indices.len());
        for (row, &idx) in indices.iter().enumerate() {
            let image = &self.train[idx];
            inputs
                .row_mut(row)
                .assign(&self.transforms.labeled.apply(&image.to_rgb_image(), rng));
            targets.push(image.label);
        }
        LabeledBatch { inputs, targets }
    }

    fn unlabeled_batch<R: Rng>(&self, indices: &[usize], rng: &mut R) -> UnlabeledBatch {
        let mut weak = Array2::zeros((indices.len(), INPUT_DIM));
        let mut strong = Array2::zeros((indices.len(), INPUT_DIM));
        for (row, &idx) in indices.iter().enumerate() {
            let views = self
                .transforms
                .unlabeled
                .apply(&self.train[idx].to_rgb_image(), rng);
            weak.row_mut(row).assign(&views.weak);
            strong.row_mut(row).assign(&views.strong);
        }
        UnlabeledBatch {
            weak,
            strong,
            indices: indices.to_vec(),
        }
    }
}

/// Iterator over validation batches
pub struct ValBatches<'a> {
    images: &'a [CifarImage],
    transform: &'a Compose,
    batch_size: usize,
    cursor: usize,
    rng: ChaCha8Rng,
}

impl Iterator for ValBatches<'_> {
    type Item = LabeledBatch;

    fn next(&mut self) -> Option<LabeledBatch> {
        if self.cursor >= self.images.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.images.len());
        let chunk = &self.images[self.cursor..end];
        self.cursor = end;

        let mut inputs = Array2::zeros((chunk.len(), INPUT_DIM));
        let mut targets = Vec::with_capacity(chunk.len());
        for (row, image) in chunk.iter().enumerate() {
            inputs
                .row_mut(row)
                .assign(&self.transform.apply(&image.to_rgb_image(), &mut self.rng));
            targets.push(image.label);
        }
        Some(LabeledBatch { inputs, targets })
    }
}

/// Draw `num_labeled / num_classes` samples per class.
fn balanced_labeled_indices(
    train: &[CifarImage],
    num_classes: usize,
    num_labeled: usize,
    seed: u64,
) -> Result<Vec<usize>> {
    if num_labeled == 0 {
        return Err(SemiMatchError::Config(
            "dataset.num_labeled must be positive".to_string(),
        ));
    }
    if num_labeled % num_classes != 0 {
        return Err(SemiMatchError::Config(format!(
            "dataset.num_labeled {} is not a multiple of {} classes",
            num_labeled, num_classes
        )));
    }
    let per_class = num_labeled / num_classes;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut labeled = Vec::with_capacity(num_labeled);
    for class in 0..num_classes {
        let mut class_indices: Vec<usize> = train
            .iter()
            .enumerate()
            .filter(|(_, img)| img.label == class)
            .map(|(i, _)| i)
            .collect();
        if class_indices.len() < per_class {
            return Err(SemiMatchError::Dataset(format!(
                "class {} has {} samples, need {} for the labeled subset",
                class,
                class_indices.len(),
                per_class
            )));
        }
        class_indices.shuffle(&mut rng);
        labeled.extend_from_slice(&class_indices[..per_class]);
    }
    Ok(labeled)
}
