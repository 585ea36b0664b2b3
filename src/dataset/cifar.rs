//! CIFAR binary-format loading and download.
//!
//! Both datasets ship as tar.gz archives of fixed-size records. CIFAR-10
//! records are `[label][R plane][G plane][B plane]`; CIFAR-100 records carry
//! two label bytes `[coarse][fine]` before the same 3072 pixel bytes. Images
//! are stored here interleaved (RGBRGB...) for direct `RgbImage` conversion.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use image::RgbImage;
use tracing::info;

use super::DatasetName;
use crate::utils::error::{Result, SemiMatchError};
use crate::{IMAGE_SIZE, INPUT_DIM};

/// CIFAR-10 class names, in label order
pub const CIFAR10_CLASSES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// CIFAR-100 fine-label class names, in label order
pub const CIFAR100_CLASSES: [&str; 100] = [
    "apple",
    "aquarium_fish",
    "baby",
    "bear",
    "beaver",
    "bed",
    "bee",
    "beetle",
    "bicycle",
    "bottle",
    "bowl",
    "boy",
    "bridge",
    "bus",
    "butterfly",
    "camel",
    "can",
    "castle",
    "caterpillar",
    "cattle",
    "chair",
    "chimpanzee",
    "clock",
    "cloud",
    "cockroach",
    "couch",
    "crab",
    "crocodile",
    "cup",
    "dinosaur",
    "dolphin",
    "elephant",
    "flatfish",
    "forest",
    "fox",
    "girl",
    "hamster",
    "house",
    "kangaroo",
    "keyboard",
    "lamp",
    "lawn_mower",
    "leopard",
    "lion",
    "lizard",
    "lobster",
    "man",
    "maple_tree",
    "motorcycle",
    "mountain",
    "mouse",
    "mushroom",
    "oak_tree",
    "orange",
    "orchid",
    "otter",
    "palm_tree",
    "pear",
    "pickup_truck",
    "pine_tree",
    "plain",
    "plate",
    "poppy",
    "porcupine",
    "possum",
    "rabbit",
    "raccoon",
    "ray",
    "road",
    "rocket",
    "rose",
    "sea",
    "seal",
    "shark",
    "shrew",
    "skunk",
    "skyscraper",
    "snail",
    "snake",
    "spider",
    "squirrel",
    "streetcar",
    "sunflower",
    "sweet_pepper",
    "table",
    "tank",
    "telephone",
    "television",
    "tiger",
    "tractor",
    "train",
    "trout",
    "tulip",
    "turtle",
    "wardrobe",
    "whale",
    "willow_tree",
    "wolf",
    "woman",
    "worm",
];

/// Single image with its fine label
#[derive(Clone, Debug)]
pub struct CifarImage {
    /// Interleaved RGB bytes, 32x32x3
    pub data: Vec<u8>,
    pub label: usize,
}

impl CifarImage {
    pub fn new(data: Vec<u8>, label: usize) -> Self {
        Self { data, label }
    }

    /// View as an `RgbImage` for the augmentation pipeline
    pub fn to_rgb_image(&self) -> RgbImage {
        let side = IMAGE_SIZE as u32;
        // data length is validated at parse time
        RgbImage::from_raw(side, side, self.data.clone()).unwrap_or_else(|| RgbImage::new(side, side))
    }
}

/// Dataset split selector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// Load one split from the extracted batch directory under `root`.
pub fn load_split(root: impl AsRef<Path>, name: DatasetName, split: Split) -> Result<Vec<CifarImage>> {
    let batch_dir = root.as_ref().join(name.batch_dir());
    let files: &[&str] = match (name, split) {
        (DatasetName::Cifar10, Split::Train) => &[
            "data_batch_1.bin",
            "data_batch_2.bin",
            "data_batch_3.bin",
            "data_batch_4.bin",
            "data_batch_5.bin",
        ],
        (DatasetName::Cifar10, Split::Test) => &["test_batch.bin"],
        (DatasetName::Cifar100, Split::Train) => &["train.bin"],
        (DatasetName::Cifar100, Split::Test) => &["test.bin"],
    };

    let mut images = Vec::new();
    for file in files {
        let path = batch_dir.join(file);
        let buffer = fs::read(&path).map_err(|e| {
            SemiMatchError::Dataset(format!("failed to read {}: {}", path.display(), e))
        })?;
        images.extend(parse_records(&buffer, name)?);
    }
    info!(
        "loaded {} {:?} images for {}",
        images.len(),
        split,
        name
    );
    Ok(images)
}

/// Parse a batch file buffer into images.
///
/// Accepts any whole number of records so truncated downloads fail loudly
/// while small fixture files still parse.
fn parse_records(buffer: &[u8], name: DatasetName) -> Result<Vec<CifarImage>> {
    let label_bytes = match name {
        DatasetName::Cifar10 => 1,
        DatasetName::Cifar100 => 2,
    };
    let record_size = label_bytes + INPUT_DIM;
    if buffer.is_empty() || buffer.len() % record_size != 0 {
        return Err(SemiMatchError::Dataset(format!(
            "batch file size {} is not a multiple of the {}-byte record",
            buffer.len(),
            record_size
        )));
    }

    let plane = IMAGE_SIZE * IMAGE_SIZE;
    let num_classes = name.num_classes();
    let mut images = Vec::with_capacity(buffer.len() / record_size);
    for record in buffer.chunks_exact(record_size) {
        // CIFAR-100 stores [coarse, fine]; the fine label is the last one
        let label = record[label_bytes - 1] as usize;
        if label >= num_classes {
            return Err(SemiMatchError::Dataset(format!(
                "label {} out of range for {} ({} classes)",
                label, name, num_classes
            )));
        }
        let pixels = &record[label_bytes..];
        let mut data = vec![0u8; INPUT_DIM];
        for i in 0..plane {
            data[i * 3] = pixels[i];
            data[i * 3 + 1] = pixels[plane + i];
            data[i * 3 + 2] = pixels[2 * plane + i];
        }
        images.push(CifarImage::new(data, label));
    }
    Ok(images)
}

/// Download and extract the dataset archive if the batch directory is absent.
pub fn ensure_downloaded(root: impl AsRef<Path>, name: DatasetName) -> Result<()> {
    let root = root.as_ref();
    let batch_dir = root.join(name.batch_dir());
    if batch_dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(root)?;

    let url = name.archive_url();
    let archive_name = url.rsplit('/').next().unwrap_or("dataset.tar.gz");
    let archive_path = root.join(archive_name);

    if !archive_path.exists() {
        info!("downloading {} from {}", name, url);
        let response = reqwest::blocking::get(url)
            .map_err(|e| SemiMatchError::Download(format!("request to {} failed: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(SemiMatchError::Download(format!(
                "request to {} returned {}",
                url,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|e| SemiMatchError::Download(format!("reading response body: {}", e)))?;
        let mut file = File::create(&archive_path)?;
        file.write_all(&bytes)?;
        info!("saved archive to {}", archive_path.display());
    }

    info!("extracting {}", archive_path.display());
    let archive = File::open(&archive_path)?;
    let decoder = flate2::read::GzDecoder::new(archive);
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(root)
        .map_err(|e| SemiMatchError::Download(format!("extracting archive: {}", e)))?;

    if !batch_dir.exists() {
        return Err(SemiMatchError::Download(format!(
            "archive did not contain {}",
            batch_dir.display()
        )));
    }
    Ok(())
}
