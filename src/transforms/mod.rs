//! Declarative augmentation pipelines.
//!
//! Transform configs are lists of named ops that deserialize into
//! [`TransformOp`] and compose in order. Geometric and photometric ops run
//! on the 32x32 RGB image; the tensor-conversion tail (`ToTensor` +
//! `Normalize`) produces the flat `f32` feature vector the model consumes.

pub mod randaugment;

use image::{imageops, Rgb, RgbImage};
use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-channel mean of the CIFAR train set
pub const CIFAR_MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];

/// Per-channel standard deviation of the CIFAR train set
pub const CIFAR_STD: [f32; 3] = [0.2470, 0.2435, 0.2616];

/// Fill color for pixels exposed by geometric ops (cutout, rotate, translate)
pub(crate) const FILL: Rgb<u8> = Rgb([127, 127, 127]);

fn default_flip_prob() -> f64 {
    0.5
}

fn default_randaugment_n() -> usize {
    2
}

fn default_randaugment_m() -> u32 {
    10
}

fn default_cutout_size() -> u32 {
    16
}

/// A single augmentation op, selected by its `name` tag in config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum TransformOp {
    /// Mirror the image left-right with probability `p`
    RandomHorizontalFlip {
        #[serde(default = "default_flip_prob")]
        p: f64,
    },
    /// Pad with mirrored edges, then crop a random `size` x `size` window
    RandomCrop {
        size: u32,
        #[serde(default)]
        padding: u32,
    },
    /// Apply `n` randomly chosen ops at magnitude `m` (0..=30)
    RandAugment {
        #[serde(default = "default_randaugment_n")]
        n: usize,
        #[serde(default = "default_randaugment_m")]
        m: u32,
    },
    /// Blank out a random square of side `size` with gray fill
    Cutout {
        #[serde(default = "default_cutout_size")]
        size: u32,
    },
    /// Marker for the image-to-tensor conversion (always performed last)
    ToTensor,
    /// Per-channel normalization applied during tensor conversion
    Normalize { mean: [f32; 3], std: [f32; 3] },
}

/// An ordered pipeline of transform ops
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Compose {
    ops: Vec<TransformOp>,
}

impl Compose {
    pub fn new(ops: Vec<TransformOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[TransformOp] {
        &self.ops
    }

    /// Canonical weak pipeline: flip + pad-and-crop + normalize
    pub fn cifar_weak() -> Self {
        Self::new(vec![
            TransformOp::RandomHorizontalFlip { p: 0.5 },
            TransformOp::RandomCrop { size: 32, padding: 4 },
            TransformOp::ToTensor,
            TransformOp::Normalize { mean: CIFAR_MEAN, std: CIFAR_STD },
        ])
    }

    /// Canonical strong pipeline: weak ops + RandAugment + cutout
    pub fn cifar_strong() -> Self {
        Self::new(vec![
            TransformOp::RandomHorizontalFlip { p: 0.5 },
            TransformOp::RandomCrop { size: 32, padding: 4 },
            TransformOp::RandAugment { n: 2, m: 10 },
            TransformOp::Cutout { size: 16 },
            TransformOp::ToTensor,
            TransformOp::Normalize { mean: CIFAR_MEAN, std: CIFAR_STD },
        ])
    }

    /// Canonical evaluation pipeline: tensor conversion only
    pub fn cifar_eval() -> Self {
        Self::new(vec![
            TransformOp::ToTensor,
            TransformOp::Normalize { mean: CIFAR_MEAN, std: CIFAR_STD },
        ])
    }

    /// Run the pipeline on one image, producing the flat feature vector.
    ///
    /// Image ops apply in config order; the tensor conversion runs once at
    /// the end, using the last `Normalize` seen (plain `/255` scaling when
    /// the pipeline has none).
    pub fn apply<R: Rng>(&self, image: &RgbImage, rng: &mut R) -> Array1<f32> {
        let mut img = image.clone();
        let mut normalize = None;

        for op in &self.ops {
            match op {
                TransformOp::RandomHorizontalFlip { p } => {
                    if rng.gen_bool(*p) {
                        img = imageops::flip_horizontal(&img);
                    }
                }
                TransformOp::RandomCrop { size, padding } => {
                    img = random_crop(&img, *size, *padding, rng);
                }
                TransformOp::RandAugment { n, m } => {
                    img = randaugment::rand_augment(&img, *n, *m, rng);
                }
                TransformOp::Cutout { size } => {
                    cutout(&mut img, *size, rng);
                }
                TransformOp::ToTensor => {}
                TransformOp::Normalize { mean, std } => {
                    normalize = Some((*mean, *std));
                }
            }
        }

        to_tensor(&img, normalize)
    }
}

/// Paired strong/weak pipelines producing both views of one unlabeled sample
#[derive(Debug, Clone)]
pub struct TwinTransform {
    strong: Compose,
    weak: Compose,
}

/// The two views a [`TwinTransform`] yields
#[derive(Debug, Clone)]
pub struct TwinViews {
    pub strong: Array1<f32>,
    pub weak: Array1<f32>,
}

impl TwinTransform {
    pub fn new(strong: Compose, weak: Compose) -> Self {
        Self { strong, weak }
    }

    pub fn apply<R: Rng>(&self, image: &RgbImage, rng: &mut R) -> TwinViews {
        TwinViews {
            strong: self.strong.apply(image, rng),
            weak: self.weak.apply(image, rng),
        }
    }
}

/// Convert to a flat interleaved-RGB `f32` vector, optionally normalized.
fn to_tensor(img: &RgbImage, normalize: Option<([f32; 3], [f32; 3])>) -> Array1<f32> {
    let raw = img.as_raw();
    let mut out = Vec::with_capacity(raw.len());
    match normalize {
        Some((mean, std)) => {
            for (i, &v) in raw.iter().enumerate() {
                let c = i % 3;
                out.push((v as f32 / 255.0 - mean[c]) / std[c]);
            }
        }
        None => {
            for &v in raw {
                out.push(v as f32 / 255.0);
            }
        }
    }
    Array1::from_vec(out)
}

/// Symmetric reflection of an out-of-range index into `[0, n)`
fn mirror_index(mut i: i64, n: i64) -> i64 {
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i;
        }
    }
}

fn pad_mirror(img: &RgbImage, padding: u32) -> RgbImage {
    if padding == 0 {
        return img.clone();
    }
    let (w, h) = img.dimensions();
    let mut out = RgbImage::new(w + 2 * padding, h + 2 * padding);
    for y in 0..out.height() {
        for x in 0..out.width() {
            let sx = mirror_index(x as i64 - padding as i64, w as i64);
            let sy = mirror_index(y as i64 - padding as i64, h as i64);
            out.put_pixel(x, y, *img.get_pixel(sx as u32, sy as u32));
        }
    }
    out
}

fn random_crop<R: Rng>(img: &RgbImage, size: u32, padding: u32, rng: &mut R) -> RgbImage {
    let padded = pad_mirror(img, padding);
    let (w, h) = padded.dimensions();
    let x = if w > size { rng.gen_range(0..=w - size) } else { 0 };
    let y = if h > size { rng.gen_range(0..=h - size) } else { 0 };
    imageops::crop_imm(&padded, x, y, size.min(w), size.min(h)).to_image()
}

fn cutout<R: Rng>(img: &mut RgbImage, size: u32, rng: &mut R) {
    let (w, h) = img.dimensions();
    if size == 0 || w == 0 || h == 0 {
        return;
    }
    // Center can land anywhere; the square is clipped at the borders.
    let cx = rng.gen_range(0..w);
    let cy = rng.gen_range(0..h);
    let half = size / 2;
    let x0 = cx.saturating_sub(half);
    let y0 = cy.saturating_sub(half);
    let x1 = (cx + (size - half)).min(w);
    let y1 = (cy + (size - half)).min(h);
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, FILL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gradient_image() -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| Rgb([x as u8 * 8, y as u8 * 8, 100]))
    }

    #[test]
    fn test_op_list_parses_from_json() {
        let json = r#"[
            {"name": "RandomHorizontalFlip"},
            {"name": "RandomCrop", "size": 32, "padding": 4},
            {"name": "RandAugment", "n": 2, "m": 10},
            {"name": "Cutout"},
            {"name": "ToTensor"},
            {"name": "Normalize", "mean": [0.5, 0.5, 0.5], "std": [0.25, 0.25, 0.25]}
        ]"#;
        let compose: Compose = serde_json::from_str(json).unwrap();
        assert_eq!(compose.ops().len(), 6);
        assert_eq!(
            compose.ops()[0],
            TransformOp::RandomHorizontalFlip { p: 0.5 }
        );
        assert_eq!(compose.ops()[3], TransformOp::Cutout { size: 16 });
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let json = r#"[{"name": "MixUp", "alpha": 0.2}]"#;
        let parsed: Result<Compose, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_flip_probability_one_mirrors_pixels() {
        let img = gradient_image();
        let compose = Compose::new(vec![TransformOp::RandomHorizontalFlip { p: 1.0 }]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = compose.apply(&img, &mut rng);

        // First pixel of the flipped row equals the last source pixel.
        let expected = img.get_pixel(31, 0)[0] as f32 / 255.0;
        assert!((out[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_flip_probability_zero_is_identity() {
        let img = gradient_image();
        let compose = Compose::new(vec![TransformOp::RandomHorizontalFlip { p: 0.0 }]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = compose.apply(&img, &mut rng);
        assert!((out[0] - img.get_pixel(0, 0)[0] as f32 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_random_crop_preserves_output_size() {
        let img = gradient_image();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..10 {
            let cropped = random_crop(&img, 32, 4, &mut rng);
            assert_eq!(cropped.dimensions(), (32, 32));
        }
    }

    #[test]
    fn test_mirror_index_reflects_symmetrically() {
        assert_eq!(mirror_index(-1, 32), 0);
        assert_eq!(mirror_index(-2, 32), 1);
        assert_eq!(mirror_index(32, 32), 31);
        assert_eq!(mirror_index(33, 32), 30);
        assert_eq!(mirror_index(5, 32), 5);
    }

    #[test]
    fn test_cutout_writes_fill_pixels() {
        let mut img = RgbImage::from_pixel(32, 32, Rgb([255, 255, 255]));
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        cutout(&mut img, 16, &mut rng);

        let filled = img.pixels().filter(|p| **p == FILL).count();
        assert!(filled > 0);
        assert!(filled <= 16 * 16);
    }

    #[test]
    fn test_to_tensor_normalizes_channels() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 127]));
        let out = to_tensor(&img, Some(([0.5, 0.5, 0.5], [0.5, 0.5, 0.5])));

        assert_eq!(out.len(), 2 * 2 * 3);
        assert!((out[0] - 1.0).abs() < 1e-6); // (1.0 - 0.5) / 0.5
        assert!((out[1] + 1.0).abs() < 1e-6); // (0.0 - 0.5) / 0.5
    }

    #[test]
    fn test_to_tensor_without_normalize_scales_to_unit() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 0, 51]));
        let out = to_tensor(&img, None);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[1] - 0.0).abs() < 1e-6);
        assert!((out[2] - 0.2).abs() < 1e-2);
    }

    #[test]
    fn test_twin_transform_produces_both_views() {
        let img = gradient_image();
        let twin = TwinTransform::new(Compose::cifar_strong(), Compose::cifar_weak());
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let views = twin.apply(&img, &mut rng);

        assert_eq!(views.strong.len(), 32 * 32 * 3);
        assert_eq!(views.weak.len(), 32 * 32 * 3);
    }

    #[test]
    fn test_eval_pipeline_is_deterministic() {
        let img = gradient_image();
        let compose = Compose::cifar_eval();
        let mut rng_a = ChaCha8Rng::seed_from_u64(1);
        let mut rng_b = ChaCha8Rng::seed_from_u64(99);
        let a = compose.apply(&img, &mut rng_a);
        let b = compose.apply(&img, &mut rng_b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_pipelines_round_trip_serde() {
        let strong = Compose::cifar_strong();
        let json = serde_json::to_string(&strong).unwrap();
        let back: Compose = serde_json::from_str(&json).unwrap();
        assert_eq!(strong, back);
    }
}
