//! RandAugment: `n` ops drawn uniformly from a fixed pool, each applied at
//! a shared magnitude `m` on a 0..=30 scale with a random sign.

use image::{imageops, RgbImage};
use rand::Rng;

use super::FILL;

const MAX_MAGNITUDE: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AugOp {
    Identity,
    Brightness,
    Color,
    Contrast,
    Posterize,
    Solarize,
    Rotate,
    TranslateX,
    TranslateY,
}

const POOL: [AugOp; 9] = [
    AugOp::Identity,
    AugOp::Brightness,
    AugOp::Color,
    AugOp::Contrast,
    AugOp::Posterize,
    AugOp::Solarize,
    AugOp::Rotate,
    AugOp::TranslateX,
    AugOp::TranslateY,
];

/// Apply `n` randomly chosen ops at magnitude `m`.
pub fn rand_augment<R: Rng>(image: &RgbImage, n: usize, m: u32, rng: &mut R) -> RgbImage {
    let mut img = image.clone();
    let strength = m.min(MAX_MAGNITUDE) as f32 / MAX_MAGNITUDE as f32;
    for _ in 0..n {
        let op = POOL[rng.gen_range(0..POOL.len())];
        img = apply_op(&img, op, strength, rng);
    }
    img
}

fn apply_op<R: Rng>(img: &RgbImage, op: AugOp, strength: f32, rng: &mut R) -> RgbImage {
    let signed = if rng.gen_bool(0.5) { strength } else { -strength };
    match op {
        AugOp::Identity => img.clone(),
        AugOp::Brightness => imageops::brighten(img, (signed * 96.0) as i32),
        AugOp::Color => saturate(img, 1.0 + signed * 0.9),
        AugOp::Contrast => imageops::contrast(img, signed * 45.0),
        AugOp::Posterize => posterize(img, 8 - (strength * 4.0).round() as u8),
        AugOp::Solarize => solarize(img, (255.0 - strength * 255.0) as u8),
        AugOp::Rotate => rotate(img, signed * 30.0),
        AugOp::TranslateX => translate(img, (signed * 10.0).round() as i32, 0),
        AugOp::TranslateY => translate(img, 0, (signed * 10.0).round() as i32),
    }
}

/// Blend each pixel toward its grayscale value; factor 1 is identity.
fn saturate(img: &RgbImage, factor: f32) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        let gray = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
        for c in 0..3 {
            px[c] = (gray + factor * (px[c] as f32 - gray)).clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Keep only the top `bits` bits of each channel.
fn posterize(img: &RgbImage, bits: u8) -> RgbImage {
    let bits = bits.clamp(1, 8);
    let mask = 0xFFu8 << (8 - bits);
    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in 0..3 {
            px[c] &= mask;
        }
    }
    out
}

/// Invert every channel value at or above `threshold`.
fn solarize(img: &RgbImage, threshold: u8) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in 0..3 {
            if px[c] >= threshold {
                px[c] = 255 - px[c];
            }
        }
    }
    out
}

/// Nearest-neighbor rotation about the image center, gray fill outside.
fn rotate(img: &RgbImage, degrees: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;
    let mut out = RgbImage::from_pixel(w, h, FILL);
    for y in 0..h {
        for x in 0..w {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let sx = (cos * dx + sin * dy + cx).round() as i64;
            let sy = (-sin * dx + cos * dy + cy).round() as i64;
            if sx >= 0 && sy >= 0 && (sx as u32) < w && (sy as u32) < h {
                out.put_pixel(x, y, *img.get_pixel(sx as u32, sy as u32));
            }
        }
    }
    out
}

fn translate(img: &RgbImage, dx: i32, dy: i32) -> RgbImage {
    let (w, h) = img.dimensions();
    let mut out = RgbImage::from_pixel(w, h, FILL);
    for y in 0..h {
        for x in 0..w {
            let sx = x as i64 - dx as i64;
            let sy = y as i64 - dy as i64;
            if sx >= 0 && sy >= 0 && (sx as u32) < w && (sy as u32) < h {
                out.put_pixel(x, y, *img.get_pixel(sx as u32, sy as u32));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_image() -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| Rgb([x as u8 * 7, y as u8 * 7, 200]))
    }

    #[test]
    fn test_zero_ops_is_identity() {
        let img = test_image();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = rand_augment(&img, 0, 10, &mut rng);
        assert_eq!(out, img);
    }

    #[test]
    fn test_output_keeps_dimensions() {
        let img = test_image();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..20 {
            let out = rand_augment(&img, 2, 30, &mut rng);
            assert_eq!(out.dimensions(), (32, 32));
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        let img = test_image();
        let a = rand_augment(&img, 2, 10, &mut ChaCha8Rng::seed_from_u64(42));
        let b = rand_augment(&img, 2, 10, &mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_posterize_masks_low_bits() {
        let img = RgbImage::from_pixel(2, 2, Rgb([0b1011_0110; 3]));
        let out = posterize(&img, 4);
        assert_eq!(out.get_pixel(0, 0)[0], 0b1011_0000);
    }

    #[test]
    fn test_posterize_eight_bits_is_identity() {
        let img = test_image();
        assert_eq!(posterize(&img, 8), img);
    }

    #[test]
    fn test_solarize_inverts_above_threshold() {
        let img = RgbImage::from_pixel(1, 1, Rgb([200, 50, 130]));
        let out = solarize(&img, 128);
        let px = out.get_pixel(0, 0);
        assert_eq!(px[0], 55); // inverted
        assert_eq!(px[1], 50); // untouched
        assert_eq!(px[2], 125); // inverted
    }

    #[test]
    fn test_rotate_zero_degrees_is_identity() {
        let img = test_image();
        assert_eq!(rotate(&img, 0.0), img);
    }

    #[test]
    fn test_translate_shifts_and_fills() {
        let img = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let out = translate(&img, 2, 0);
        assert_eq!(*out.get_pixel(0, 0), FILL);
        assert_eq!(*out.get_pixel(3, 0), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_saturate_identity_factor() {
        let img = test_image();
        let out = saturate(&img, 1.0);
        // Factor 1 reconstructs each channel up to rounding.
        for (a, b) in out.pixels().zip(img.pixels()) {
            for c in 0..3 {
                assert!((a[c] as i16 - b[c] as i16).abs() <= 1);
            }
        }
    }
}
