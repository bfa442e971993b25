//! Structural similarity refinement.
//!
//! Second-stage filter for candidate pairs: both full images are brought to a
//! common size and intensity plane, then compared with the windowed SSIM
//! statistic. Much more discriminating than the bit signatures, and much more
//! expensive, since it re-reads and transforms the complete images.

use image::imageops::FilterType;
use image::DynamicImage;

/// Common comparison size; both images are resampled to this square.
pub const COMPARE_SIZE: u32 = 128;

/// Box-blur window for the local statistics.
const WINDOW_RADIUS: i64 = 4; // 9×9

/// Stabilizing constants, tuned for the 0-255 intensity range:
/// C1 = (0.01·255)², C2 = (0.03·255)².
const C1: f64 = 6.5025;
const C2: f64 = 58.5225;

/// Mean structural similarity index between two images, in [0, 1].
///
/// 1.0 is essentially identical, above roughly 0.4 similar, below 0.2
/// different. Identical inputs always produce exactly 1.0.
pub fn structural_index(a: &DynamicImage, b: &DynamicImage) -> f64 {
    let i1 = intensity_plane(a);
    let i2 = intensity_plane(b);
    let n = (COMPARE_SIZE * COMPARE_SIZE) as usize;

    let i1_sq: Vec<f64> = i1.iter().map(|v| v * v).collect();
    let i2_sq: Vec<f64> = i2.iter().map(|v| v * v).collect();
    let i1_i2: Vec<f64> = i1.iter().zip(&i2).map(|(x, y)| x * y).collect();

    let mu1 = box_blur(&i1);
    let mu2 = box_blur(&i2);

    // Local second moments, blurred the same way, minus the squared means.
    let sigma1_sq = subtract_product(&box_blur(&i1_sq), &mu1, &mu1);
    let sigma2_sq = subtract_product(&box_blur(&i2_sq), &mu2, &mu2);
    let sigma12 = subtract_product(&box_blur(&i1_i2), &mu1, &mu2);

    let mut sum = 0.0;
    for idx in 0..n {
        let numerator =
            (2.0 * mu1[idx] * mu2[idx] + C1) * (2.0 * sigma12[idx] + C2);
        let denominator = (mu1[idx] * mu1[idx] + mu2[idx] * mu2[idx] + C1)
            * (sigma1_sq[idx] + sigma2_sq[idx] + C2);
        sum += numerator / denominator;
    }
    (sum / n as f64).clamp(0.0, 1.0)
}

/// Resize to the comparison square and reduce to a single intensity plane.
/// Already-gray input only goes through the resize.
fn intensity_plane(image: &DynamicImage) -> Vec<f64> {
    let resized = image.resize_exact(COMPARE_SIZE, COMPARE_SIZE, FilterType::Triangle);
    resized
        .to_luma8()
        .pixels()
        .map(|p| f64::from(p.0[0]))
        .collect()
}

/// `blurred - a·b`, elementwise.
fn subtract_product(blurred: &[f64], a: &[f64], b: &[f64]) -> Vec<f64> {
    blurred
        .iter()
        .zip(a.iter().zip(b))
        .map(|(&m, (&x, &y))| m - x * y)
        .collect()
}

/// 9×9 box blur over the comparison plane. The window is clipped at the
/// borders and normalized by the pixels actually covered, so a plane blurred
/// against itself stays bit-identical in the SSIM ratio.
fn box_blur(src: &[f64]) -> Vec<f64> {
    let size = COMPARE_SIZE as i64;
    debug_assert_eq!(src.len(), (size * size) as usize);

    // Separable: horizontal mean, then vertical mean of those means.
    let mut horizontal = vec![0.0f64; src.len()];
    for y in 0..size {
        for x in 0..size {
            let lo = (x - WINDOW_RADIUS).max(0);
            let hi = (x + WINDOW_RADIUS).min(size - 1);
            let mut sum = 0.0;
            for nx in lo..=hi {
                sum += src[(y * size + nx) as usize];
            }
            horizontal[(y * size + x) as usize] = sum / (hi - lo + 1) as f64;
        }
    }

    let mut out = vec![0.0f64; src.len()];
    for y in 0..size {
        let lo = (y - WINDOW_RADIUS).max(0);
        let hi = (y + WINDOW_RADIUS).min(size - 1);
        for x in 0..size {
            let mut sum = 0.0;
            for ny in lo..=hi {
                sum += horizontal[(ny * size + x) as usize];
            }
            out[(y * size + x) as usize] = sum / (hi - lo + 1) as f64;
        }
    }
    out
}
