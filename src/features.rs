//! Local-feature correspondence tie-breaker.
//!
//! Runs only when the cheap signature filter and the structural index
//! disagree about a pair. Keypoints are FAST corners detected over a small
//! image pyramid, oriented by intensity centroid and described with a 256-bit
//! rotated binary test pattern; two images are then scored by how many
//! descriptor matches survive the nearest/second-nearest ratio test.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use std::collections::BTreeMap;

/// Nearest-neighbor distance must be below this fraction of the
/// second-nearest to count as an unambiguous match.
const RATIO_THRESHOLD: f32 = 0.7;

/// 256 binary intensity tests, 32 descriptor bytes.
const PATTERN_TESTS: usize = 256;

/// Half-extent of the descriptor sampling patch.
const PATCH_RADIUS: i32 = 13;

#[derive(Debug, Clone, Copy)]
struct Keypoint {
    x: u32,
    y: u32,
    response: f32,
    angle: f32,
}

type Descriptor = [u8; 32];

/// Detector/matcher configuration plus the precomputed test pattern.
pub struct FeatureMatcher {
    fast_threshold: u8,
    max_keypoints: usize,
    pyramid_levels: u32,
    scale_factor: f32,
    pattern: Vec<(i8, i8, i8, i8)>,
}

impl Default for FeatureMatcher {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_keypoints: 500,
            pyramid_levels: 4,
            scale_factor: 1.2,
            pattern: test_pattern(),
        }
    }
}

impl FeatureMatcher {
    /// Count the robust feature correspondences between two images.
    ///
    /// This is the most expensive comparison in the pipeline, superlinear in
    /// resolution, and is expected to run rarely.
    pub fn matched_features(&self, a: &DynamicImage, b: &DynamicImage) -> usize {
        let desc_a = self.describe(&a.to_luma8());
        let desc_b = self.describe(&b.to_luma8());
        count_ratio_test_matches(&desc_a, &desc_b)
    }

    /// Detect and describe keypoints across the pyramid, keeping the
    /// strongest `max_keypoints`.
    fn describe(&self, image: &GrayImage) -> Vec<Descriptor> {
        let mut scored: Vec<(f32, Descriptor)> = Vec::new();
        let mut level = image.clone();

        for _ in 0..self.pyramid_levels {
            if level.width() < 40 || level.height() < 40 {
                break;
            }
            for kp in self.detect(&level) {
                scored.push((kp.response, self.describe_keypoint(&level, &kp)));
            }
            let w = (level.width() as f32 / self.scale_factor) as u32;
            let h = (level.height() as f32 / self.scale_factor) as u32;
            level = imageops::resize(&level, w, h, FilterType::Gaussian);
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(self.max_keypoints);
        scored.into_iter().map(|(_, d)| d).collect()
    }

    /// FAST-16 corner detection with a cardinal-point pre-check, followed by
    /// per-cell non-maximum suppression.
    fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        let (width, height) = image.dimensions();
        if width <= 6 || height <= 6 {
            return Vec::new();
        }

        // One surviving keypoint per 8×8 cell, the strongest. Ordered map so
        // the detection output is reproducible run to run.
        let mut best_per_cell: BTreeMap<(u32, u32), Keypoint> = BTreeMap::new();
        for y in 3..height - 3 {
            for x in 3..width - 3 {
                let center = image.get_pixel(x, y).0[0];
                if !self.cardinal_pre_check(image, x, y, center) {
                    continue;
                }
                if !self.is_corner(image, x, y, center) {
                    continue;
                }
                let kp = Keypoint {
                    x,
                    y,
                    response: local_contrast(image, x, y),
                    angle: orientation(image, x, y),
                };
                best_per_cell
                    .entry((x / 8, y / 8))
                    .and_modify(|existing| {
                        if kp.response > existing.response {
                            *existing = kp;
                        }
                    })
                    .or_insert(kp);
            }
        }
        best_per_cell.into_values().collect()
    }

    /// Cheap rejection: at least 3 of the 4 cardinal ring pixels must be
    /// uniformly brighter or darker than the center.
    fn cardinal_pre_check(&self, image: &GrayImage, x: u32, y: u32, center: u8) -> bool {
        let bright = center.saturating_add(self.fast_threshold);
        let dark = center.saturating_sub(self.fast_threshold);
        let ring = [
            image.get_pixel(x, y - 3).0[0],
            image.get_pixel(x + 3, y).0[0],
            image.get_pixel(x, y + 3).0[0],
            image.get_pixel(x - 3, y).0[0],
        ];
        let brighter = ring.iter().filter(|&&p| p > bright).count();
        let darker = ring.iter().filter(|&&p| p < dark).count();
        brighter >= 3 || darker >= 3
    }

    /// Full FAST test: 9 contiguous ring pixels all brighter or all darker
    /// than the center, with wraparound.
    fn is_corner(&self, image: &GrayImage, x: u32, y: u32, center: u8) -> bool {
        const RING: [(i32, i32); 16] = [
            (0, -3),
            (1, -3),
            (2, -2),
            (3, -1),
            (3, 0),
            (3, 1),
            (2, 2),
            (1, 3),
            (0, 3),
            (-1, 3),
            (-2, 2),
            (-3, 1),
            (-3, 0),
            (-3, -1),
            (-2, -2),
            (-1, -3),
        ];
        let bright = center.saturating_add(self.fast_threshold);
        let dark = center.saturating_sub(self.fast_threshold);

        let mut bright_run = 0u32;
        let mut dark_run = 0u32;
        for i in 0..RING.len() * 2 {
            let (dx, dy) = RING[i % RING.len()];
            let p = image
                .get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)
                .0[0];
            if p > bright {
                bright_run += 1;
                dark_run = 0;
            } else if p < dark {
                dark_run += 1;
                bright_run = 0;
            } else {
                bright_run = 0;
                dark_run = 0;
            }
            if bright_run >= 9 || dark_run >= 9 {
                return true;
            }
        }
        false
    }

    /// 256-bit descriptor: each test compares two patch pixels, with the
    /// test pair rotated by the keypoint orientation.
    fn describe_keypoint(&self, image: &GrayImage, kp: &Keypoint) -> Descriptor {
        let mut descriptor = [0u8; 32];
        let (sin, cos) = kp.angle.sin_cos();
        let clamp = |v: i32, max: u32| v.clamp(0, max as i32 - 1) as u32;

        for (test, &(x1, y1, x2, y2)) in self.pattern.iter().enumerate() {
            let rotate = |dx: i8, dy: i8| {
                let rx = (f32::from(dx) * cos - f32::from(dy) * sin).round() as i32;
                let ry = (f32::from(dx) * sin + f32::from(dy) * cos).round() as i32;
                (
                    clamp(kp.x as i32 + rx, image.width()),
                    clamp(kp.y as i32 + ry, image.height()),
                )
            };
            let (ax, ay) = rotate(x1, y1);
            let (bx, by) = rotate(x2, y2);
            if image.get_pixel(ax, ay).0[0] < image.get_pixel(bx, by).0[0] {
                descriptor[test / 8] |= 1 << (test % 8);
            }
        }
        descriptor
    }
}

/// Corner strength: intensity standard deviation over a 5×5 window.
fn local_contrast(image: &GrayImage, x: u32, y: u32) -> f32 {
    let mut sum = 0.0f32;
    let mut sum_sq = 0.0f32;
    let mut count = 0u32;
    for dy in -2i32..=2 {
        for dx in -2i32..=2 {
            let px = x as i32 + dx;
            let py = y as i32 + dy;
            if px >= 0 && py >= 0 && (px as u32) < image.width() && (py as u32) < image.height() {
                let v = f32::from(image.get_pixel(px as u32, py as u32).0[0]);
                sum += v;
                sum_sq += v * v;
                count += 1;
            }
        }
    }
    let mean = sum / count as f32;
    (sum_sq / count as f32 - mean * mean).max(0.0).sqrt()
}

/// Intensity-centroid orientation over a radius-15 disc.
fn orientation(image: &GrayImage, x: u32, y: u32) -> f32 {
    const RADIUS: i32 = 15;
    let mut m01 = 0.0f32;
    let mut m10 = 0.0f32;
    for dy in -RADIUS..=RADIUS {
        for dx in -RADIUS..=RADIUS {
            if dx * dx + dy * dy > RADIUS * RADIUS {
                continue;
            }
            let px = x as i32 + dx;
            let py = y as i32 + dy;
            if px >= 0 && py >= 0 && (px as u32) < image.width() && (py as u32) < image.height() {
                let v = f32::from(image.get_pixel(px as u32, py as u32).0[0]);
                m01 += v * dy as f32;
                m10 += v * dx as f32;
            }
        }
    }
    m01.atan2(m10)
}

/// For every descriptor in `a`, find its two nearest neighbors in `b` by
/// Hamming distance and keep the pairing only when the nearest is decisively
/// closer than the runner-up.
fn count_ratio_test_matches(a: &[Descriptor], b: &[Descriptor]) -> usize {
    if b.len() < 2 {
        return 0;
    }
    a.iter()
        .filter(|&desc| {
            let mut nearest = u32::MAX;
            let mut second = u32::MAX;
            for other in b {
                let d = hamming(desc, other);
                if d < nearest {
                    second = nearest;
                    nearest = d;
                } else if d < second {
                    second = d;
                }
            }
            second > 0 && (nearest as f32) < RATIO_THRESHOLD * second as f32
        })
        .count()
}

fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Deterministic binary-test layout inside the descriptor patch. A fixed
/// xorshift seed replaces ORB's learned pattern so every run, and every
/// image, samples the same point pairs.
fn test_pattern() -> Vec<(i8, i8, i8, i8)> {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let mut next_offset = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % (2 * PATCH_RADIUS as u64 + 1)) as i8 - PATCH_RADIUS as i8
    };
    (0..PATTERN_TESTS)
        .map(|_| (next_offset(), next_offset(), next_offset(), next_offset()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Deterministic blocky noise with plenty of corners.
    fn textured(size: u32) -> DynamicImage {
        let img = GrayImage::from_fn(size, size, |x, y| {
            let cell = (x / 4).wrapping_mul(2_654_435_761) ^ (y / 4).wrapping_mul(40_503);
            Luma([(cell >> 3) as u8])
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn pattern_is_deterministic_and_bounded() {
        let a = test_pattern();
        let b = test_pattern();
        assert_eq!(a, b);
        assert_eq!(a.len(), PATTERN_TESTS);
        for &(x1, y1, x2, y2) in &a {
            for v in [x1, y1, x2, y2] {
                assert!((i32::from(v)).abs() <= PATCH_RADIUS);
            }
        }
    }

    #[test]
    fn identical_textured_images_produce_matches() {
        let matcher = FeatureMatcher::default();
        let img = textured(128);
        assert!(matcher.matched_features(&img, &img) > 0);
    }

    #[test]
    fn flat_images_produce_no_keypoints() {
        let matcher = FeatureMatcher::default();
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(96, 96, Luma([90])));
        assert_eq!(matcher.matched_features(&flat, &textured(96)), 0);
        assert_eq!(matcher.matched_features(&flat, &flat), 0);
    }

    #[test]
    fn match_count_is_deterministic() {
        let matcher = FeatureMatcher::default();
        let a = textured(128);
        let b = textured(128);
        let first = matcher.matched_features(&a, &b);
        let second = matcher.matched_features(&a, &b);
        assert_eq!(first, second);
    }

    #[test]
    fn too_few_descriptors_yield_zero_matches() {
        assert_eq!(count_ratio_test_matches(&[[0u8; 32]], &[[0u8; 32]]), 0);
        assert_eq!(count_ratio_test_matches(&[], &[]), 0);
    }
}
