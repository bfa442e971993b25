//! Channel signature extraction.
//!
//! An image is reduced, per color channel, to a 64-bit fingerprint: take the
//! channel plane in YCbCr space, blur away noise and compression artifacts,
//! stretch and equalize the intensity range, shrink to an 8×8 grid, and
//! binarize each cell against its neighborhood. The same parameters are used
//! for every image so the resulting bit vectors are directly comparable.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};

/// Side length of the down-sampled grid; one bit per cell.
pub const GRID: u32 = 8;

/// Bits in a single channel signature.
pub const SIGNATURE_BITS: u32 = GRID * GRID;

/// The channel planes a signature is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Luma,
    ChromaU,
    ChromaV,
}

/// Planes processed for every image, in signature order.
pub const ACTIVE_CHANNELS: [Channel; 3] = [Channel::Luma, Channel::ChromaU, Channel::ChromaV];

/// Per-channel signatures of one image.
///
/// The `aux` slot is reserved for a fourth plane; it stays 0 unless populated
/// and then contributes its full bit count to the pair score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureSet {
    pub luma: u64,
    pub chroma_u: u64,
    pub chroma_v: u64,
    pub aux: u64,
}

impl SignatureSet {
    /// Active planes in signature order, for the vector output stream.
    pub fn planes(&self) -> [u64; 3] {
        [self.luma, self.chroma_u, self.chroma_v]
    }
}

/// Compute the signatures of all active channels.
///
/// A single-channel source has no chroma information; every requested plane
/// degrades to the luma plane, exactly as the signatures of a desaturated
/// color image would. The caller is expected to surface that once per run.
pub fn extract(image: &DynamicImage) -> SignatureSet {
    SignatureSet {
        luma: channel_signature(image, Channel::Luma),
        chroma_u: channel_signature(image, Channel::ChromaU),
        chroma_v: channel_signature(image, Channel::ChromaV),
        aux: 0,
    }
}

/// Reduce one channel of `image` to a 64-bit signature.
pub fn channel_signature(image: &DynamicImage, channel: Channel) -> u64 {
    let plane = channel_plane(image, channel);
    let mut plane = adaptive_blur(&plane);
    normalize(&mut plane);
    equalize(&mut plane);
    let cells = downsample(&plane);
    binarize(&cells)
}

/// True when the source carries no chroma of its own.
pub fn is_single_channel(image: &DynamicImage) -> bool {
    !image.color().has_color()
}

/// Extract the selected plane as a single-channel intensity image.
fn channel_plane(image: &DynamicImage, channel: Channel) -> GrayImage {
    if is_single_channel(image) || channel == Channel::Luma {
        return image.to_luma8();
    }
    let rgb = image.to_rgb8();
    let mut plane = GrayImage::new(rgb.width(), rgb.height());
    for (src, dst) in rgb.pixels().zip(plane.pixels_mut()) {
        let [r, g, b] = src.0;
        let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
        // BT.601 chroma, offset to the 0-255 range.
        let value = match channel {
            Channel::Luma => unreachable!(),
            Channel::ChromaU => 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b,
            Channel::ChromaV => 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b,
        };
        dst.0 = [value.round().clamp(0.0, 255.0) as u8];
    }
    plane
}

/// Gaussian blur with a sigma scaled to the image size, so large photos and
/// thumbnails lose a comparable amount of detail.
fn adaptive_blur(plane: &GrayImage) -> GrayImage {
    let short_side = plane.width().min(plane.height()) as f32;
    let sigma = (short_side / 256.0).max(1.0);
    imageops::blur(plane, sigma)
}

/// Stretch the intensity range to 0-255. Flat planes are left untouched.
fn normalize(plane: &mut GrayImage) {
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for p in plane.pixels() {
        min = min.min(p.0[0]);
        max = max.max(p.0[0]);
    }
    if min >= max {
        return;
    }
    let span = u32::from(max - min);
    for p in plane.pixels_mut() {
        let v = u32::from(p.0[0] - min);
        p.0[0] = ((v * 255 + span / 2) / span) as u8;
    }
}

/// Classic CDF histogram equalization to maximize contrast. Flat planes are
/// left untouched.
fn equalize(plane: &mut GrayImage) {
    let mut histogram = [0u32; 256];
    for p in plane.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let total: u32 = plane.width() * plane.height();
    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (value, count) in histogram.iter().enumerate() {
        running += count;
        cdf[value] = running;
    }
    let cdf_min = cdf
        .iter()
        .copied()
        .find(|&c| c > 0)
        .unwrap_or(0);
    if cdf_min >= total {
        return; // single intensity value
    }

    let scale = total - cdf_min;
    for p in plane.pixels_mut() {
        let c = cdf[p.0[0] as usize] - cdf_min;
        p.0[0] = ((u64::from(c) * 255 + u64::from(scale) / 2) / u64::from(scale)) as u8;
    }
}

/// Shrink to the fixed signature grid.
fn downsample(plane: &GrayImage) -> GrayImage {
    if plane.width() == GRID && plane.height() == GRID {
        return plane.clone();
    }
    imageops::resize(plane, GRID, GRID, FilterType::Triangle)
}

/// Binarize each cell against the mean of its 3×3 neighborhood and pack the
/// bits in raster order, least significant bit first.
fn binarize(cells: &GrayImage) -> u64 {
    debug_assert_eq!((cells.width(), cells.height()), (GRID, GRID));
    let mut signature = 0u64;
    for y in 0..GRID {
        for x in 0..GRID {
            let mut sum = 0u32;
            let mut count = 0u32;
            for ny in y.saturating_sub(1)..=(y + 1).min(GRID - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(GRID - 1) {
                    sum += u32::from(cells.get_pixel(nx, ny).0[0]);
                    count += 1;
                }
            }
            let cell = u32::from(cells.get_pixel(x, y).0[0]);
            // cell > mean, kept in integer arithmetic
            if cell * count > sum {
                signature |= 1u64 << (y * GRID + x);
            }
        }
    }
    signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn solid_gray(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([value])))
    }

    /// Checkerboard with `block`-sized tiles, starting bright at the origin.
    fn checkerboard(size: u32, block: u32, invert: bool) -> DynamicImage {
        let img = GrayImage::from_fn(size, size, |x, y| {
            let bright = ((x / block) + (y / block)) % 2 == 0;
            Luma([if bright != invert { 255 } else { 0 }])
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn solid_black_reduces_to_all_zero_signature() {
        let sig = extract(&solid_gray(64, 64, 0));
        assert_eq!(sig, SignatureSet::default());
    }

    #[test]
    fn extraction_is_deterministic() {
        let img = checkerboard(64, 8, false);
        assert_eq!(extract(&img), extract(&img));
    }

    #[test]
    fn checkerboard_and_inverse_differ_in_every_luma_bit() {
        let a = channel_signature(&checkerboard(64, 8, false), Channel::Luma);
        let b = channel_signature(&checkerboard(64, 8, true), Channel::Luma);
        assert_eq!((a ^ b).count_ones(), SIGNATURE_BITS);
    }

    #[test]
    fn gray_input_degrades_chroma_to_the_luma_plane() {
        let img = checkerboard(64, 8, false);
        let luma = channel_signature(&img, Channel::Luma);
        assert_eq!(channel_signature(&img, Channel::ChromaU), luma);
        assert_eq!(channel_signature(&img, Channel::ChromaV), luma);
    }

    #[test]
    fn chroma_planes_of_color_input_are_independent() {
        // Red and blue differ strongly in both chroma planes but share
        // nothing with a desaturated rendition.
        let rgb = image::RgbImage::from_fn(64, 64, |x, _| {
            if x < 32 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        let img = DynamicImage::ImageRgb8(rgb);
        let u = channel_signature(&img, Channel::ChromaU);
        let v = channel_signature(&img, Channel::ChromaV);
        // Cb is high where blue dominates, Cr where red dominates; the two
        // planes binarize to complementary halves.
        assert_ne!(u, v);
    }

    #[test]
    fn flat_plane_binarizes_to_zero() {
        let cells = GrayImage::from_pixel(GRID, GRID, Luma([137]));
        assert_eq!(binarize(&cells), 0);
    }
}
