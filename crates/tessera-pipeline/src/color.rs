//! Representative color of a cell.
//!
//! The average is approximate on purpose: only every `stride`-th pixel is
//! visited, starting with the last pixel of the first block.

use image::RgbaImage;

use crate::types::ColorKey;

/// Default sampling stride: one pixel out of every eight.
pub const DEFAULT_SAMPLE_STRIDE: usize = 8;

/// Average the sampled pixels of `pixels` into a [`ColorKey`].
///
/// Pixels at linear indices `stride - 1`, `2 * stride - 1`, ... are
/// averaged per channel and floored. Blocks holding fewer than `stride`
/// pixels are averaged over every pixel. Alpha is ignored. A `stride` of
/// zero is treated as one.
#[must_use]
pub fn average_color_key(pixels: &RgbaImage, stride: usize) -> ColorKey {
    let count = pixels.width() as usize * pixels.height() as usize;
    if count == 0 {
        return ColorKey::new(0, 0, 0);
    }

    let stride = match stride.max(1) {
        s if s > count => 1,
        s => s,
    };

    let mut sums = [0u64; 3];
    let mut samples = 0u64;
    for p in pixels.pixels().skip(stride - 1).step_by(stride) {
        sums[0] += u64::from(p[0]);
        sums[1] += u64::from(p[1]);
        sums[2] += u64::from(p[2]);
        samples += 1;
    }

    // Each average is at most 255, so the narrowing cannot fail.
    let channel = |sum: u64| u8::try_from(sum / samples).unwrap_or(u8::MAX);
    ColorKey::new(channel(sums[0]), channel(sums[1]), channel(sums[2]))
}
