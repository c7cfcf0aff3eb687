//! 3x3 kernels over a matte: Gaussian edge smoothing and a
//! close-then-smooth refinement that fills pinholes in the subject.

use image::{imageops, ImageBuffer, Luma};

use crate::segmentation::AlphaMatte;

const GAUSSIAN: [f32; 9] = [1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0];
const CROSS: [f32; 9] = [0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 0.0];
const CROSS_TAPS: f32 = 5.0;

type MatteBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// `filter3x3` normalizes by the kernel sum and clamps to [0, 1]. The input
/// is padded by one replicated pixel so every output pixel sees a full
/// neighbourhood.
fn filter(data: &[f32], width: usize, height: usize, kernel: &[f32; 9]) -> Vec<f32> {
    let (w, h) = (width as u32, height as u32);
    let padded = MatteBuffer::from_fn(w + 2, h + 2, |x, y| {
        let sx = (x as usize).saturating_sub(1).min(width - 1);
        let sy = (y as usize).saturating_sub(1).min(height - 1);
        Luma([data[sy * width + sx]])
    });
    let filtered: MatteBuffer = imageops::filter3x3(&padded, &kernel[..]);
    imageops::crop_imm(&filtered, 1, 1, w, h).to_image().into_raw()
}

/// Gaussian blur of the interior; the one-pixel border is copied unchanged.
pub fn smooth_edges(data: &mut [f32], width: usize, height: usize) {
    if width < 3 || height < 3 {
        return;
    }
    let blurred = filter(data, width, height, &GAUSSIAN);
    for y in 1..height - 1 {
        let row = y * width;
        data[row + 1..row + width - 1].copy_from_slice(&blurred[row + 1..row + width - 1]);
    }
}

/// Cross-kernel close, max with the input, Gaussian smooth, clip to [0, 1].
pub fn refine(matte: &AlphaMatte) -> AlphaMatte {
    let _span = tracing::debug_span!("refine").entered();

    let (w, h) = (matte.width() as usize, matte.height() as usize);
    if w == 0 || h == 0 {
        return matte.clone();
    }
    let input: Vec<f32> = matte.data().iter().map(|v| v.clamp(0.0, 1.0)).collect();

    // The cross mean of values in [0, 1] never clamps, so scaling it back
    // recovers the unnormalized sum.
    let closed: Vec<f32> = filter(&input, w, h, &CROSS)
        .into_iter()
        .zip(&input)
        .map(|(mean, i)| (mean * CROSS_TAPS).max(*i))
        .collect();
    let smoothed = filter(&closed, w, h, &GAUSSIAN)
        .into_iter()
        .map(|v| v.clamp(0.0, 1.0))
        .collect();
    AlphaMatte::from_raw_parts(matte.width(), matte.height(), smoothed)
}
