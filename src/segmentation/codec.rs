use image::RgbaImage;
use ndarray::{Array4, ArrayViewD};

use super::types::AlphaMatte;
use crate::error::FormatError;
use crate::frame::Frame;

/// Convert an RGBA buffer into a normalized planar tensor
///
/// Steps:
/// 1. Check the buffer holds exactly `width * height` RGBA pixels
/// 2. Convert to float and normalize to [0, 1]
/// 3. Split into R, G, B planes (alpha is discarded)
///
/// Scaling to the inference size happens at capture time, not here.
///
/// Returns: Array4<f32> with shape [1, 3, height, width]
pub fn encode(rgba: &[u8], width: u32, height: u32) -> Result<Array4<f32>, FormatError> {
    let _span = tracing::debug_span!("encode").entered();

    let (w, h) = (width as usize, height as usize);
    let plane = w * h;
    if rgba.len() != plane * 4 {
        return Err(FormatError::BufferSize {
            expected: plane * 4,
            actual: rgba.len(),
        });
    }

    let mut data = vec![0.0f32; plane * 3];
    let (r, rest) = data.split_at_mut(plane);
    let (g, b) = rest.split_at_mut(plane);
    for (i, px) in rgba.chunks_exact(4).enumerate() {
        r[i] = px[0] as f32 / 255.0;
        g[i] = px[1] as f32 / 255.0;
        b[i] = px[2] as f32 / 255.0;
    }

    Array4::from_shape_vec((1, 3, h, w), data).map_err(|_| FormatError::TensorShape {
        expected: vec![1, 3, h, w],
        actual: vec![plane * 3],
    })
}

pub fn encode_frame(frame: &Frame) -> Result<Array4<f32>, FormatError> {
    encode(frame.image().as_raw(), frame.width(), frame.height())
}

/// Read the model's single-channel output, shape [1, 1, H, W], into a matte.
pub fn decode(output: ArrayViewD<'_, f32>) -> Result<AlphaMatte, FormatError> {
    let shape = output.shape();
    if shape.len() != 4 || shape[0] != 1 || shape[1] != 1 {
        let expected = match shape {
            [.., h, w] => vec![1, 1, *h, *w],
            _ => vec![1, 1],
        };
        return Err(FormatError::TensorShape {
            expected,
            actual: shape.to_vec(),
        });
    }

    let (height, width) = (shape[2] as u32, shape[3] as u32);
    let data: Vec<f32> = output.iter().copied().collect();
    AlphaMatte::new(width, height, data)
}

/// Grayscale visualization of a matte, opaque.
pub fn matte_to_rgba(matte: &AlphaMatte) -> RgbaImage {
    RgbaImage::from_fn(matte.width(), matte.height(), |x, y| {
        let value = (matte.get(x, y) * 255.0).round().clamp(0.0, 255.0) as u8;
        image::Rgba([value, value, value, 255])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, ArrayD, IxDyn};

    #[test]
    fn encode_is_planar_rgb() {
        // 2x1 image: red then blue
        let rgba = [255, 0, 0, 255, 0, 0, 255, 255];
        let tensor = encode(&rgba, 2, 1).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
        assert_eq!(tensor[[0, 0, 0, 1]], 0.0);
        assert_eq!(tensor[[0, 2, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 0, 1]], 1.0);
    }

    #[test]
    fn encode_rejects_wrong_buffer_size() {
        let err = encode(&[0u8; 15], 2, 2).unwrap_err();
        assert_eq!(
            err,
            FormatError::BufferSize {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn channel_plane_decodes_within_quantization() {
        let (w, h) = (5u32, 3u32);
        let rgba: Vec<u8> = (0..w * h * 4).map(|i| (i * 17 % 256) as u8).collect();
        let tensor = encode(&rgba, w, h).unwrap();

        for c in 0..3 {
            let plane = tensor.slice(s![.., c..c + 1, .., ..]).into_dyn();
            let matte = decode(plane).unwrap();
            assert_eq!(matte.dimensions(), (w, h));
            for (i, v) in matte.data().iter().enumerate() {
                let original = rgba[i * 4 + c] as f32 / 255.0;
                assert!((v - original).abs() <= 1.0 / 255.0);
            }
        }
    }

    #[test]
    fn decode_rejects_multi_channel_output() {
        let output = ArrayD::<f32>::zeros(IxDyn(&[1, 2, 4, 4]));
        assert!(matches!(
            decode(output.view()),
            Err(FormatError::TensorShape { .. })
        ));
    }
}
