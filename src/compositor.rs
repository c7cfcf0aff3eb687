//! Final frame assembly: background, overlays, matte and foreground.
//!
//! Every per-pixel loop here runs at the output (display) resolution. The
//! matte is the thing that gets upscaled, never the video.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use image::{imageops, ImageBuffer, Luma, Rgba, RgbaImage};

use crate::config::{parse_hex_color, CompositorConfig, FeatherConfig, SpillConfig};
use crate::refine;
use crate::segmentation::AlphaMatte;

/// The displayed frame. Always fully opaque.
pub type CompositedFrame = RgbaImage;

/// Still image for photo backgrounds; empty until the decode finishes.
#[derive(Debug, Clone, Default)]
pub struct PhotoHandle {
    image: Arc<OnceLock<RgbaImage>>,
}

impl PhotoHandle {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn ready(image: RgbaImage) -> Self {
        let handle = Self::pending();
        handle.fulfil(image);
        handle
    }

    /// Decode `path` on a background thread.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let handle = Self::pending();
        let target = handle.clone();
        let path: PathBuf = path.as_ref().to_path_buf();

        let spawned = std::thread::Builder::new()
            .name("photo-loader".to_string())
            .spawn(move || match image::open(&path) {
                Ok(decoded) => {
                    tracing::info!("Background image loaded: {}", path.display());
                    target.fulfil(decoded.to_rgba8());
                }
                Err(err) => {
                    tracing::error!("Failed to load background image {}: {}", path.display(), err);
                }
            });
        if let Err(err) = spawned {
            tracing::error!("Failed to start background image loader: {}", err);
        }
        handle
    }

    /// Returns false if an image was already set.
    pub fn fulfil(&self, image: RgbaImage) -> bool {
        self.image.set(image).is_ok()
    }

    pub fn image(&self) -> Option<&RgbaImage> {
        self.image.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.image.get().is_some()
    }

    fn is(&self, other: &Arc<OnceLock<RgbaImage>>) -> bool {
        Arc::ptr_eq(&self.image, other)
    }
}

#[derive(Debug, Clone)]
pub enum BackgroundSpec {
    /// Gaussian blur of the live frame, sigma in output pixels.
    Blur { radius: f32 },
    Color([u8; 3]),
    Photo(PhotoHandle),
}

impl Default for BackgroundSpec {
    fn default() -> Self {
        Self::Blur { radius: 15.0 }
    }
}

/// RGBA layer drawn over the background before the subject is blended in,
/// so the subject occludes it. Scaled to the output size if needed.
#[derive(Debug, Clone)]
pub struct Overlay {
    image: RgbaImage,
}

impl Overlay {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

pub struct Compositor {
    config: CompositorConfig,
    fallback: [u8; 3],
    background: RgbaImage,
    alpha: Vec<f32>,
    /// Scaled copy of the last photo, keyed by the handle it came from.
    photo_cache: Option<(Arc<OnceLock<RgbaImage>>, RgbaImage)>,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        let fallback = parse_hex_color(&config.photo_fallback);
        Self {
            config,
            fallback,
            background: RgbaImage::new(0, 0),
            alpha: Vec::new(),
            photo_cache: None,
        }
    }

    /// Blend `source` over the background described by `spec` through `matte`.
    ///
    /// The output has the source's dimensions.
    pub fn compose(
        &mut self,
        source: &RgbaImage,
        matte: &AlphaMatte,
        spec: &BackgroundSpec,
        overlays: &[Overlay],
    ) -> CompositedFrame {
        let _span = tracing::debug_span!("composite").entered();
        let (width, height) = source.dimensions();

        self.render_background(source, spec);
        for overlay in overlays {
            draw_overlay(&mut self.background, overlay);
        }

        upscale_matte(matte, width, height, &mut self.alpha);
        if self.config.edge_smoothing {
            refine::smooth_edges(&mut self.alpha, width as usize, height as usize);
        }
        if self.config.feather.enabled {
            feather(&mut self.alpha, &self.config.feather);
        }

        let spill = self.config.spill.enabled.then_some(&self.config.spill);
        let mut output = RgbaImage::new(width, height);
        for (((out, fg), bg), a) in output
            .pixels_mut()
            .zip(source.pixels())
            .zip(self.background.pixels())
            .zip(&self.alpha)
        {
            *out = blend_pixel(fg, bg, *a, spill);
        }
        output
    }

    fn render_background(&mut self, source: &RgbaImage, spec: &BackgroundSpec) {
        let (width, height) = source.dimensions();

        match spec {
            BackgroundSpec::Blur { radius } if *radius > 0.0 => {
                self.background = imageops::fast_blur(source, *radius);
            }
            BackgroundSpec::Blur { .. } => {
                self.background.clone_from(source);
            }
            BackgroundSpec::Color(rgb) => fill(&mut self.background, width, height, *rgb),
            BackgroundSpec::Photo(handle) => match handle.image() {
                Some(photo) => {
                    let stale = match &self.photo_cache {
                        Some((key, scaled)) => {
                            !handle.is(key) || scaled.dimensions() != (width, height)
                        }
                        None => true,
                    };
                    if stale {
                        let scaled = if photo.dimensions() == (width, height) {
                            photo.clone()
                        } else {
                            imageops::resize(photo, width, height, imageops::FilterType::Triangle)
                        };
                        self.photo_cache = Some((Arc::clone(&handle.image), scaled));
                    }
                    if let Some((_, scaled)) = &self.photo_cache {
                        self.background.clone_from(scaled);
                    }
                }
                None => fill(&mut self.background, width, height, self.fallback),
            },
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }
}

fn fill(buffer: &mut RgbaImage, width: u32, height: u32, [r, g, b]: [u8; 3]) {
    if buffer.dimensions() != (width, height) {
        *buffer = RgbaImage::new(width, height);
    }
    buffer.pixels_mut().for_each(|p| *p = Rgba([r, g, b, 255]));
}

/// Source-over of `overlay` onto `target`.
fn draw_overlay(target: &mut RgbaImage, overlay: &Overlay) {
    let (width, height) = target.dimensions();
    let scaled;
    let layer = if overlay.image.dimensions() == (width, height) {
        &overlay.image
    } else {
        scaled = imageops::resize(&overlay.image, width, height, imageops::FilterType::Triangle);
        &scaled
    };

    for (dst, src) in target.pixels_mut().zip(layer.pixels()) {
        let a = src[3] as f32 / 255.0;
        if a == 0.0 {
            continue;
        }
        for c in 0..3 {
            dst[c] = (src[c] as f32 * a + dst[c] as f32 * (1.0 - a)).round() as u8;
        }
    }
}

/// Triangle-filtered resample of `matte` to `width` x `height` into `out`.
/// Stays in f32, so no quantization on the way up.
pub fn upscale_matte(matte: &AlphaMatte, width: u32, height: u32, out: &mut Vec<f32>) {
    let _span = tracing::debug_span!("upscale").entered();

    out.clear();
    let (mw, mh) = matte.dimensions();
    if (mw, mh) == (width, height) {
        out.extend_from_slice(matte.data());
        return;
    }

    match ImageBuffer::<Luma<f32>, &[f32]>::from_raw(mw, mh, matte.data()) {
        Some(source) if mw > 0 && mh > 0 => {
            let scaled = imageops::resize(&source, width, height, imageops::FilterType::Triangle);
            out.extend_from_slice(scaled.as_raw());
        }
        _ => out.resize(width as usize * height as usize, 0.0),
    }
}

/// Soft threshold: 0 at or below `low`, 1 at or above `high`, linear between.
pub fn feather(alpha: &mut [f32], config: &FeatherConfig) {
    let span = config.high - config.low;
    for a in alpha.iter_mut() {
        *a = if *a <= config.low {
            0.0
        } else if *a >= config.high {
            1.0
        } else {
            (*a - config.low) / span
        };
    }
}

/// `fg * a + bg * (1 - a)` per channel, with optional spill suppression
/// darkening the foreground where alpha is partial. Output alpha is opaque.
fn blend_pixel(fg: &Rgba<u8>, bg: &Rgba<u8>, alpha: f32, spill: Option<&SpillConfig>) -> Rgba<u8> {
    let a = alpha.clamp(0.0, 1.0);
    let keep = match spill {
        Some(s) if a < s.threshold => 1.0 - (1.0 - a - s.strength).max(0.0) * s.attenuation,
        _ => 1.0,
    };

    let mut out = [0u8, 0, 0, 255];
    for c in 0..3 {
        let f = fg[c] as f32 * keep;
        let b = bg[c] as f32;
        out[c] = (f * a + b * (1.0 - a)).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upscale_is_smooth_not_blocky() {
        let matte = AlphaMatte::new(2, 1, vec![0.0, 1.0]).unwrap();
        let mut out = Vec::new();
        upscale_matte(&matte, 8, 1, &mut out);
        assert_eq!(out.len(), 8);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[7], 1.0);
        // Interior values ramp instead of stepping.
        assert!(out[3] > 0.0 && out[3] < 1.0);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn feather_ramp() {
        let config = FeatherConfig {
            enabled: true,
            low: 0.2,
            high: 0.6,
        };
        let mut alpha = vec![0.1, 0.2, 0.4, 0.6, 0.9];
        feather(&mut alpha, &config);
        assert_eq!(alpha[0], 0.0);
        assert_eq!(alpha[1], 0.0);
        assert!((alpha[2] - 0.5).abs() < 1e-6);
        assert_eq!(alpha[3], 1.0);
        assert_eq!(alpha[4], 1.0);
    }

    #[test]
    fn spill_darkens_only_partial_edges() {
        let fg = Rgba([200, 200, 200, 255]);
        let bg = Rgba([0, 0, 0, 255]);
        let spill = SpillConfig::default();
        let solid = blend_pixel(&fg, &bg, 1.0, Some(&spill));
        assert_eq!(solid, Rgba([200, 200, 200, 255]));

        let edge = blend_pixel(&fg, &bg, 0.5, Some(&spill));
        let plain = blend_pixel(&fg, &bg, 0.5, None);
        assert!(edge[0] < plain[0]);
    }

    #[test]
    fn photo_falls_back_to_color_until_loaded() {
        let mut compositor = Compositor::new(CompositorConfig::default());
        let source = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let matte = AlphaMatte::filled(2, 2, 0.0);
        let handle = PhotoHandle::pending();
        let spec = BackgroundSpec::Photo(handle.clone());

        let out = compositor.compose(&source, &matte, &spec, &[]);
        assert_eq!(out.get_pixel(0, 0), &Rgba([46, 46, 46, 255]));

        handle.fulfil(RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255])));
        let out = compositor.compose(&source, &matte, &spec, &[]);
        assert_eq!(out.get_pixel(3, 3), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn overlay_sits_behind_subject() {
        let mut compositor = Compositor::new(CompositorConfig::default());
        let source = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 255, 255]));
        // Subject on the left pixel only.
        let matte = AlphaMatte::new(2, 1, vec![1.0, 0.0]).unwrap();
        let overlay = Overlay::new(RgbaImage::from_pixel(2, 1, Rgba([255, 0, 0, 255])));

        let out = compositor.compose(&source, &matte, &BackgroundSpec::Color([0, 0, 0]), &[overlay]);
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
        assert_eq!(out.get_pixel(1, 0), &Rgba([255, 0, 0, 255]));
    }
}
