use backdrop::compositor::{upscale_matte, BackgroundSpec, Compositor, Overlay, PhotoHandle};
use backdrop::config::CompositorConfig;
use backdrop::AlphaMatte;
use image::{Rgba, RgbaImage};

fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8, 255])
    })
}

#[test]
fn zero_alpha_shows_background_exactly() {
    let mut compositor = Compositor::new(CompositorConfig::default());
    let source = gradient(64, 48);
    let matte = AlphaMatte::filled(32, 16, 0.0);

    let out = compositor.compose(&source, &matte, &BackgroundSpec::Color([12, 34, 56]), &[]);
    assert_eq!(out.dimensions(), (64, 48));
    assert!(out.pixels().all(|p| p.0 == [12, 34, 56, 255]));
}

#[test]
fn full_alpha_shows_source_exactly() {
    let mut compositor = Compositor::new(CompositorConfig::default());
    let source = gradient(64, 48);
    let matte = AlphaMatte::filled(16, 16, 1.0);

    let out = compositor.compose(&source, &matte, &BackgroundSpec::Color([255, 0, 0]), &[]);
    assert_eq!(out, source);
}

#[test]
fn full_alpha_hides_overlays() {
    let mut compositor = Compositor::new(CompositorConfig::default());
    let source = gradient(32, 32);
    let matte = AlphaMatte::filled(8, 8, 1.0);
    let overlay = Overlay::new(RgbaImage::from_pixel(32, 32, Rgba([255, 255, 0, 255])));

    let out = compositor.compose(&source, &matte, &BackgroundSpec::Color([0, 0, 0]), &[overlay]);
    assert_eq!(out, source);
}

#[test]
fn blur_background_matches_source_size() {
    let mut compositor = Compositor::new(CompositorConfig::default());
    let source = RgbaImage::from_pixel(40, 30, Rgba([90, 90, 90, 255]));
    let matte = AlphaMatte::filled(10, 10, 0.0);

    let out = compositor.compose(&source, &matte, &BackgroundSpec::Blur { radius: 5.0 }, &[]);
    assert_eq!(out.dimensions(), (40, 30));
    // Blurring a flat image leaves it flat.
    assert!(out.pixels().all(|p| p[0].abs_diff(90) <= 1 && p[3] == 255));
}

#[test]
fn photo_background_is_scaled_to_output() {
    let mut compositor = Compositor::new(CompositorConfig::default());
    let source = gradient(50, 20);
    let photo = PhotoHandle::ready(RgbaImage::from_pixel(7, 3, Rgba([1, 2, 3, 255])));
    let matte = AlphaMatte::filled(4, 4, 0.0);

    let out = compositor.compose(&source, &matte, &BackgroundSpec::Photo(photo), &[]);
    assert_eq!(out.dimensions(), (50, 20));
    assert!(out
        .pixels()
        .all(|p| p[0].abs_diff(1) <= 1 && p[1].abs_diff(2) <= 1 && p[2].abs_diff(3) <= 1));
}

#[test]
fn upscaled_edge_has_intermediate_values() {
    // Hard vertical edge at inference resolution.
    let matte = AlphaMatte::new(4, 1, vec![0.0, 0.0, 1.0, 1.0]).unwrap();
    let mut out = Vec::new();
    upscale_matte(&matte, 16, 1, &mut out);

    let partial = out.iter().filter(|v| **v > 0.0 && **v < 1.0).count();
    assert!(partial >= 2, "nearest-neighbour style step: {out:?}");
}

const RED: [u8; 4] = [200, 10, 10, 255];
const BLUE: [u8; 4] = [10, 10, 200, 255];

fn solid(rgba: [u8; 4]) -> BackgroundSpec {
    BackgroundSpec::Photo(PhotoHandle::ready(RgbaImage::from_pixel(24, 16, Rgba(rgba))))
}

#[test]
fn fresh_photo_every_frame_is_never_stale() {
    let mut compositor = Compositor::new(CompositorConfig::default());
    let source = gradient(24, 16);
    let matte = AlphaMatte::filled(8, 8, 0.0);

    for round in 0..50 {
        let expected = if round % 2 == 0 { RED } else { BLUE };
        // Each handle is dropped after its frame, so allocations get reused.
        let out = compositor.compose(&source, &matte, &solid(expected), &[]);
        assert!(
            out.pixels().all(|p| p.0 == expected),
            "round {round} showed {:?}",
            out.get_pixel(0, 0)
        );
    }
}

#[test]
fn background_switches_between_photo_and_color() {
    let mut compositor = Compositor::new(CompositorConfig::default());
    let source = gradient(24, 16);
    let matte = AlphaMatte::filled(8, 8, 0.0);
    let red = solid(RED);
    let blue = solid(BLUE);

    let out = compositor.compose(&source, &matte, &red, &[]);
    assert!(out.pixels().all(|p| p.0 == RED));

    let out = compositor.compose(&source, &matte, &BackgroundSpec::Color([0, 255, 0]), &[]);
    assert!(out.pixels().all(|p| p.0 == [0, 255, 0, 255]));

    // A different photo while the red one is still cached and alive.
    let out = compositor.compose(&source, &matte, &blue, &[]);
    assert!(out.pixels().all(|p| p.0 == BLUE));

    let out = compositor.compose(&source, &matte, &red, &[]);
    assert!(out.pixels().all(|p| p.0 == RED));
}

#[test]
fn missing_photo_file_keeps_fallback_color() {
    let mut compositor = Compositor::new(CompositorConfig::default());
    let source = gradient(16, 16);
    let matte = AlphaMatte::filled(4, 4, 0.0);
    let photo = PhotoHandle::load("/nonexistent/backdrop/photo.png");

    std::thread::sleep(std::time::Duration::from_millis(50));
    let out = compositor.compose(&source, &matte, &BackgroundSpec::Photo(photo.clone()), &[]);
    assert!(!photo.is_loaded());
    assert!(out.pixels().all(|p| p.0 == [46, 46, 46, 255]));
}

#[test]
fn loaded_photo_replaces_fallback() {
    let path = std::env::temp_dir().join(format!("backdrop-photo-{}.png", std::process::id()));
    RgbaImage::from_pixel(16, 16, Rgba(BLUE)).save(&path).unwrap();

    let mut compositor = Compositor::new(CompositorConfig::default());
    let source = gradient(16, 16);
    let matte = AlphaMatte::filled(4, 4, 0.0);
    let photo = PhotoHandle::load(&path);
    let spec = BackgroundSpec::Photo(photo.clone());

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !photo.is_loaded() {
        // Until the decode lands, the fallback is shown.
        let out = compositor.compose(&source, &matte, &spec, &[]);
        assert!(out.pixels().all(|p| p.0 == [46, 46, 46, 255] || p.0 == BLUE));
        assert!(std::time::Instant::now() < deadline, "photo never loaded");
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    let out = compositor.compose(&source, &matte, &spec, &[]);
    assert!(out.pixels().all(|p| p.0 == BLUE));
    let _ = std::fs::remove_file(&path);
}
