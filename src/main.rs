use anyhow::{Context, Result};
use backdrop::capture::{CaptureSource, ImageSequenceCapture};
use backdrop::config::{parse_hex_color, AppConfig};
use backdrop::output::{LoopbackOutput, NullOutput, OutputSink};
use backdrop::segmentation::{self, codec};
use backdrop::{BackgroundSpec, Health, MattingPipeline, PhotoHandle};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Image file or directory of frames to replay as the camera
    #[arg(short, long)]
    input: PathBuf,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: PathBuf,

    /// Discard output frames instead of writing them
    #[arg(long)]
    null_output: bool,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to matting model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<PathBuf>,

    /// Runtime thread count
    #[arg(long)]
    threads: Option<usize>,

    /// Short side of the inference resolution
    #[arg(long)]
    target_short_side: Option<u32>,

    /// Blur the real background with this radius (default)
    #[arg(long, conflicts_with_all = ["color", "photo"])]
    blur: Option<f32>,

    /// Replace the background with a flat colour, e.g. "#00ff00"
    #[arg(long, conflicts_with = "photo")]
    color: Option<String>,

    /// Replace the background with a still image
    #[arg(long)]
    photo: Option<PathBuf>,

    /// Process every frame regardless of load
    #[arg(long)]
    presentation: bool,

    /// Show matte visualization (grayscale silhouette) instead of the composite
    #[arg(long)]
    show_matte: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("backdrop starting");

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.model.threads = threads;
    }
    if let Some(side) = args.target_short_side {
        config.capture.target_short_side = side;
    }
    config.adaptive.target_fps = args.fps as f32;
    config.pipeline.presentation_mode |= args.presentation;
    config.validate().context("Invalid configuration")?;

    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);

    let mut capture = ImageSequenceCapture::new(&args.input, args.output_width, args.output_height)
        .context("Failed to initialize capture")?;

    let mut output: Box<dyn OutputSink> = if args.null_output {
        Box::new(NullOutput::new(args.output_width, args.output_height))
    } else {
        Box::new(
            LoopbackOutput::new(&args.output_device, args.output_width, args.output_height)
                .context("Failed to initialize loopback output")?,
        )
    };

    let mut pipeline =
        MattingPipeline::passthrough(config.clone()).context("Invalid configuration")?;
    if let Some(model_path) = &args.model {
        tracing::info!("Loading matting model from {}", model_path.display());
        match segmentation::create_default_session(model_path, &config.model) {
            Ok(session) => {
                pipeline
                    .attach(session)
                    .context("Failed to start inference worker")?;
                tracing::info!("Matting model loaded successfully");
            }
            Err(err) => {
                tracing::error!("Failed to load matting model: {}", err);
                tracing::error!("Continuing in passthrough mode");
            }
        }
    } else {
        tracing::info!("Running in passthrough mode (no segmentation)");
    }

    pipeline.set_background(background_from_args(&args));

    run_pipeline(
        &mut capture,
        output.as_mut(),
        &mut pipeline,
        args.fps,
        args.frames,
        args.show_matte,
    )
}

fn background_from_args(args: &Args) -> BackgroundSpec {
    if let Some(path) = &args.photo {
        BackgroundSpec::Photo(PhotoHandle::load(path))
    } else if let Some(hex) = &args.color {
        BackgroundSpec::Color(parse_hex_color(hex))
    } else if let Some(radius) = args.blur {
        BackgroundSpec::Blur { radius }
    } else {
        BackgroundSpec::default()
    }
}

fn run_pipeline<C>(
    capture: &mut C,
    output: &mut dyn OutputSink,
    pipeline: &mut MattingPipeline,
    target_fps: u32,
    max_frames: Option<u64>,
    show_matte: bool,
) -> Result<()>
where
    C: CaptureSource,
{
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps.max(1) as f32);
    let mut frame_count = 0u64;
    let mut total_capture_time = Duration::ZERO;
    let mut total_pipeline_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;
    let mut reported_failing = false;

    tracing::info!("Starting main pipeline loop");
    tracing::info!("Press Ctrl+C to stop");

    while max_frames.map_or(true, |max| frame_count < max) {
        let loop_start = Instant::now();

        let capture_start = Instant::now();
        let frame = capture
            .capture_frame()
            .context("Failed to capture frame")?;
        total_capture_time += capture_start.elapsed();

        let pipeline_start = Instant::now();
        let composited = pipeline.tick(&frame).context("Pipeline cycle failed")?;
        let output_frame = match (show_matte, pipeline.matte()) {
            (true, Some(matte)) => codec::matte_to_rgba(matte),
            _ => composited,
        };
        total_pipeline_time += pipeline_start.elapsed();

        let output_start = Instant::now();
        output
            .write_frame(&output_frame)
            .context("Failed to write frame")?;
        total_output_time += output_start.elapsed();

        frame_count += 1;

        match pipeline.health() {
            Health::Failing { consecutive } if !reported_failing => {
                tracing::error!("Matting is failing ({} consecutive errors)", consecutive);
                reported_failing = true;
            }
            Health::Healthy => reported_failing = false,
            _ => {}
        }

        // Log stats every 30 frames
        if frame_count % 30 == 0 {
            let n = frame_count as f64;
            let avg_capture_ms = total_capture_time.as_secs_f64() * 1000.0 / n;
            let avg_pipeline_ms = total_pipeline_time.as_secs_f64() * 1000.0 / n;
            let avg_output_ms = total_output_time.as_secs_f64() * 1000.0 / n;
            let stats = pipeline.stats();

            tracing::info!(
                "Frame {}: capture={:.1}ms, pipeline={:.1}ms, output={:.1}ms, inference fps={} (avg {:.1}), latency={:.1}ms, downsample={:.2}, skip={}, dropped={}",
                frame_count,
                avg_capture_ms,
                avg_pipeline_ms,
                avg_output_ms,
                stats.fps,
                stats.avg_fps,
                stats.latency_ms,
                stats.downsample,
                stats.frame_skip,
                stats.dropped_frames
            );
        }

        // Frame rate limiting
        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }

    tracing::info!("Stopped after {} frames", frame_count);
    Ok(())
}
