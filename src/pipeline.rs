//! Producer side of the matting pipeline.
//!
//! One call to [`MattingPipeline::tick`] is one display cycle: apply queued
//! control changes, collect finished inference results, maybe submit the new
//! frame, and composite with the freshest matte available.

use std::time::{Duration, Instant};

use image::RgbaImage;

use crate::adaptive::{AdaptiveController, Adjustment};
use crate::compositor::{BackgroundSpec, CompositedFrame, Compositor, Overlay};
use crate::config::AppConfig;
use crate::error::Result;
use crate::frame::{inference_size, scale_for_inference, FramePool};
use crate::segmentation::{AlphaMatte, MattingBackend, RecurrentSession};
use crate::stats::{FpsCounter, PerformanceSample, PipelineStats};
use crate::worker::{InferenceHandle, InferenceJob, WorkerEvent, WorkerOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// Too many inference failures in a row.
    Failing { consecutive: u32 },
}

/// Requests from the control boundary, applied at the start of the next cycle.
#[derive(Debug)]
enum Control {
    Background(BackgroundSpec),
    TargetShortSide(u32),
    DownsampleBounds(f32, f32),
    Overlays(Vec<Overlay>),
    PresentationMode(bool),
    Reset,
}

pub struct MattingPipeline {
    config: AppConfig,
    inference: Option<InferenceHandle>,
    controller: AdaptiveController,
    compositor: Compositor,
    pool: FramePool,
    background: BackgroundSpec,
    overlays: Vec<Overlay>,
    target_short_side: u32,
    presentation: bool,
    controls: Vec<Control>,
    matte: Option<AlphaMatte>,
    seq: u64,
    fps: FpsCounter,
    last_sample: PerformanceSample,
    consecutive_failures: u32,
    failed_frames: u64,
    discarded_frames: u64,
    inference_resolution: Option<(u32, u32)>,
}

impl MattingPipeline {
    /// Start a pipeline with its inference worker running `session`.
    pub fn new<B>(session: RecurrentSession<B>, config: AppConfig) -> Result<Self>
    where
        B: MattingBackend + 'static,
    {
        let mut pipeline = Self::passthrough(config)?;
        pipeline.attach(session)?;
        Ok(pipeline)
    }

    /// A pipeline with no model: frames are shown unmodified until a session
    /// is attached.
    pub fn passthrough(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            controller: AdaptiveController::new(config.adaptive.clone()),
            compositor: Compositor::new(config.compositor.clone()),
            target_short_side: config.capture.target_short_side,
            presentation: config.pipeline.presentation_mode,
            inference: None,
            pool: FramePool::default(),
            background: BackgroundSpec::default(),
            overlays: Vec::new(),
            controls: Vec::new(),
            matte: None,
            seq: 0,
            fps: FpsCounter::new(),
            last_sample: PerformanceSample::default(),
            consecutive_failures: 0,
            failed_frames: 0,
            discarded_frames: 0,
            inference_resolution: None,
            config,
        })
    }

    /// Replace the inference worker. Any previous worker is shut down first.
    pub fn attach<B>(&mut self, session: RecurrentSession<B>) -> Result<()>
    where
        B: MattingBackend + 'static,
    {
        self.inference = None;
        let options = WorkerOptions {
            stabilizer: self.config.stabilizer.clone(),
            refine: self.config.compositor.refine,
            pipelining: self.config.pipeline.pipelining,
        };
        let handle = InferenceHandle::spawn(session, options)?;
        tracing::info!("Inference attached ({})", handle.backend());

        self.inference = Some(handle);
        self.matte = None;
        self.consecutive_failures = 0;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inference.is_some()
    }

    /// Run one display cycle for `captured` and return the frame to present.
    pub fn tick(&mut self, captured: &RgbaImage) -> Result<CompositedFrame> {
        self.apply_controls()?;
        self.collect()?;

        let seq = self.seq;
        self.seq += 1;
        if self.inference.is_some() && seq % u64::from(self.frame_skip()) == 0 {
            self.submit(captured, seq)?;
        }

        let _span = tracing::debug_span!("present", seq).entered();
        let frame = match &self.matte {
            Some(matte) => self
                .compositor
                .compose(captured, matte, &self.background, &self.overlays),
            None => captured.clone(),
        };
        Ok(frame)
    }

    fn submit(&mut self, captured: &RgbaImage, seq: u64) -> Result<()> {
        let (width, height) = captured.dimensions();
        if width == 0 || height == 0 {
            return Ok(());
        }
        let size = inference_size(
            width,
            height,
            self.target_short_side,
            self.config.capture.block_size,
        );

        let frame = match scale_for_inference(captured, size, seq, &mut self.pool) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("Dropping frame {}: {}", seq, err);
                self.discarded_frames += 1;
                return Ok(());
            }
        };

        let job = InferenceJob {
            frame,
            downsample: self.controller.downsample(),
        };
        if let Some(inference) = self.inference.as_mut() {
            if let Some(stale) = inference.submit(job)? {
                self.pool.release(stale.frame);
            }
        }
        Ok(())
    }

    /// Handle every result the worker has ready, without blocking.
    fn collect(&mut self) -> Result<()> {
        let events = match self.inference.as_mut() {
            Some(inference) => inference.poll()?,
            None => return Ok(()),
        };
        for event in events {
            self.handle_event(event);
        }
        Ok(())
    }

    /// Block until nothing is in flight or `timeout` elapses.
    pub fn flush(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while let Some(inference) = self.inference.as_mut() {
            if !inference.in_flight() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!("Timed out waiting for inference");
                break;
            }
            match inference.wait(remaining)? {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Completed(result) => {
                self.pool.release(result.frame);
                self.fps.tick();
                self.last_sample = result.sample;

                match self.controller.observe(&result.sample) {
                    Adjustment::Unchanged => {}
                    Adjustment::Tightened {
                        downsample,
                        frame_skip,
                    } => tracing::info!(
                        "Reducing quality: downsample={:.2}, skip={}",
                        downsample,
                        frame_skip
                    ),
                    Adjustment::Relaxed {
                        downsample,
                        frame_skip,
                    } => tracing::debug!(
                        "Restoring quality: downsample={:.2}, skip={}",
                        downsample,
                        frame_skip
                    ),
                }

                if self.consecutive_failures >= self.config.pipeline.max_consecutive_failures {
                    tracing::info!("Inference recovered after {} failures", self.consecutive_failures);
                }
                self.consecutive_failures = 0;
                self.inference_resolution = Some(result.matte.dimensions());
                self.matte = Some(result.matte);
            }
            WorkerEvent::Failed { seq, error, frame } => {
                self.pool.release(frame);
                self.failed_frames += 1;
                self.consecutive_failures += 1;
                if error.is_contract_violation() {
                    tracing::error!("Model output unusable for frame {}: {}", seq, error);
                    self.consecutive_failures = self
                        .consecutive_failures
                        .max(self.config.pipeline.max_consecutive_failures);
                    return;
                }
                tracing::warn!("Inference failed for frame {}: {}", seq, error);
                if self.consecutive_failures == self.config.pipeline.max_consecutive_failures {
                    tracing::error!(
                        "Inference failed {} times in a row",
                        self.consecutive_failures
                    );
                }
            }
            WorkerEvent::ResetDone => tracing::debug!("Recurrent state cleared"),
            WorkerEvent::Abandoned(job) => {
                tracing::warn!("Frame {} never reached the inference worker", job.frame.seq());
                self.pool.release(job.frame);
                self.discarded_frames += 1;
            }
        }
    }

    fn apply_controls(&mut self) -> Result<()> {
        for control in std::mem::take(&mut self.controls) {
            match control {
                Control::Background(spec) => self.background = spec,
                Control::TargetShortSide(side) => {
                    self.target_short_side = side.max(self.config.capture.block_size);
                }
                Control::DownsampleBounds(min, max) => {
                    self.controller.set_downsample_bounds(min, max);
                }
                Control::Overlays(overlays) => self.overlays = overlays,
                Control::PresentationMode(on) => self.presentation = on,
                Control::Reset => {
                    if let Some(inference) = self.inference.as_mut() {
                        inference.reset()?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn set_background(&mut self, spec: BackgroundSpec) {
        self.controls.push(Control::Background(spec));
    }

    pub fn set_target_short_side(&mut self, side: u32) {
        self.controls.push(Control::TargetShortSide(side));
    }

    pub fn set_downsample_bounds(&mut self, min: f32, max: f32) {
        self.controls.push(Control::DownsampleBounds(min, max));
    }

    pub fn set_overlays(&mut self, overlays: Vec<Overlay>) {
        self.controls.push(Control::Overlays(overlays));
    }

    pub fn set_presentation_mode(&mut self, on: bool) {
        self.controls.push(Control::PresentationMode(on));
    }

    /// Drop temporal continuity. The in-flight frame still completes; frames
    /// dispatched after the next cycle start a fresh chain.
    pub fn reset(&mut self) {
        self.controls.push(Control::Reset);
    }

    /// Process every Nth captured frame.
    pub fn frame_skip(&self) -> u32 {
        if self.presentation {
            1
        } else {
            self.controller.frame_skip().max(1)
        }
    }

    /// Latest stabilized matte, at inference resolution.
    pub fn matte(&self) -> Option<&AlphaMatte> {
        self.matte.as_ref()
    }

    pub fn health(&self) -> Health {
        if self.consecutive_failures >= self.config.pipeline.max_consecutive_failures {
            Health::Failing {
                consecutive: self.consecutive_failures,
            }
        } else {
            Health::Healthy
        }
    }

    pub fn stats(&self) -> PipelineStats {
        let (backpressure, backend) = match &self.inference {
            Some(inference) => (inference.dropped(), inference.backend().to_string()),
            None => (0, "passthrough".to_string()),
        };
        PipelineStats {
            fps: self.fps.fps(),
            avg_fps: self.fps.average(),
            latency_ms: self.controller.latency_ms(),
            last_sample: self.last_sample,
            downsample: self.controller.downsample(),
            frame_skip: self.frame_skip(),
            dropped_frames: backpressure + self.discarded_frames,
            failed_frames: self.failed_frames,
            inference_resolution: self.inference_resolution,
            backend,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
