//! Real-time portrait matting for live video.
//!
//! Frames from a [`capture::CaptureSource`] are downscaled, segmented by a
//! recurrent matting model on a worker thread, stabilized over time and
//! composited over a synthesized background by [`MattingPipeline`].

pub mod adaptive;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod error;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod refine;
pub mod scheduler;
pub mod segmentation;
pub mod stabilizer;
pub mod stats;
pub mod worker;

pub use compositor::{BackgroundSpec, CompositedFrame, Compositor, Overlay, PhotoHandle};
pub use config::AppConfig;
pub use error::{MatteError, Result};
pub use frame::Frame;
pub use pipeline::{Health, MattingPipeline};
pub use segmentation::{AlphaMatte, MattingBackend, RecurrentSession, RecurrentState};
