use super::codec;
use super::types::{AlphaMatte, MattingBackend, ModelOutput, RecurrentState};
use crate::config::ModelConfig;
use crate::error::{InferenceError, LoadError};
use ndarray::{Array1, ArrayD, ArrayView4};
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// Output names of the exported RobustVideoMatting graph, in feed-back order.
const STATE_OUTPUTS: [&str; 4] = ["r1o", "r2o", "r3o", "r4o"];

/// RobustVideoMatting graph executed by ONNX Runtime
///
/// Inputs: `src` [1,3,H,W], `downsample_ratio` [1], `r1i..r4i`.
/// Outputs: `pha` [1,1,H,W], `r1o..r4o` (plus `fgr`, unused).
pub struct OrtBackend {
    session: Session,
}

impl OrtBackend {
    /// Build a session from an in-memory model
    ///
    /// # Arguments
    /// * `bytes` - The ONNX payload
    /// * `config` - Size guard and thread hint
    pub fn from_bytes(bytes: &[u8], config: &ModelConfig) -> Result<Self, LoadError> {
        check_payload(bytes, config.min_model_bytes)?;

        tracing::info!(
            "Initializing matting model ({} bytes, {} threads)",
            bytes.len(),
            config.threads
        );

        let builder = Session::builder()
            .map_err(corrupt)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(corrupt)?
            .with_intra_threads(config.threads.max(1))
            .map_err(corrupt)?;

        #[cfg(any(feature = "cuda", feature = "tensorrt"))]
        let builder = builder
            .with_execution_providers(execution_providers())
            .map_err(corrupt)?;

        let session = builder.commit_from_memory(bytes).map_err(corrupt)?;

        tracing::info!("Matting model loaded successfully");
        Ok(Self { session })
    }

    pub fn from_file<P: AsRef<Path>>(path: P, config: &ModelConfig) -> Result<Self, LoadError> {
        let path = path.as_ref();
        tracing::info!("Loading matting model from {}", path.display());
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes, config)
    }
}

#[cfg(any(feature = "cuda", feature = "tensorrt"))]
fn execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    let mut providers = Vec::new();
    #[cfg(feature = "tensorrt")]
    providers.push(ort::execution_providers::TensorRTExecutionProvider::default().build());
    #[cfg(feature = "cuda")]
    providers.push(ort::execution_providers::CUDAExecutionProvider::default().build());
    providers
}

fn corrupt<E: std::fmt::Display>(err: E) -> LoadError {
    LoadError::Corrupt(err.to_string())
}

/// Guards against a truncated download or an HTML error page saved in place
/// of the binary model.
fn check_payload(bytes: &[u8], minimum: usize) -> Result<(), LoadError> {
    if bytes.len() < minimum {
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(200)]).into_owned();
        return Err(LoadError::TooSmall {
            size: bytes.len(),
            minimum,
            head,
        });
    }
    Ok(())
}

impl MattingBackend for OrtBackend {
    fn forward(
        &mut self,
        src: ArrayView4<'_, f32>,
        downsample_ratio: f32,
        state: &RecurrentState,
    ) -> Result<ModelOutput, InferenceError> {
        // The graph takes the encoder scale, the reciprocal of the reduction factor.
        let scale = Array1::from_elem(1, 1.0 / downsample_ratio.max(1.0));
        let [r1, r2, r3, r4] = state.tensors();

        let src = TensorRef::from_array_view(src).map_err(InferenceError::runtime)?;
        let scale = TensorRef::from_array_view(scale.view()).map_err(InferenceError::runtime)?;
        let r1 = TensorRef::from_array_view(r1.view()).map_err(InferenceError::runtime)?;
        let r2 = TensorRef::from_array_view(r2.view()).map_err(InferenceError::runtime)?;
        let r3 = TensorRef::from_array_view(r3.view()).map_err(InferenceError::runtime)?;
        let r4 = TensorRef::from_array_view(r4.view()).map_err(InferenceError::runtime)?;

        let outputs = self
            .session
            .run(inputs![
                "src" => src,
                "downsample_ratio" => scale,
                "r1i" => r1,
                "r2i" => r2,
                "r3i" => r3,
                "r4i" => r4
            ])
            .map_err(InferenceError::runtime)?;

        let extract = |name: &'static str| -> Result<ArrayD<f32>, InferenceError> {
            outputs
                .get(name)
                .ok_or(InferenceError::MissingOutput(name))?
                .try_extract_array::<f32>()
                .map(|view| view.to_owned())
                .map_err(InferenceError::runtime)
        };

        let pha = extract("pha")?;
        let [r1, r2, r3, r4] = STATE_OUTPUTS;
        let state =
            RecurrentState::from_tensors([extract(r1)?, extract(r2)?, extract(r3)?, extract(r4)?]);

        Ok(ModelOutput { pha, state })
    }

    fn name(&self) -> &str {
        "rvm-onnx"
    }
}

/// A matting model plus the hidden state it carries between frames
///
/// This model uses recurrent connections to maintain temporal consistency.
/// The session is the only owner of the state; `infer` takes `&mut self`, so
/// two forward passes can never overlap on the same session.
pub struct RecurrentSession<B> {
    backend: B,
    state: RecurrentState,
}

impl RecurrentSession<OrtBackend> {
    /// Load the ONNX model from memory with the default size guard
    ///
    /// Fails with `LoadError::TooSmall` for implausibly small payloads and
    /// `LoadError::Corrupt` when the runtime rejects the bytes. Never retried.
    pub fn init(model_bytes: &[u8], thread_hint: usize) -> Result<Self, LoadError> {
        let config = ModelConfig {
            threads: thread_hint,
            ..ModelConfig::default()
        };
        Self::init_with_config(model_bytes, &config)
    }

    pub fn init_with_config(model_bytes: &[u8], config: &ModelConfig) -> Result<Self, LoadError> {
        Ok(Self::new(OrtBackend::from_bytes(model_bytes, config)?))
    }
}

impl<B: MattingBackend> RecurrentSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: RecurrentState::zero(),
        }
    }

    /// Run one frame through the model
    ///
    /// On success the hidden state is replaced by the model's new state.
    /// On failure the last good state is kept, so the next frame continues
    /// the same chain.
    pub fn infer(
        &mut self,
        frame: ArrayView4<'_, f32>,
        downsample_ratio: f32,
    ) -> Result<AlphaMatte, InferenceError> {
        let _span = tracing::debug_span!("inference", backend = self.backend.name()).entered();

        let output = self.backend.forward(frame, downsample_ratio, &self.state)?;
        let matte = codec::decode(output.pha.view())?;
        self.state = output.state;
        Ok(matte)
    }

    /// Drop all temporal context
    ///
    /// Call this when:
    /// - Switching cameras
    /// - Scene cuts detected
    /// - Resuming after a long stall
    pub fn reset(&mut self) {
        tracing::info!("Resetting recurrent state");
        self.state = RecurrentState::zero();
    }

    pub fn state(&self) -> &RecurrentState {
        &self.state
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}
