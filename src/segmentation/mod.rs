pub mod codec;
mod rvm;
pub mod types;

pub use rvm::{OrtBackend, RecurrentSession};
pub use types::{AlphaMatte, MattingBackend, ModelOutput, RecurrentState};

use crate::config::ModelConfig;
use crate::error::LoadError;
use std::path::Path;

/// Create the default recurrent session (RVM on ONNX Runtime) from a model file
pub fn create_default_session<P: AsRef<Path>>(
    model_path: P,
    config: &ModelConfig,
) -> Result<RecurrentSession<OrtBackend>, LoadError> {
    let backend = OrtBackend::from_file(model_path, config)?;
    Ok(RecurrentSession::new(backend))
}
