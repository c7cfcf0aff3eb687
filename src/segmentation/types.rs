use ndarray::{ArrayD, ArrayView4, IxDyn};

use crate::error::{FormatError, InferenceError};

/// Alpha matte: 0.0 = background, 1.0 = foreground, row-major at the
/// resolution the model produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaMatte {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl AlphaMatte {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self, FormatError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FormatError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Caller guarantees `data.len() == width * height`.
    pub(crate) fn from_raw_parts(width: u32, height: u32, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// The model's four hidden-state tensors, carried between consecutive calls.
///
/// Kept as one aggregate so the whole set is replaced in a single move; no
/// tensor is ever read after its successor has been swapped in.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentState {
    r1: ArrayD<f32>,
    r2: ArrayD<f32>,
    r3: ArrayD<f32>,
    r4: ArrayD<f32>,
}

impl RecurrentState {
    /// Degenerate 1x1x1x1 zero tensors, accepted by the exported model as
    /// "no history".
    pub fn zero() -> Self {
        let z = || ArrayD::<f32>::zeros(IxDyn(&[1, 1, 1, 1]));
        Self {
            r1: z(),
            r2: z(),
            r3: z(),
            r4: z(),
        }
    }

    pub fn from_tensors([r1, r2, r3, r4]: [ArrayD<f32>; 4]) -> Self {
        Self { r1, r2, r3, r4 }
    }

    pub fn tensors(&self) -> [&ArrayD<f32>; 4] {
        [&self.r1, &self.r2, &self.r3, &self.r4]
    }

    pub fn is_initial(&self) -> bool {
        self.tensors()
            .iter()
            .all(|t| t.shape() == [1, 1, 1, 1] && t.iter().all(|v| *v == 0.0))
    }
}

impl Default for RecurrentState {
    fn default() -> Self {
        Self::zero()
    }
}

/// Raw result of one forward pass.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Alpha with shape [1, 1, H, W].
    pub pha: ArrayD<f32>,
    pub state: RecurrentState,
}

/// The segmentation network as an opaque function: frame tensor plus hidden
/// state in, alpha plus new hidden state out.
///
/// Allows swapping the runtime (or faking it in tests) without touching the
/// session bookkeeping.
pub trait MattingBackend: Send {
    /// Runs one forward pass.
    ///
    /// # Arguments
    /// * `src` - Frame tensor, shape [1, 3, H, W], values in [0, 1]
    /// * `downsample_ratio` - Encoder reduction factor; larger is coarser
    /// * `state` - Hidden state from the previous call
    fn forward(
        &mut self,
        src: ArrayView4<'_, f32>,
        downsample_ratio: f32,
        state: &RecurrentState,
    ) -> Result<ModelOutput, InferenceError>;

    fn name(&self) -> &str {
        "matting"
    }
}

impl<B: MattingBackend + ?Sized> MattingBackend for Box<B> {
    fn forward(
        &mut self,
        src: ArrayView4<'_, f32>,
        downsample_ratio: f32,
        state: &RecurrentState,
    ) -> Result<ModelOutput, InferenceError> {
        (**self).forward(src, downsample_ratio, state)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
