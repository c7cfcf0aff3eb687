#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use backdrop::error::InferenceError;
use backdrop::segmentation::{ModelOutput, RecurrentState};
use backdrop::MattingBackend;
use crossbeam::channel::{unbounded, Receiver, Sender};
use ndarray::{ArrayD, ArrayView4, IxDyn};

/// Returns a constant alpha at the input resolution and counts calls in
/// the first recurrent tensor, so state continuity is observable.
pub struct ConstantBackend {
    pub alpha: f32,
    /// Calls listed here (0-based) fail instead of producing output.
    pub fail_on: Vec<usize>,
    pub calls: Arc<AtomicUsize>,
    /// Call counter read from the incoming state on each call.
    pub seen_state: Arc<Mutex<Vec<f32>>>,
    /// Emit a two-channel alpha the decoder cannot accept.
    pub malformed: bool,
}

impl ConstantBackend {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            fail_on: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            seen_state: Arc::new(Mutex::new(Vec::new())),
            malformed: false,
        }
    }
}

impl MattingBackend for ConstantBackend {
    fn forward(
        &mut self,
        src: ArrayView4<'_, f32>,
        _downsample_ratio: f32,
        state: &RecurrentState,
    ) -> Result<ModelOutput, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let previous = state.tensors()[0].iter().next().copied().unwrap_or(0.0);
        self.seen_state.lock().unwrap().push(previous);

        if self.fail_on.contains(&call) {
            return Err(InferenceError::Runtime(format!("synthetic failure {call}")));
        }

        let (h, w) = (src.shape()[2], src.shape()[3]);
        let channels = if self.malformed { 2 } else { 1 };
        let pha = ArrayD::from_elem(IxDyn(&[1, channels, h, w]), self.alpha);
        let counter = ArrayD::from_elem(IxDyn(&[1, 1, 1, 1]), previous + 1.0);
        let zero = || ArrayD::zeros(IxDyn(&[1, 1, 1, 1]));
        Ok(ModelOutput {
            pha,
            state: RecurrentState::from_tensors([counter, zero(), zero(), zero()]),
        })
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// Holds every call until the test opens the gate. Sending `false` makes the
/// call panic, which takes the worker thread down with it.
pub struct GatedBackend {
    gate: Receiver<bool>,
}

impl GatedBackend {
    pub fn new() -> (Sender<bool>, Self) {
        let (tx, rx) = unbounded();
        (tx, Self { gate: rx })
    }
}

impl MattingBackend for GatedBackend {
    fn forward(
        &mut self,
        src: ArrayView4<'_, f32>,
        _downsample_ratio: f32,
        _state: &RecurrentState,
    ) -> Result<ModelOutput, InferenceError> {
        if !self.gate.recv().unwrap_or(false) {
            panic!("inference worker killed");
        }
        let (h, w) = (src.shape()[2], src.shape()[3]);
        Ok(ModelOutput {
            pha: ArrayD::from_elem(IxDyn(&[1, 1, h, w]), 1.0),
            state: RecurrentState::zero(),
        })
    }

    fn name(&self) -> &str {
        "gated"
    }
}
