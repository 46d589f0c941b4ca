use anyhow::{anyhow, Result};

use crate::detect::backend::{InferenceEngine, InputSpec};
use crate::detect::tensor::Tensor;

/// Attributes per synthetic candidate: box, confidence, class.
const SYNTHETIC_ATTRIBUTES: usize = 6;
/// Candidates per synthetic output.
const SYNTHETIC_CANDIDATES: usize = 8;
/// Calls for the synthetic box to sweep across the frame once.
const SWEEP_PERIOD: u64 = 30;

/// Deterministic engine for tests and model-less runs.
///
/// Either replays a fixed script of output tensors in a loop, or synthesizes a
/// YOLO-shaped `[1, 6, 8]` channel-major output with a single confident box that
/// sweeps left to right.
pub struct StubEngine {
    spec: InputSpec,
    script: Vec<Tensor>,
    calls: u64,
}

impl StubEngine {
    pub fn new(spec: InputSpec) -> Self {
        Self {
            spec,
            script: Vec::new(),
            calls: 0,
        }
    }

    /// Replay `outputs` cyclically, one per call.
    pub fn scripted(spec: InputSpec, outputs: Vec<Tensor>) -> Self {
        Self {
            spec,
            script: outputs,
            calls: 0,
        }
    }

    /// Number of completed `infer` calls.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn synthesize(&self) -> Result<Tensor> {
        let phase = (self.calls % SWEEP_PERIOD) as f32 / SWEEP_PERIOD as f32;
        let mut data = vec![0.05f32; SYNTHETIC_ATTRIBUTES * SYNTHETIC_CANDIDATES];
        let lead = [0.2 + 0.6 * phase, 0.5, 0.25, 0.4, 0.9, 0.0];
        for (attribute, value) in lead.into_iter().enumerate() {
            data[attribute * SYNTHETIC_CANDIDATES] = value;
        }
        Tensor::new(vec![1, SYNTHETIC_ATTRIBUTES, SYNTHETIC_CANDIDATES], data)
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        let expected = self.spec.shape();
        if input.shape() != expected.as_slice() {
            return Err(anyhow!(
                "stub engine expected input {:?}, got {:?}",
                expected,
                input.shape()
            ));
        }
        let output = if self.script.is_empty() {
            self.synthesize()?
        } else {
            self.script[(self.calls % self.script.len() as u64) as usize].clone()
        };
        self.calls += 1;
        Ok(output)
    }
}
