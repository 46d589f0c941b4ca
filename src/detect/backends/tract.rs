#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceEngine, InputSpec};
use crate::detect::tensor::Tensor;

/// Tract-based engine for local ONNX detector models.
///
/// The model is loaded once from disk; inference runs fully in-process.
pub struct TractEngine {
    model: TypedRunnableModel<TypedModel>,
    spec: InputSpec,
}

impl TractEngine {
    /// Load an ONNX model and pin its input to `spec`.
    pub fn new<P: AsRef<Path>>(model_path: P, spec: InputSpec) -> Result<Self> {
        let model_path = model_path.as_ref();
        let shape: TVec<usize> = spec.shape().into_iter().collect();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, spec })
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        let input = tract_ndarray::ArrayD::from_shape_vec(
            input.shape().to_vec(),
            input.data().to_vec(),
        )
        .context("model input tensor has inconsistent shape")?
        .into_tensor();
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Tensor::new(view.shape().to_vec(), view.iter().copied().collect())
    }
}
