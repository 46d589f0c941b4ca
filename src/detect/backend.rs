use anyhow::Result;
use serde::Deserialize;

use super::tensor::Tensor;

/// Memory layout of the model input tensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    /// `[1, H, W, 3]`, as exported for TFLite-style models.
    #[default]
    Nhwc,
    /// `[1, 3, H, W]`, the usual ONNX export.
    Nchw,
}

impl InputLayout {
    pub fn shape(self, width: u32, height: u32) -> Vec<usize> {
        let (w, h) = (width as usize, height as usize);
        match self {
            InputLayout::Nhwc => vec![1, h, w, 3],
            InputLayout::Nchw => vec![1, 3, h, w],
        }
    }
}

impl std::str::FromStr for InputLayout {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nhwc" => Ok(InputLayout::Nhwc),
            "nchw" => Ok(InputLayout::Nchw),
            other => Err(anyhow::anyhow!(
                "unknown input layout '{}'; expected nhwc or nchw",
                other
            )),
        }
    }
}

/// Declared input geometry of a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub layout: InputLayout,
}

impl InputSpec {
    pub fn shape(&self) -> Vec<usize> {
        self.layout.shape(self.width, self.height)
    }
}

/// Inference engine used by the capture loop.
///
/// The engine is opaque to the pipeline: a preprocessed tensor goes in, the raw
/// output tensor comes out, and decoding happens elsewhere. An error returned
/// from `infer` is treated as fatal by the capture loop.
pub trait InferenceEngine: Send {
    /// Engine identifier for logs.
    fn name(&self) -> &'static str;

    /// Input geometry the engine expects.
    fn input_spec(&self) -> InputSpec;

    /// Run the model on one preprocessed input.
    fn infer(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Run once on a blank input and return the output shape.
    fn warm_up(&mut self) -> Result<Vec<usize>> {
        let input = Tensor::zeros(self.input_spec().shape())?;
        let output = self.infer(&input)?;
        Ok(output.shape().to_vec())
    }
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn input_spec(&self) -> InputSpec {
        (**self).input_spec()
    }

    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        (**self).infer(input)
    }

    fn warm_up(&mut self) -> Result<Vec<usize>> {
        (**self).warm_up()
    }
}
