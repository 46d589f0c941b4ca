use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use super::backend::{InputLayout, InputSpec};
use super::tensor::Tensor;
use crate::frame::RawFrame;

/// Resize a frame to the model input and scale pixels to `[0, 1]`.
///
/// The frame itself is left untouched so it can still be annotated afterwards.
pub fn prepare_input(frame: &RawFrame, spec: &InputSpec) -> Result<Tensor> {
    if spec.width == 0 || spec.height == 0 {
        return Err(anyhow!(
            "model input size {}x{} is empty",
            spec.width,
            spec.height
        ));
    }
    let source = RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("frame buffer does not fit its dimensions"))?;
    let resized = if source.dimensions() == (spec.width, spec.height) {
        source
    } else {
        imageops::resize(&source, spec.width, spec.height, FilterType::Triangle)
    };

    let (w, h) = (spec.width as usize, spec.height as usize);
    let pixels = resized.as_raw();
    let data: Vec<f32> = match spec.layout {
        InputLayout::Nhwc => pixels.iter().map(|&p| p as f32 / 255.0).collect(),
        InputLayout::Nchw => {
            let mut planar = vec![0.0f32; w * h * 3];
            for (idx, rgb) in pixels.chunks_exact(3).enumerate() {
                for (channel, &value) in rgb.iter().enumerate() {
                    planar[channel * w * h + idx] = value as f32 / 255.0;
                }
            }
            planar
        }
    };
    Tensor::new(spec.shape(), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nhwc_input_is_normalized_and_resized() -> Result<()> {
        let frame = RawFrame::filled(320, 240, [255, 0, 51])?;
        let spec = InputSpec {
            width: 32,
            height: 16,
            layout: InputLayout::Nhwc,
        };
        let tensor = prepare_input(&frame, &spec)?;

        assert_eq!(tensor.shape(), &[1, 16, 32, 3]);
        let expected = [1.0, 0.0, 0.2];
        for (value, want) in tensor.data()[..3].iter().zip(expected) {
            assert!((value - want).abs() < 0.01, "{} vs {}", value, want);
        }
        Ok(())
    }

    #[test]
    fn nchw_input_is_planar() -> Result<()> {
        let frame = RawFrame::filled(4, 2, [255, 0, 0])?;
        let spec = InputSpec {
            width: 4,
            height: 2,
            layout: InputLayout::Nchw,
        };
        let tensor = prepare_input(&frame, &spec)?;

        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        assert!(tensor.data()[..8].iter().all(|&v| v == 1.0));
        assert!(tensor.data()[8..].iter().all(|&v| v == 0.0));
        Ok(())
    }
}
