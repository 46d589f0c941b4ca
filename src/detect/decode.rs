//! Decoding of raw detector output into pixel-space boxes.
//!
//! The detector emits a `[1, C, D]` or `[1, D, C]` tensor where `D` is the number
//! of candidates and each candidate carries at least
//! `[x_center, y_center, width, height, confidence, ...]` in normalized units.
//!
//! Decoding never fails. A malformed tensor decodes to "no detections", so one
//! bad inference cycle cannot interrupt streaming.

use super::result::DetectionBox;
use super::tensor::Tensor;
use crate::frame::{FRAME_HEIGHT, FRAME_WIDTH};

/// Minimum attributes per candidate: box (4) + confidence (1).
pub const MIN_CANDIDATE_COLUMNS: usize = 5;

/// Index of the confidence attribute within a candidate row.
const CONFIDENCE_COLUMN: usize = 4;

pub const DEFAULT_CONF_THRESHOLD: f32 = 0.5;

/// Parameters for `decode_detections`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodeParams {
    /// Candidates are kept only when `confidence > conf_threshold` (strict).
    pub conf_threshold: f32,
    /// Width of the frame the boxes are projected onto.
    pub orig_width: u32,
    /// Height of the frame the boxes are projected onto.
    pub orig_height: u32,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            orig_width: FRAME_WIDTH,
            orig_height: FRAME_HEIGHT,
        }
    }
}

/// Decode a raw output tensor into boxes, preserving candidate order.
///
/// Overlapping candidates are all kept; there is no non-max suppression.
pub fn decode_detections(output: &Tensor, params: &DecodeParams) -> Vec<DetectionBox> {
    let Some(rows) = CandidateRows::from_tensor(output) else {
        log::debug!("decoder: ignoring output tensor with shape {:?}", output.shape());
        return Vec::new();
    };
    if rows.columns < MIN_CANDIDATE_COLUMNS {
        return Vec::new();
    }

    let mut detections = Vec::new();
    for index in 0..rows.count {
        let confidence = rows.get(index, CONFIDENCE_COLUMN);
        // NaN never compares greater, so it is rejected here too.
        if !(confidence > params.conf_threshold) {
            continue;
        }
        let candidate = [
            rows.get(index, 0),
            rows.get(index, 1),
            rows.get(index, 2),
            rows.get(index, 3),
        ];
        if let Some(det) = project_candidate(candidate, confidence, params) {
            detections.push(det);
        }
    }
    detections
}

/// Candidate-major view over one batch element of the output tensor.
struct CandidateRows<'a> {
    data: &'a [f32],
    count: usize,
    columns: usize,
    channel_major: bool,
}

impl<'a> CandidateRows<'a> {
    fn from_tensor(tensor: &'a Tensor) -> Option<Self> {
        let &[batch, first, second] = tensor.shape() else {
            return None;
        };
        if batch == 0 || first == 0 || second == 0 {
            return None;
        }
        let data = tensor.data().get(..first * second)?;

        // A smaller leading axis means attributes come first: [C, D].
        if first < second {
            Some(Self {
                data,
                count: second,
                columns: first,
                channel_major: true,
            })
        } else {
            Some(Self {
                data,
                count: first,
                columns: second,
                channel_major: false,
            })
        }
    }

    fn get(&self, candidate: usize, column: usize) -> f32 {
        if self.channel_major {
            self.data[column * self.count + candidate]
        } else {
            self.data[candidate * self.columns + column]
        }
    }
}

/// Normalized center/size to clamped pixel corners.
///
/// Every step truncates toward zero, matching integer casts of the scaled values.
fn project_candidate(
    [x_center, y_center, width, height]: [f32; 4],
    confidence: f32,
    params: &DecodeParams,
) -> Option<DetectionBox> {
    let frame_w = params.orig_width as f64;
    let frame_h = params.orig_height as f64;

    let x_center_px = (x_center as f64 * frame_w) as i64;
    let y_center_px = (y_center as f64 * frame_h) as i64;
    let w_px = (width as f64 * frame_w) as i64;
    let h_px = (height as f64 * frame_h) as i64;

    // A negative extent cannot produce an ordered box.
    if w_px < 0 || h_px < 0 {
        return None;
    }

    let half_w = w_px as f64 / 2.0;
    let half_h = h_px as f64 / 2.0;
    let x1 = (x_center_px as f64 - half_w) as i64;
    let y1 = (y_center_px as f64 - half_h) as i64;
    let x2 = (x_center_px as f64 + half_w) as i64;
    let y2 = (y_center_px as f64 + half_h) as i64;

    let max_x = params.orig_width as i64;
    let max_y = params.orig_height as i64;
    Some(DetectionBox {
        x1: x1.clamp(0, max_x) as i32,
        y1: y1.clamp(0, max_y) as i32,
        x2: x2.clamp(0, max_x) as i32,
        y2: y2.clamp(0, max_y) as i32,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    /// Lay out candidate rows as a channel-major `[1, C, D]` tensor.
    fn channel_major(rows: &[[f32; 5]]) -> Result<Tensor> {
        let mut data = Vec::with_capacity(rows.len() * 5);
        for column in 0..5 {
            data.extend(rows.iter().map(|row| row[column]));
        }
        Tensor::new(vec![1, 5, rows.len()], data)
    }

    /// Lay out candidate rows as a candidate-major `[1, D, C]` tensor.
    fn candidate_major(rows: &[[f32; 5]]) -> Result<Tensor> {
        let data = rows.iter().flat_map(|row| row.iter().copied()).collect();
        Tensor::new(vec![1, rows.len(), 5], data)
    }

    #[test]
    fn decodes_centered_candidate_from_channel_major_output() -> Result<()> {
        let output = channel_major(&[
            [0.5, 0.5, 0.2, 0.2, 0.9],
            [0.1, 0.1, 0.1, 0.1, 0.2],
            [0.7, 0.7, 0.1, 0.1, 0.3],
            [0.2, 0.2, 0.1, 0.1, 0.0],
            [0.4, 0.4, 0.1, 0.1, 0.0],
            [0.6, 0.6, 0.1, 0.1, 0.0],
        ])?;
        assert_eq!(output.shape(), &[1, 5, 6]);
        let boxes = decode_detections(&output, &DecodeParams::default());

        assert_eq!(
            boxes,
            vec![DetectionBox {
                x1: 128,
                y1: 96,
                x2: 192,
                y2: 144,
                confidence: 0.9,
            }]
        );
        Ok(())
    }

    /// With fewer candidates than columns the first axis is smaller, so a
    /// channel-major tensor is read as 5 rows of too few columns.
    #[test]
    fn fewer_candidates_than_columns_decode_to_nothing() -> Result<()> {
        let three = channel_major(&[
            [0.5, 0.5, 0.2, 0.2, 0.9],
            [0.1, 0.1, 0.1, 0.1, 0.2],
            [0.7, 0.7, 0.1, 0.1, 0.3],
        ])?;
        assert_eq!(three.shape(), &[1, 5, 3]);
        assert!(decode_detections(&three, &DecodeParams::default()).is_empty());

        let one = channel_major(&[[0.5, 0.5, 0.2, 0.2, 0.9]])?;
        assert!(decode_detections(&one, &DecodeParams::default()).is_empty());
        Ok(())
    }

    #[test]
    fn threshold_is_strictly_greater_than() -> Result<()> {
        let output = candidate_major(&[
            [0.5, 0.5, 0.2, 0.2, 0.5],
            [0.5, 0.5, 0.2, 0.2, 0.49],
            [0.5, 0.5, 0.2, 0.2, f32::NAN],
            [0.5, 0.5, 0.2, 0.2, 0.0],
            [0.5, 0.5, 0.2, 0.2, 0.1],
        ])?;
        assert!(decode_detections(&output, &DecodeParams::default()).is_empty());
        Ok(())
    }

    #[test]
    fn layouts_decode_identically() -> Result<()> {
        let rows = [
            [0.25, 0.25, 0.3, 0.2, 0.95],
            [0.5, 0.5, 0.2, 0.2, 0.1],
            [0.9, 0.1, 0.4, 0.4, 0.6],
            [0.6, 0.6, 0.1, 0.5, 0.7],
            [0.0, 0.0, 0.0, 0.0, 0.0],
            [0.5, 0.8, 0.9, 0.3, 0.55],
        ];
        let params = DecodeParams::default();
        let a = decode_detections(&candidate_major(&rows)?, &params);
        let b = decode_detections(&channel_major(&rows)?, &params);

        assert_eq!(a.len(), 4);
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn boxes_are_clamped_into_frame() -> Result<()> {
        let output = candidate_major(&[
            [0.9375, 0.0625, 0.5, 0.5, 0.8],
            [-1.0, 2.0, 3.0, 3.0, 0.8],
            [0.5, 0.5, 5.0, 5.0, 0.8],
            [1.0, 1.0, 0.0, 0.0, 0.8],
            [0.3, 0.3, 0.1, 0.1, 0.8],
        ])?;
        let params = DecodeParams::default();
        let boxes = decode_detections(&output, &params);

        assert_eq!(boxes.len(), 5);
        assert_eq!((boxes[0].x1, boxes[0].y1, boxes[0].x2, boxes[0].y2), (220, 0, 320, 75));
        for det in &boxes {
            assert!(0 <= det.x1 && det.x1 <= det.x2 && det.x2 <= 320, "{:?}", det);
            assert!(0 <= det.y1 && det.y1 <= det.y2 && det.y2 <= 240, "{:?}", det);
        }
        Ok(())
    }

    #[test]
    fn pixel_conversion_truncates_toward_zero() -> Result<()> {
        // 33/64 is exact in binary, so w_px = 33 and the half extent is 16.5.
        let output = candidate_major(&[
            [0.5, 0.5, 0.515625, 0.515625, 0.9],
            [0.0, 0.0, 0.515625, 0.515625, 0.9],
            [0.5, 0.5, 0.1, 0.1, 0.1],
            [0.5, 0.5, 0.1, 0.1, 0.1],
            [0.5, 0.5, 0.1, 0.1, 0.1],
        ])?;
        let params = DecodeParams {
            conf_threshold: 0.5,
            orig_width: 64,
            orig_height: 64,
        };
        let boxes = decode_detections(&output, &params);

        assert_eq!((boxes[0].x1, boxes[0].x2), (15, 48));
        assert_eq!((boxes[1].x1, boxes[1].y1, boxes[1].x2, boxes[1].y2), (0, 0, 16, 16));
        Ok(())
    }

    #[test]
    fn overlapping_candidates_are_all_kept_in_order() -> Result<()> {
        let output = candidate_major(&[
            [0.5, 0.5, 0.2, 0.2, 0.6],
            [0.5, 0.5, 0.2, 0.2, 0.9],
            [0.51, 0.5, 0.2, 0.2, 0.7],
            [0.1, 0.1, 0.1, 0.1, 0.0],
            [0.1, 0.1, 0.1, 0.1, 0.0],
        ])?;
        let boxes = decode_detections(&output, &DecodeParams::default());
        let confidences: Vec<f32> = boxes.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.6, 0.9, 0.7]);
        Ok(())
    }

    #[test]
    fn negative_extent_is_dropped() -> Result<()> {
        let output = candidate_major(&[
            [0.5, 0.5, -0.2, 0.2, 0.9],
            [0.5, 0.5, 0.2, -0.2, 0.9],
            [0.5, 0.5, 0.2, 0.2, 0.9],
            [0.5, 0.5, 0.2, 0.2, 0.0],
            [0.5, 0.5, 0.2, 0.2, 0.0],
        ])?;
        assert_eq!(decode_detections(&output, &DecodeParams::default()).len(), 1);
        Ok(())
    }

    #[test]
    fn malformed_tensors_decode_to_nothing() -> Result<()> {
        let params = DecodeParams::default();
        let cases = [
            Tensor::new(vec![5, 3], vec![0.9; 15])?,
            Tensor::new(vec![1, 1, 5, 3], vec![0.9; 15])?,
            Tensor::zeros(vec![0, 5, 3])?,
            Tensor::zeros(vec![1, 5, 0])?,
            Tensor::new(vec![1, 8, 4], vec![0.9; 32])?,
            Tensor::new(vec![], vec![0.9])?,
        ];
        for tensor in &cases {
            assert!(
                decode_detections(tensor, &params).is_empty(),
                "shape {:?}",
                tensor.shape()
            );
        }
        Ok(())
    }

    #[test]
    fn only_first_batch_element_is_decoded() -> Result<()> {
        let mut data = candidate_major(&[[0.5, 0.5, 0.2, 0.2, 0.9]; 5])?.into_parts().1;
        data.extend(candidate_major(&[[0.5, 0.5, 0.2, 0.2, 0.8]; 5])?.into_parts().1);
        let output = Tensor::new(vec![2, 5, 5], data)?;

        let boxes = decode_detections(&output, &DecodeParams::default());
        assert_eq!(boxes.len(), 5);
        assert!(boxes.iter().all(|b| b.confidence == 0.9));
        Ok(())
    }
}
