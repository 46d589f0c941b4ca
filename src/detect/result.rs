/// One decoded detection in pixel coordinates of the captured frame.
///
/// Corners are clamped into `[0, width] x [0, height]` and satisfy `x1 <= x2`,
/// `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

impl DetectionBox {
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Overlay text, e.g. `Fall: 0.90`.
    pub fn label(&self, prefix: &str) -> String {
        format!("{}: {:.2}", prefix, self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_rounds_to_two_decimals() {
        let det = DetectionBox {
            x1: 0,
            y1: 0,
            x2: 10,
            y2: 20,
            confidence: 0.876,
        };
        assert_eq!(det.label("Fall"), "Fall: 0.88");
        assert_eq!(det.width(), 10);
        assert_eq!(det.height(), 20);
    }
}
