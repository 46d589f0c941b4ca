//! Frame types that flow through the pipeline.
//!
//! - `RawFrame`: one captured RGB24 pixel buffer. Owned by the capture loop for a
//!   single iteration and consumed by the annotator.
//! - `EncodedFrame`: a complete JPEG still. Immutable and cheaply shared between
//!   the broadcaster and every streaming connection.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::Arc;

/// Default capture width in pixels.
pub const FRAME_WIDTH: u32 = 320;

/// Default capture height in pixels.
pub const FRAME_HEIGHT: u32 = 240;

/// Bytes per pixel for RGB24.
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// RawFrame: one captured pixel buffer
// ----------------------------------------------------------------------------

/// Raw RGB24 frame, row-major and tightly packed.
///
/// Not `Clone`: a raw frame lives for exactly one capture
/// tick and is turned into an `EncodedFrame` (or dropped) before the next one.
pub struct RawFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RawFrame {
    /// Wrap captured pixels. Fails when the buffer does not match `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// A uniformly colored frame. Handy for sources that have nothing to show yet.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / RGB_CHANNELS {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Convert into an `RgbImage` without copying the pixel buffer.
    pub fn into_image(self) -> Result<RgbImage> {
        let (width, height) = (self.width, self.height);
        RgbImage::from_raw(width, height, self.data)
            .ok_or_else(|| anyhow!("frame buffer does not fit {}x{} RGB image", width, height))
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// EncodedFrame: shared JPEG payload
// ----------------------------------------------------------------------------

/// A complete encoded still image.
///
/// Cloning only bumps a reference count; readers never copy the payload and
/// nobody can mutate it once built.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    bytes: Arc<[u8]>,
}

impl EncodedFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::from(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for EncodedFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl std::fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_frame_validates_length() {
        assert!(RawFrame::new(vec![0u8; 9], 1, 3).is_ok());
        assert!(RawFrame::new(vec![0u8; 8], 1, 3).is_err());
        assert!(RawFrame::new(Vec::new(), 0, 0).is_ok());
    }

    #[test]
    fn raw_frame_converts_to_image_without_resizing() -> Result<()> {
        let frame = RawFrame::filled(FRAME_WIDTH, FRAME_HEIGHT, [10, 20, 30])?;
        assert_eq!(frame.pixels().len(), 320 * 240 * 3);

        let image = frame.into_image()?;
        assert_eq!(image.dimensions(), (320, 240));
        assert_eq!(image.get_pixel(319, 239).0, [10, 20, 30]);
        Ok(())
    }

    #[test]
    fn encoded_frame_clones_share_payload() {
        let a = EncodedFrame::new(vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(b.len(), 4);
        assert!(std::ptr::eq(a.as_bytes().as_ptr(), b.as_bytes().as_ptr()));
    }
}
