//! V4L2 camera source.
//!
//! Negotiates a capture format with the driver (RGB24 preferred, YUYV as the
//! fallback most USB webcams offer), maps a small ring of kernel buffers, and
//! converts every dequeued buffer into a packed RGB24 `RawFrame`.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;
use v4l::video::Capture;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{health_grace, CameraConfig, SourceStats};
use crate::frame::RawFrame;

const MMAP_BUFFER_COUNT: u32 = 4;

/// Formats to request, in order of preference.
const PREFERRED_FOURCCS: [&[u8; 4]; 2] = [b"RGB3", b"YUYV"];

/// Format the driver actually agreed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Negotiated {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

/// Open device plus the mmap stream borrowing it.
#[self_referencing]
struct MappedCapture {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    buffers: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    config: CameraConfig,
    capture: Option<MappedCapture>,
    negotiated: Option<Negotiated>,
    frames: u64,
    last_frame_at: Option<Instant>,
    failure: Option<String>,
}

impl V4l2Source {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            capture: None,
            negotiated: None,
            frames: 0,
            last_frame_at: None,
            failure: None,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        let path = self.config.device.clone();
        let device = v4l::Device::with_path(&path)
            .with_context(|| format!("cannot open camera {}", path))?;

        let negotiated = negotiate(&device, &self.config)?;
        if (negotiated.width, negotiated.height) != (self.config.width, self.config.height) {
            log::warn!(
                "camera {} runs at {}x{}, configured {}x{}",
                path,
                negotiated.width,
                negotiated.height,
                self.config.width,
                self.config.height
            );
        }
        request_fps(&device, &path, self.config.target_fps);

        let capture = MappedCaptureTryBuilder {
            device,
            buffers_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(
                    device,
                    v4l::buffer::Type::VideoCapture,
                    MMAP_BUFFER_COUNT,
                )
                .with_context(|| format!("cannot map capture buffers for {}", path))
            },
        }
        .try_build();
        let capture = match capture {
            Ok(capture) => capture,
            Err(err) => {
                self.failure = Some(format!("{:#}", err));
                return Err(err);
            }
        };

        log::info!(
            "camera {} streaming {}x{} {:?}",
            path,
            negotiated.width,
            negotiated.height,
            negotiated.pixel_format
        );
        self.capture = Some(capture);
        self.negotiated = Some(negotiated);
        self.failure = None;
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<RawFrame> {
        use v4l::io::traits::CaptureStream;

        let (Some(capture), Some(negotiated)) = (self.capture.as_mut(), self.negotiated) else {
            return Err(anyhow!("camera {} is not connected", self.config.device));
        };
        let dequeued = capture.with_buffers_mut(|buffers| buffers.next());
        let (buf, _meta) = match dequeued {
            Ok(frame) => frame,
            Err(err) => {
                self.failure = Some(err.to_string());
                return Err(anyhow::Error::new(err)
                    .context(format!("capture from {} failed", self.config.device)));
            }
        };

        let rgb = normalize_to_rgb(
            buf,
            negotiated.width,
            negotiated.height,
            negotiated.pixel_format,
        )?;
        self.frames += 1;
        self.last_frame_at = Some(Instant::now());
        RawFrame::new(rgb, negotiated.width, negotiated.height)
    }

    pub fn is_healthy(&self) -> bool {
        if self.failure.is_some() || self.capture.is_none() {
            return false;
        }
        self.last_frame_at
            .map(|at| at.elapsed() <= health_grace(self.config.target_fps))
            .unwrap_or(true)
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames,
            source: self.config.device.clone(),
        }
    }
}

/// Ask for each preferred format in turn and keep the first one the driver
/// reports back as active.
fn negotiate(device: &v4l::Device, config: &CameraConfig) -> Result<Negotiated> {
    let mut wanted = device
        .format()
        .with_context(|| format!("cannot query format of {}", config.device))?;
    wanted.width = config.width;
    wanted.height = config.height;

    for fourcc in PREFERRED_FOURCCS {
        wanted.fourcc = v4l::FourCC::new(fourcc);
        let active = match device.set_format(&wanted) {
            Ok(active) => active,
            Err(err) => {
                log::debug!("camera {} refused {}: {}", config.device, wanted.fourcc, err);
                continue;
            }
        };
        if let Some(pixel_format) = PixelFormat::from_fourcc(&active.fourcc.repr) {
            return Ok(Negotiated {
                width: active.width,
                height: active.height,
                pixel_format,
            });
        }
        log::debug!(
            "camera {} substituted {} for {}",
            config.device,
            active.fourcc,
            wanted.fourcc
        );
    }
    Err(anyhow!(
        "camera {} offers neither RGB3 nor YUYV at {}x{}",
        config.device,
        config.width,
        config.height
    ))
}

fn request_fps(device: &v4l::Device, path: &str, fps: u32) {
    if fps == 0 {
        return;
    }
    let params = v4l::video::capture::Parameters::with_fps(fps);
    if let Err(err) = device.set_params(&params) {
        log::warn!("camera {} ignored {} fps request: {}", path, fps, err);
    }
}
