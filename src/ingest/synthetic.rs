//! Synthetic camera (`stub://`) for tests and hardware-less runs.

use anyhow::Result;
use std::time::Instant;

use super::{frame_interval, health_grace, CameraConfig, SourceStats};
use crate::frame::RawFrame;

/// Side of the moving block, in pixels.
const BLOCK_SIZE: u32 = 48;

/// Gradient background with a bright block that slides across the frame.
pub struct SyntheticSource {
    config: CameraConfig,
    frame_count: u64,
    connected: bool,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            connected: false,
            last_frame_at: None,
        }
    }

    /// Synthetic sources are always "connected".
    pub fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<RawFrame> {
        if !self.connected {
            anyhow::bail!("synthetic source not connected; call connect() first");
        }
        self.pace();
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        RawFrame::new(self.render(), self.config.width, self.config.height)
    }

    pub fn is_healthy(&self) -> bool {
        if !self.connected {
            return false;
        }
        match self.last_frame_at {
            Some(last) => last.elapsed() <= health_grace(self.config.target_fps),
            None => true,
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.device.clone(),
        }
    }

    /// Sleep out the remainder of the frame interval, like a real sensor would.
    fn pace(&self) {
        let interval = frame_interval(self.config.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let travel = w.saturating_sub(BLOCK_SIZE).max(1) as u64;
        let block_x = (self.frame_count * 4 % travel) as u32;
        let block_y = h.saturating_sub(BLOCK_SIZE) / 2;

        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let in_block = (block_x..block_x + BLOCK_SIZE).contains(&x)
                    && (block_y..block_y + BLOCK_SIZE).contains(&y);
                if in_block {
                    pixels.extend_from_slice(&[240, 240, 240]);
                } else {
                    let r = (x * 255 / w.max(1)) as u8;
                    let g = (y * 255 / h.max(1)) as u8;
                    pixels.extend_from_slice(&[r / 2, g / 2, 64]);
                }
            }
        }
        pixels
    }
}
