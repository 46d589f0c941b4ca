//! Frame-skip policy for inference.
//!
//! Inference runs on every `cadence`-th capture tick. Every other tick reuses
//! the detections cached from the last run, so rendering and streaming proceed
//! at the full capture rate while detections refresh at a fraction of it.

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::detect::DetectionBox;

pub const DEFAULT_CADENCE: u64 = 3;

/// Tick counter plus detection cache. Owned by the capture loop alone.
pub struct InferenceGate {
    cadence: u64,
    frame_count: u64,
    invocations: u64,
    cached: Arc<[DetectionBox]>,
}

impl InferenceGate {
    pub fn new(cadence: u64) -> Result<Self> {
        if cadence == 0 {
            return Err(anyhow!("inference cadence must be >= 1"));
        }
        Ok(Self {
            cadence,
            frame_count: 0,
            invocations: 0,
            cached: Arc::from(Vec::new()),
        })
    }

    /// Count one capture tick and run `infer` if this tick is due.
    ///
    /// On a due tick the cache is replaced with whatever `infer` returns. On a
    /// skipped tick the cache is left exactly as the last run produced it.
    /// Errors from `infer` propagate and leave the cache untouched.
    pub fn advance<F>(&mut self, infer: F) -> Result<Arc<[DetectionBox]>>
    where
        F: FnOnce() -> Result<Vec<DetectionBox>>,
    {
        self.frame_count += 1;
        if self.frame_count % self.cadence == 0 {
            let detections = infer()?;
            self.invocations += 1;
            self.cached = Arc::from(detections);
        }
        Ok(self.cached.clone())
    }

    pub fn cadence(&self) -> u64 {
        self.cadence
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    pub fn detections(&self) -> &[DetectionBox] {
        &self.cached
    }
}

impl Default for InferenceGate {
    fn default() -> Self {
        Self {
            cadence: DEFAULT_CADENCE,
            frame_count: 0,
            invocations: 0,
            cached: Arc::from(Vec::new()),
        }
    }
}
