//! Capture loop: camera -> inference gate -> annotator -> broadcaster.
//!
//! One long-lived thread drives this loop. The detection cache and tick counter
//! live here and are never shared; the only thing other threads see is the
//! broadcaster's current frame.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::annotate::Annotator;
use crate::broadcast::FrameBroadcaster;
use crate::detect::{decode_detections, prepare_input, DecodeParams, InferenceEngine};
use crate::gate::InferenceGate;
use crate::ingest::FrameSource;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Per-run settings for the capture loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineSettings {
    pub cadence: u64,
    pub conf_threshold: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cadence: crate::gate::DEFAULT_CADENCE,
            conf_threshold: crate::detect::DEFAULT_CONF_THRESHOLD,
        }
    }
}

/// Counters reported by the capture loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub inferences: u64,
    pub detections: usize,
    pub last_sequence: u64,
}

pub struct CaptureLoop<S, E> {
    source: S,
    engine: E,
    gate: InferenceGate,
    annotator: Annotator,
    conf_threshold: f32,
    output: Arc<FrameBroadcaster>,
    last_sequence: u64,
}

impl<S: FrameSource, E: InferenceEngine> CaptureLoop<S, E> {
    pub fn new(
        source: S,
        engine: E,
        annotator: Annotator,
        settings: PipelineSettings,
        output: Arc<FrameBroadcaster>,
    ) -> Result<Self> {
        Ok(Self {
            source,
            engine,
            gate: InferenceGate::new(settings.cadence)?,
            annotator,
            conf_threshold: settings.conf_threshold,
            output,
            last_sequence: 0,
        })
    }

    /// Run one capture tick and return the published sequence number.
    ///
    /// Camera and inference failures are returned as errors; the caller treats
    /// them as fatal.
    pub fn step(&mut self) -> Result<u64> {
        let frame = self.source.next_frame().context("camera capture failed")?;
        let params = DecodeParams {
            conf_threshold: self.conf_threshold,
            orig_width: frame.width(),
            orig_height: frame.height(),
        };

        let engine = &mut self.engine;
        let detections = self.gate.advance(|| {
            let input = prepare_input(&frame, &engine.input_spec())?;
            let output = engine
                .infer(&input)
                .with_context(|| format!("{} inference failed", engine.name()))?;
            let boxes = decode_detections(&output, &params);
            log::debug!("inference: {} detections", boxes.len());
            Ok(boxes)
        })?;

        let encoded = self.annotator.annotate(frame, &detections)?;
        self.last_sequence = self.output.publish(encoded);
        Ok(self.last_sequence)
    }

    /// Loop until `shutdown` is set. Returns the first fatal error, if any.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<PipelineStats> {
        log::info!(
            "capture loop running: engine={}, cadence={}, threshold={:.2}",
            self.engine.name(),
            self.gate.cadence(),
            self.conf_threshold
        );
        let mut last_health_log = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            self.step()?;

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.source.stats();
                log::info!(
                    "camera health={} frames={} inferences={} detections={} source={}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    self.gate.invocations(),
                    self.gate.detections().len(),
                    stats.source
                );
                last_health_log = Instant::now();
            }
        }
        log::info!("capture loop stopped after {} frames", self.gate.frame_count());
        Ok(self.stats())
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames: self.gate.frame_count(),
            inferences: self.gate.invocations(),
            detections: self.gate.detections().len(),
            last_sequence: self.last_sequence,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{InputLayout, InputSpec, StubEngine, Tensor};
    use crate::frame::RawFrame;
    use crate::ingest::SourceStats;
    use anyhow::anyhow;

    /// Emits a fixed number of blank frames, then fails like an unplugged camera.
    struct ScriptedSource {
        remaining: u32,
        captured: u64,
    }

    impl FrameSource for ScriptedSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<RawFrame> {
            if self.remaining == 0 {
                return Err(anyhow!("camera unplugged"));
            }
            self.remaining -= 1;
            self.captured += 1;
            RawFrame::filled(320, 240, [0, 0, 0])
        }

        fn is_healthy(&self) -> bool {
            self.remaining > 0
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.captured,
                source: "scripted".to_string(),
            }
        }
    }

    fn spec() -> InputSpec {
        InputSpec {
            width: 32,
            height: 32,
            layout: InputLayout::Nhwc,
        }
    }

    fn one_box_output() -> Result<Tensor> {
        // Channel-major [1, 5, 6]: candidate 0 is confident, the rest are not.
        let mut data = vec![0.0f32; 30];
        for (attribute, value) in [0.5, 0.5, 0.2, 0.2, 0.9].into_iter().enumerate() {
            data[attribute * 6] = value;
        }
        Tensor::new(vec![1, 5, 6], data)
    }

    #[test]
    fn publishes_every_tick_and_infers_every_third() -> Result<()> {
        let output = Arc::new(FrameBroadcaster::new());
        let mut pipeline = CaptureLoop::new(
            ScriptedSource {
                remaining: 10,
                captured: 0,
            },
            StubEngine::scripted(spec(), vec![one_box_output()?]),
            Annotator::default(),
            PipelineSettings::default(),
            output.clone(),
        )?;

        for tick in 1..=10u64 {
            assert_eq!(pipeline.step()?, tick);
        }
        let stats = pipeline.stats();
        assert_eq!(stats.frames, 10);
        assert_eq!(stats.inferences, 3);
        assert_eq!(stats.detections, 1);
        assert_eq!(pipeline.engine().calls(), 3);
        assert_eq!(output.sequence(), 10);
        Ok(())
    }

    #[test]
    fn camera_failure_is_fatal() -> Result<()> {
        let output = Arc::new(FrameBroadcaster::new());
        let mut pipeline = CaptureLoop::new(
            ScriptedSource {
                remaining: 2,
                captured: 0,
            },
            StubEngine::new(spec()),
            Annotator::default(),
            PipelineSettings::default(),
            output.clone(),
        )?;

        let shutdown = AtomicBool::new(false);
        let err = pipeline.run(&shutdown).expect_err("camera should fail");
        assert!(format!("{:#}", err).contains("camera unplugged"));
        assert_eq!(output.sequence(), 2);
        Ok(())
    }

    #[test]
    fn inference_failure_is_fatal() -> Result<()> {
        let output = Arc::new(FrameBroadcaster::new());
        // Engine whose accelerator has gone away.
        struct BrokenEngine;
        impl InferenceEngine for BrokenEngine {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn input_spec(&self) -> InputSpec {
                spec()
            }
            fn infer(&mut self, _input: &Tensor) -> Result<Tensor> {
                Err(anyhow!("accelerator lost"))
            }
        }

        let mut pipeline = CaptureLoop::new(
            ScriptedSource {
                remaining: 5,
                captured: 0,
            },
            BrokenEngine,
            Annotator::default(),
            PipelineSettings {
                cadence: 1,
                ..PipelineSettings::default()
            },
            output.clone(),
        )?;

        assert!(pipeline.step().is_err());
        assert_eq!(output.sequence(), 0);
        Ok(())
    }

    #[test]
    fn run_stops_on_shutdown_flag() -> Result<()> {
        let output = Arc::new(FrameBroadcaster::new());
        let mut pipeline = CaptureLoop::new(
            ScriptedSource {
                remaining: 1,
                captured: 0,
            },
            StubEngine::new(spec()),
            Annotator::default(),
            PipelineSettings::default(),
            output,
        )?;
        let shutdown = AtomicBool::new(true);
        assert_eq!(pipeline.run(&shutdown)?.frames, 0);
        Ok(())
    }
}
