//! streamd - live detection stream daemon
//!
//! This daemon:
//! 1. Captures frames from the configured camera
//! 2. Runs the detector on every Nth frame and caches the boxes
//! 3. Draws the cached boxes on every frame and JPEG-encodes it
//! 4. Serves the annotated frames as an MJPEG stream over HTTP
//!
//! A camera or detector failure stops the daemon with a non-zero exit code.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use detection_stream::{
    config::{DetectorSettings, StreamdConfig},
    detect::{InferenceEngine, InputSpec, StubEngine},
    Annotator, CameraSource, CaptureLoop, FrameBroadcaster, FrameSource, PipelineStats,
    StreamServer,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve a camera feed with detection overlays as MJPEG")]
struct Args {
    /// Config file (TOML, or JSON with a .json extension).
    #[arg(long, env = "STREAMD_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address for the HTTP server.
    #[arg(long)]
    addr: Option<String>,

    /// Camera device path or stub://<name>.
    #[arg(long)]
    camera: Option<String>,

    /// ONNX model path. Without one the stub detector is used.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Run inference on every Nth frame.
    #[arg(long)]
    cadence: Option<u64>,
}

impl Args {
    fn apply(self, cfg: &mut StreamdConfig) {
        if let Some(addr) = self.addr {
            cfg.server.addr = addr;
        }
        if let Some(camera) = self.camera {
            cfg.camera.device = camera;
        }
        if let Some(model) = self.model {
            cfg.detector.model_path = Some(model);
        }
        if let Some(cadence) = self.cadence {
            cfg.detector.cadence = cadence;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = StreamdConfig::load_from(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let mut engine = build_engine(&cfg.detector)?;
    let output_shape = engine.warm_up()?;
    let input = engine.input_spec();
    log::info!(
        "detector ready: engine={}, input={}x{} {:?}, output shape {:?}",
        engine.name(),
        input.width,
        input.height,
        input.layout,
        output_shape
    );

    let mut source = CameraSource::new(cfg.camera.clone())?;
    source.connect()?;

    let frames = Arc::new(FrameBroadcaster::new());
    let server = StreamServer::new(cfg.server.clone(), frames.clone()).spawn()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    log::info!(
        "streamd running. camera={} cadence={} threshold={:.2}",
        cfg.camera.device,
        cfg.detector.cadence,
        cfg.detector.conf_threshold
    );

    let mut pipeline = CaptureLoop::new(
        source,
        engine,
        Annotator::new(cfg.annotation.clone()),
        cfg.pipeline_settings(),
        frames.clone(),
    )?;
    let outcome = pipeline.run(&shutdown);
    if let Err(err) = &outcome {
        log::error!("capture loop failed: {:#}", err);
    }

    frames.close();
    let stats = settle(outcome, server.stop())?;
    log::info!(
        "streamd stopped: frames={} inferences={} published={}",
        stats.frames,
        stats.inferences,
        stats.last_sequence
    );
    Ok(())
}

/// A capture failure outranks a failure to stop the server.
fn settle(outcome: Result<PipelineStats>, stopped: Result<()>) -> Result<PipelineStats> {
    match (outcome, stopped) {
        (Err(err), Err(stop_err)) => {
            log::warn!("stream server did not stop cleanly: {:#}", stop_err);
            Err(err)
        }
        (outcome, stopped) => {
            let stats = outcome?;
            stopped?;
            Ok(stats)
        }
    }
}

fn build_engine(detector: &DetectorSettings) -> Result<Box<dyn InferenceEngine>> {
    match &detector.model_path {
        Some(path) => load_model(path, detector.input),
        None => {
            log::warn!("no model configured; using the stub detector");
            Ok(Box::new(StubEngine::new(detector.input)))
        }
    }
}

#[cfg(feature = "backend-tract")]
fn load_model(path: &Path, spec: InputSpec) -> Result<Box<dyn InferenceEngine>> {
    let engine = detection_stream::detect::TractEngine::new(path, spec)?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(path: &Path, _spec: InputSpec) -> Result<Box<dyn InferenceEngine>> {
    Err(anyhow!(
        "model '{}' requires the backend-tract feature",
        path.display()
    ))
}
