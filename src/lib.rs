//! Detection stream
//!
//! Captures camera frames, runs object detection on a subsample of them, draws
//! the most recent detections on every frame, and fans the annotated JPEGs out
//! to any number of HTTP clients as an MJPEG stream.
//!
//! # Architecture
//!
//! ```text
//! camera -> CaptureLoop [InferenceGate -> Annotator] -> FrameBroadcaster -> N stream clients
//! ```
//!
//! - One capture thread owns the camera, the inference engine, and the detection
//!   cache. Nothing else touches them.
//! - The `FrameBroadcaster` is the only state shared across threads. It holds
//!   the latest encoded frame; readers never queue and never block the producer.
//! - Every HTTP connection gets its own thread, so a stalled client only stalls
//!   its own socket writes.
//!
//! # Module Structure
//!
//! - `frame`: raw RGB frames and encoded JPEG payloads
//! - `detect`: tensors, inference engines, YOLO output decoding
//! - `gate`: frame-skip inference cadence and detection cache
//! - `annotate`: box and label rendering, JPEG encoding
//! - `broadcast`: latest-frame broadcaster
//! - `ingest`: camera sources (synthetic, V4L2)
//! - `pipeline`: the capture loop tying the above together
//! - `server`: HTTP page, redirect, and MJPEG stream endpoints
//! - `config`: daemon configuration (file, env, validation)

pub mod annotate;
pub mod broadcast;
pub mod config;
pub mod detect;
pub mod frame;
pub mod gate;
pub mod ingest;
pub mod pipeline;
pub mod server;

pub use annotate::{AnnotationStyle, Annotator};
pub use broadcast::FrameBroadcaster;
pub use config::StreamdConfig;
pub use detect::{decode_detections, DecodeParams, DetectionBox, InferenceEngine, Tensor};
pub use frame::{EncodedFrame, RawFrame, FRAME_HEIGHT, FRAME_WIDTH};
pub use gate::InferenceGate;
pub use ingest::{CameraConfig, CameraSource, FrameSource};
pub use pipeline::{CaptureLoop, PipelineSettings, PipelineStats};
pub use server::{ServerConfig, ServerHandle, StreamServer};
