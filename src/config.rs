use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::annotate::{AnnotationStyle, DEFAULT_JPEG_QUALITY, DEFAULT_LABEL};
use crate::detect::{InputLayout, InputSpec, DEFAULT_CONF_THRESHOLD};
use crate::frame::{FRAME_HEIGHT, FRAME_WIDTH};
use crate::gate::DEFAULT_CADENCE;
use crate::ingest::CameraConfig;
use crate::pipeline::PipelineSettings;
use crate::server::ServerConfig;

const DEFAULT_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_PAGE_TITLE: &str = "Detection Stream";
const DEFAULT_CAMERA: &str = "stub://camera";
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_MODEL_INPUT: u32 = 320;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamdConfigFile {
    server: Option<ServerConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    annotation: Option<AnnotationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServerConfigFile {
    addr: Option<String>,
    page_title: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    model_path: Option<PathBuf>,
    cadence: Option<u64>,
    conf_threshold: Option<f32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    input_layout: Option<InputLayout>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnnotationConfigFile {
    label: Option<String>,
    jpeg_quality: Option<u8>,
    color: Option<[u8; 3]>,
    thickness: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamdConfig {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub detector: DetectorSettings,
    pub annotation: AnnotationStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    /// ONNX model to load. `None` selects the built-in stub engine.
    pub model_path: Option<PathBuf>,
    pub cadence: u64,
    pub conf_threshold: f32,
    pub input: InputSpec,
}

impl StreamdConfig {
    /// Load from the file named by `STREAMD_CONFIG` (if set), then apply env
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STREAMD_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as `load`, but with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamdConfigFile) -> Self {
        let server = file.server.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let annotation = file.annotation.unwrap_or_default();

        Self {
            server: ServerConfig {
                addr: server.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
                page_title: server
                    .page_title
                    .unwrap_or_else(|| DEFAULT_PAGE_TITLE.to_string()),
            },
            camera: CameraConfig {
                device: camera.device.unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                width: camera.width.unwrap_or(FRAME_WIDTH),
                height: camera.height.unwrap_or(FRAME_HEIGHT),
            },
            detector: DetectorSettings {
                model_path: detector.model_path,
                cadence: detector.cadence.unwrap_or(DEFAULT_CADENCE),
                conf_threshold: detector.conf_threshold.unwrap_or(DEFAULT_CONF_THRESHOLD),
                input: InputSpec {
                    width: detector.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                    height: detector.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
                    layout: detector.input_layout.unwrap_or_default(),
                },
            },
            annotation: AnnotationStyle {
                label_prefix: annotation
                    .label
                    .unwrap_or_else(|| DEFAULT_LABEL.to_string()),
                jpeg_quality: annotation.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                color: annotation
                    .color
                    .unwrap_or_else(|| AnnotationStyle::default().color),
                thickness: annotation
                    .thickness
                    .unwrap_or_else(|| AnnotationStyle::default().thickness),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("STREAMD_ADDR") {
            if !addr.trim().is_empty() {
                self.server.addr = addr;
            }
        }
        if let Ok(device) = std::env::var("STREAMD_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(model) = std::env::var("STREAMD_MODEL") {
            if !model.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(model));
            }
        }
        if let Ok(cadence) = std::env::var("STREAMD_CADENCE") {
            self.detector.cadence = cadence
                .trim()
                .parse()
                .map_err(|_| anyhow!("STREAMD_CADENCE must be a positive integer"))?;
        }
        if let Ok(threshold) = std::env::var("STREAMD_CONF_THRESHOLD") {
            self.detector.conf_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("STREAMD_CONF_THRESHOLD must be a number in [0, 1)"))?;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.addr.trim().is_empty() {
            return Err(anyhow!("server address must not be empty"));
        }
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }
        if self.detector.cadence == 0 {
            return Err(anyhow!("detector cadence must be >= 1"));
        }
        let threshold = self.detector.conf_threshold;
        if !(0.0..1.0).contains(&threshold) {
            return Err(anyhow!(
                "detector confidence threshold must be in [0, 1), got {}",
                threshold
            ));
        }
        if self.detector.input.width == 0 || self.detector.input.height == 0 {
            return Err(anyhow!(
                "detector input size must be non-zero, got {}x{}",
                self.detector.input.width,
                self.detector.input.height
            ));
        }
        if !(1..=100).contains(&self.annotation.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be in 1..=100, got {}",
                self.annotation.jpeg_quality
            ));
        }
        if self.annotation.thickness == 0 {
            return Err(anyhow!("box thickness must be >= 1"));
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            cadence: self.detector.cadence,
            conf_threshold: self.detector.conf_threshold,
        }
    }
}

impl Default for StreamdConfig {
    fn default() -> Self {
        Self::from_file(StreamdConfigFile::default())
    }
}

fn read_config_file(path: &Path) -> Result<StreamdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
