use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::{InputLayout, InputShape};
use crate::labels::LabelMap;
use crate::ConfigurationError;

const DEFAULT_CAMERA_URL: &str = "stub://camera";
const DEFAULT_CAMERA_PATH: &str = "/capture";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BACKOFF_MS: u64 = 1_000;
const DEFAULT_LABELS: [&str; 5] = ["Circulo", "Triangulo", "Quadrado", "Erro", "Vazio"];
const DEFAULT_WINDOW_SIZE: usize = 10;
const DEFAULT_THRESHOLD: f32 = 0.7;
const DEFAULT_MODEL_WIDTH: u32 = 96;
const DEFAULT_MODEL_HEIGHT: u32 = 96;
const DEFAULT_MODEL_CHANNELS: u32 = 1;
const DEFAULT_LINK_TARGET: &str = "-";
const DEFAULT_LINK_BAUD: u32 = 115_200;
const DEFAULT_LINK_SETTLE_MS: u64 = 2_000;
const DEFAULT_CAPTURE_DIR: &str = "dataset_treinamento";
const DEFAULT_CAPTURE_BATCH: u32 = 100;

pub const CONFIG_ENV: &str = "VISION_RELAY_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    camera: Option<CameraConfigFile>,
    labels: Option<Vec<String>>,
    smoothing: Option<SmoothingConfigFile>,
    model: Option<ModelConfigFile>,
    link: Option<LinkConfigFile>,
    capture: Option<CaptureConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
    backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SmoothingConfigFile {
    window_size: Option<usize>,
    threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    layout: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LinkConfigFile {
    target: Option<String>,
    baud: Option<u32>,
    settle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    output_dir: Option<PathBuf>,
    batch_size: Option<u32>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub camera: CameraSettings,
    pub labels: Vec<String>,
    pub smoothing: SmoothingSettings,
    pub model: ModelSettings,
    pub link: LinkSettings,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    /// Per-request bound on connect/read.
    pub timeout: Duration,
    /// Fixed pause after a failed iteration.
    pub backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct SmoothingSettings {
    /// K: number of vectors averaged.
    pub window_size: usize,
    /// T: inclusive confidence threshold.
    pub threshold: f32,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: Option<PathBuf>,
    pub shape: InputShape,
    pub layout: InputLayout,
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub target: String,
    pub baud: u32,
    pub settle: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub output_dir: PathBuf,
    pub batch_size: u32,
    pub interval: Duration,
}

impl RelayConfig {
    /// Load from the file named by `VISION_RELAY_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit file path taking the place of the env var.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let smoothing = file.smoothing.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let link = file.link.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();

        let layout = match model.layout.as_deref() {
            Some(raw) => raw.parse()?,
            None => InputLayout::default(),
        };

        Ok(Self {
            camera: CameraSettings {
                url: normalize_camera_url(camera.url.as_deref().unwrap_or(DEFAULT_CAMERA_URL)),
                timeout: Duration::from_millis(camera.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
                backoff: Duration::from_millis(camera.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS)),
            },
            labels: file
                .labels
                .unwrap_or_else(|| DEFAULT_LABELS.iter().map(|l| l.to_string()).collect()),
            smoothing: SmoothingSettings {
                window_size: smoothing.window_size.unwrap_or(DEFAULT_WINDOW_SIZE),
                threshold: smoothing.threshold.unwrap_or(DEFAULT_THRESHOLD),
            },
            model: ModelSettings {
                path: model.path,
                shape: InputShape::new(
                    model.width.unwrap_or(DEFAULT_MODEL_WIDTH),
                    model.height.unwrap_or(DEFAULT_MODEL_HEIGHT),
                    model.channels.unwrap_or(DEFAULT_MODEL_CHANNELS),
                ),
                layout,
            },
            link: LinkSettings {
                target: link
                    .target
                    .unwrap_or_else(|| DEFAULT_LINK_TARGET.to_string()),
                baud: link.baud.unwrap_or(DEFAULT_LINK_BAUD),
                settle: Duration::from_millis(link.settle_ms.unwrap_or(DEFAULT_LINK_SETTLE_MS)),
            },
            capture: CaptureSettings {
                output_dir: capture
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_DIR)),
                batch_size: capture.batch_size.unwrap_or(DEFAULT_CAPTURE_BATCH),
                interval: Duration::from_millis(capture.interval_ms.unwrap_or(0)),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("VISION_RELAY_CAMERA_URL") {
            self.camera.url = normalize_camera_url(&url);
        }
        if let Some(target) = non_empty_env("VISION_RELAY_LINK") {
            self.link.target = target;
        }
        if let Some(path) = non_empty_env("VISION_RELAY_MODEL") {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(labels) = non_empty_env("VISION_RELAY_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.labels = parsed;
            }
        }
        if let Some(window) = non_empty_env("VISION_RELAY_WINDOW") {
            self.smoothing.window_size = window
                .parse()
                .map_err(|_| anyhow!("VISION_RELAY_WINDOW must be a positive integer"))?;
        }
        if let Some(threshold) = non_empty_env("VISION_RELAY_THRESHOLD") {
            self.smoothing.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("VISION_RELAY_THRESHOLD must be a number"))?;
        }
        if let Some(timeout) = non_empty_env("VISION_RELAY_TIMEOUT_MS") {
            let ms: u64 = timeout
                .parse()
                .map_err(|_| anyhow!("VISION_RELAY_TIMEOUT_MS must be an integer"))?;
            self.camera.timeout = Duration::from_millis(ms);
        }
        if let Some(backoff) = non_empty_env("VISION_RELAY_BACKOFF_MS") {
            let ms: u64 = backoff
                .parse()
                .map_err(|_| anyhow!("VISION_RELAY_BACKOFF_MS must be an integer"))?;
            self.camera.backoff = Duration::from_millis(ms);
        }
        Ok(())
    }

    /// Check every invariant the pipeline relies on. Also called by binaries
    /// after applying command-line overrides.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.label_map()?;
        if self.smoothing.window_size == 0 {
            return Err(ConfigurationError::new("window_size must be at least 1"));
        }
        if !self.smoothing.threshold.is_finite() {
            return Err(ConfigurationError::new("threshold must be a finite number"));
        }
        if self.camera.timeout.is_zero() {
            return Err(ConfigurationError::new(
                "camera timeout must be greater than zero",
            ));
        }
        let shape = self.model.shape;
        if shape.width == 0 || shape.height == 0 {
            return Err(ConfigurationError::new("model width/height must be >= 1"));
        }
        if !matches!(shape.channels, 1 | 3) {
            return Err(ConfigurationError::new(format!(
                "model channels must be 1 or 3, got {}",
                shape.channels
            )));
        }
        if self.link.target.trim().is_empty() {
            return Err(ConfigurationError::new("link target must not be empty"));
        }
        if self.capture.batch_size == 0 {
            return Err(ConfigurationError::new("capture batch_size must be >= 1"));
        }
        Ok(())
    }

    pub fn label_map(&self) -> Result<LabelMap, ConfigurationError> {
        LabelMap::new(&self.labels)
    }

    pub fn set_camera(&mut self, raw: &str) {
        self.camera.url = normalize_camera_url(raw);
    }
}

/// Turn operator input into a camera URL.
///
/// - `192.168.0.100` becomes `http://192.168.0.100/capture`
/// - `http://cam.local` becomes `http://cam.local/capture`
/// - URLs with an explicit path (and `stub://` URLs) are kept as given.
pub fn normalize_camera_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("stub://") {
        return trimmed.to_string();
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    match url::Url::parse(&with_scheme) {
        Ok(mut url) if url.path().is_empty() || url.path() == "/" => {
            url.set_path(DEFAULT_CAMERA_PATH);
            url.to_string()
        }
        _ => with_scheme,
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
