use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::frame::Region;

const DEFAULT_FORMAT: &str = "mjpeg";
const DEFAULT_MIN_CONFIDENCE: f32 = 0.6;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 2;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_INPUT_SIZE: u32 = 300;

#[derive(Debug, Deserialize, Default)]
struct CamwatchConfigFile {
    devices: Option<Vec<DeviceConfigFile>>,
    classifier: Option<ClassifierConfigFile>,
    reconnect: Option<ReconnectConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DeviceConfigFile {
    name: Option<String>,
    format: Option<String>,
    source: Option<String>,
    login: Option<String>,
    password: Option<String>,
    motion_detection: Option<bool>,
    object_detection: Option<bool>,
    folder: Option<PathBuf>,
    notification: Option<String>,
    crop: Option<Region>,
    active: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    kind: Option<String>,
    url: Option<String>,
    labels: Option<PathBuf>,
    min_confidence: Option<f32>,
    model: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ReconnectConfigFile {
    delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    read_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

/// Settings for one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub name: String,
    /// Provider kind (`mjpeg`, `image`).
    pub format: String,
    /// URL for network providers, path for `image`.
    pub source: String,
    pub login: String,
    pub password: String,
    pub motion_detection: bool,
    pub object_detection: bool,
    /// Output directory for annotated frames; `None` disables persistence.
    pub folder: Option<PathBuf>,
    /// Webhook URL; `None` disables notifications.
    pub notification: Option<String>,
    pub crop: Option<Region>,
    pub active: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            format: DEFAULT_FORMAT.to_string(),
            source: String::new(),
            login: String::new(),
            password: String::new(),
            motion_detection: false,
            object_detection: false,
            folder: None,
            notification: None,
            crop: None,
            active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierKind {
    None,
    Remote,
    Stub,
    Tract,
}

impl FromStr for ClassifierKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(ClassifierKind::None),
            "remote" => Ok(ClassifierKind::Remote),
            "stub" => Ok(ClassifierKind::Stub),
            "tract" => Ok(ClassifierKind::Tract),
            other => Err(anyhow!(
                "unknown classifier kind '{}'; expected none, remote, stub or tract",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub kind: ClassifierKind,
    pub url: Option<String>,
    pub labels: Option<PathBuf>,
    pub min_confidence: f32,
    pub model: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::None,
            url: None,
            labels: None,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            model: None,
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
        }
    }
}

/// Network timeouts for stream connections.
///
/// The read timeout also bounds how long a stalled stream delays cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CamwatchConfig {
    pub devices: Vec<DeviceConfig>,
    pub classifier: ClassifierSettings,
    pub reconnect_delay: Duration,
    pub stream: StreamSettings,
}

impl CamwatchConfig {
    /// Load from the file named by `CAMWATCH_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMWATCH_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as `load`, with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => CamwatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CamwatchConfigFile) -> Result<Self> {
        let devices = file
            .devices
            .unwrap_or_default()
            .into_iter()
            .map(DeviceConfig::from_file)
            .collect();
        let classifier = match file.classifier {
            Some(classifier) => ClassifierSettings {
                kind: classifier
                    .kind
                    .as_deref()
                    .map(ClassifierKind::from_str)
                    .transpose()?
                    .unwrap_or(ClassifierKind::None),
                url: classifier.url,
                labels: classifier.labels,
                min_confidence: classifier.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                model: classifier.model,
                input_width: classifier.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
                input_height: classifier.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            None => ClassifierSettings::default(),
        };
        let reconnect_delay = Duration::from_secs(
            file.reconnect
                .and_then(|reconnect| reconnect.delay_secs)
                .unwrap_or(DEFAULT_RECONNECT_DELAY_SECS),
        );
        let stream = StreamSettings {
            read_timeout: Duration::from_secs(
                file.stream
                    .as_ref()
                    .and_then(|stream| stream.read_timeout_secs)
                    .unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
            ),
            connect_timeout: Duration::from_secs(
                file.stream
                    .and_then(|stream| stream.connect_timeout_secs)
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
        };
        Ok(Self {
            devices,
            classifier,
            reconnect_delay,
            stream,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CAMWATCH_CLASSIFIER_URL") {
            if !url.trim().is_empty() {
                self.classifier.url = Some(url);
                if self.classifier.kind == ClassifierKind::None {
                    self.classifier.kind = ClassifierKind::Remote;
                }
            }
        }
        if let Ok(labels) = std::env::var("CAMWATCH_CLASSIFIER_LABELS") {
            if !labels.trim().is_empty() {
                self.classifier.labels = Some(PathBuf::from(labels));
            }
        }
        if let Ok(confidence) = std::env::var("CAMWATCH_MIN_CONFIDENCE") {
            self.classifier.min_confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAMWATCH_MIN_CONFIDENCE must be a number"))?;
        }
        if let Ok(delay) = std::env::var("CAMWATCH_RECONNECT_DELAY_SECS") {
            let seconds: u64 = delay.trim().parse().map_err(|_| {
                anyhow!("CAMWATCH_RECONNECT_DELAY_SECS must be an integer number of seconds")
            })?;
            self.reconnect_delay = Duration::from_secs(seconds);
        }
        if let Ok(timeout) = std::env::var("CAMWATCH_READ_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("CAMWATCH_READ_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.stream.read_timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let mut names = HashSet::new();
        for device in &mut self.devices {
            if device.name.trim().is_empty() {
                return Err(anyhow!("device name must not be empty"));
            }
            if !names.insert(device.name.clone()) {
                return Err(anyhow!("duplicate device name '{}'", device.name));
            }
            if device.source.trim().is_empty() {
                return Err(anyhow!("device '{}' has no source", device.name));
            }
            if device.crop.map_or(false, |crop| crop.is_empty()) {
                device.crop = None;
            }
        }

        if !(0.0..=1.0).contains(&self.classifier.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be within [0, 1], got {}",
                self.classifier.min_confidence
            ));
        }
        match self.classifier.kind {
            ClassifierKind::Remote if self.classifier.url.is_none() => {
                return Err(anyhow!("remote classifier requires a url"));
            }
            ClassifierKind::Tract if self.classifier.model.is_none() => {
                return Err(anyhow!("tract classifier requires a model path"));
            }
            _ => {}
        }
        if self.classifier.input_width == 0 || self.classifier.input_height == 0 {
            return Err(anyhow!("classifier input size must be non-zero"));
        }

        if self.stream.read_timeout.is_zero() {
            return Err(anyhow!("stream read timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Keep only the named devices. Unknown names are an error.
    pub fn retain_devices(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            if !self.devices.iter().any(|device| &device.name == name) {
                return Err(anyhow!("no device named '{}' in configuration", name));
            }
        }
        self.devices.retain(|device| names.contains(&device.name));
        Ok(())
    }
}

impl DeviceConfig {
    fn from_file(file: DeviceConfigFile) -> Self {
        let defaults = DeviceConfig::default();
        Self {
            name: file.name.unwrap_or_default(),
            format: file.format.unwrap_or(defaults.format),
            source: file.source.unwrap_or_default(),
            login: file.login.unwrap_or_default(),
            password: file.password.unwrap_or_default(),
            motion_detection: file.motion_detection.unwrap_or(defaults.motion_detection),
            object_detection: file.object_detection.unwrap_or(defaults.object_detection),
            folder: file.folder.filter(|folder| !folder.as_os_str().is_empty()),
            notification: file.notification.filter(|url| !url.trim().is_empty()),
            crop: file.crop,
            active: file.active.unwrap_or(defaults.active),
        }
    }
}

fn read_config_file(path: &Path) -> Result<CamwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
