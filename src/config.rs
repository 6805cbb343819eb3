use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::transport::Endpoint;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRAIN_TIMEOUT_SECS: u64 = 15 * 60;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 30;
const DEFAULT_RETRAINING_THRESHOLD: u32 = 10;
const DEFAULT_IMAGE_REF: &str = "backend/uploads/first_image.jpg";
const DEFAULT_DISPLAY_MAX_WIDTH: u32 = 640;
const DEFAULT_DISPLAY_MAX_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct ClientConfigFile {
    base_url: Option<String>,
    default_image_ref: Option<String>,
    overlay_dir: Option<PathBuf>,
    timeouts: Option<TimeoutsConfigFile>,
    stats: Option<StatsConfigFile>,
    display: Option<DisplayConfigFile>,
    endpoints: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
struct TimeoutsConfigFile {
    request_secs: Option<u64>,
    retrain_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StatsConfigFile {
    interval_secs: Option<u64>,
    retraining_threshold: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    max_width: Option<u32>,
    max_height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Image reference sent when a disposition has no server-side path yet.
    pub default_image_ref: String,
    /// Where annotated overlay images are written; `None` disables rendering.
    pub overlay_dir: Option<PathBuf>,
    pub timeouts: TimeoutSettings,
    pub stats: StatsSettings,
    pub display: DisplaySettings,
    pub endpoints: EndpointPaths,
}

#[derive(Debug, Clone)]
pub struct TimeoutSettings {
    pub request: Duration,
    pub retrain: Duration,
}

#[derive(Debug, Clone)]
pub struct StatsSettings {
    pub interval: Duration,
    /// Confirmed images the service wants before retraining.
    pub retraining_threshold: u32,
}

/// Bounds an image is fitted into when it is shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySettings {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_DISPLAY_MAX_WIDTH,
            max_height: DEFAULT_DISPLAY_MAX_HEIGHT,
        }
    }
}

/// Route of each endpoint relative to the base url.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointPaths {
    overrides: HashMap<Endpoint, String>,
}

impl EndpointPaths {
    pub fn path(&self, endpoint: Endpoint) -> &str {
        self.overrides
            .get(&endpoint)
            .map(String::as_str)
            .unwrap_or_else(|| endpoint.default_path())
    }

    pub fn set(&mut self, endpoint: Endpoint, path: impl Into<String>) {
        self.overrides.insert(endpoint, path.into());
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_image_ref: DEFAULT_IMAGE_REF.to_string(),
            overlay_dir: None,
            timeouts: TimeoutSettings {
                request: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
                retrain: Duration::from_secs(DEFAULT_RETRAIN_TIMEOUT_SECS),
            },
            stats: StatsSettings {
                interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
                retraining_threshold: DEFAULT_RETRAINING_THRESHOLD,
            },
            display: DisplaySettings::default(),
            endpoints: EndpointPaths::default(),
        }
    }
}

impl ClientConfig {
    /// Loads `PARKING_CAPTURE_CONFIG` (if set), then applies env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PARKING_CAPTURE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

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

    fn from_file(file: ClientConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let timeouts = file.timeouts.unwrap_or_default();
        let stats = file.stats.unwrap_or_default();
        let display = file.display.unwrap_or_default();

        let mut endpoints = EndpointPaths::default();
        for (name, path) in file.endpoints.unwrap_or_default() {
            let endpoint = Endpoint::from_name(&name)
                .ok_or_else(|| anyhow!("unknown endpoint '{}' in config", name))?;
            endpoints.set(endpoint, path);
        }

        Ok(Self {
            base_url: file.base_url.unwrap_or(defaults.base_url),
            default_image_ref: file
                .default_image_ref
                .unwrap_or(defaults.default_image_ref),
            overlay_dir: file.overlay_dir,
            timeouts: TimeoutSettings {
                request: timeouts
                    .request_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeouts.request),
                retrain: timeouts
                    .retrain_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeouts.retrain),
            },
            stats: StatsSettings {
                interval: stats
                    .interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.stats.interval),
                retraining_threshold: stats
                    .retraining_threshold
                    .unwrap_or(defaults.stats.retraining_threshold),
            },
            display: DisplaySettings {
                max_width: display.max_width.unwrap_or(defaults.display.max_width),
                max_height: display.max_height.unwrap_or(defaults.display.max_height),
            },
            endpoints,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("PARKING_CAPTURE_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        if let Ok(image_ref) = std::env::var("PARKING_CAPTURE_DEFAULT_IMAGE_REF") {
            if !image_ref.trim().is_empty() {
                self.default_image_ref = image_ref;
            }
        }
        if let Ok(dir) = std::env::var("PARKING_CAPTURE_OVERLAY_DIR") {
            if !dir.trim().is_empty() {
                self.overlay_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(timeout) = std::env::var("PARKING_CAPTURE_TIMEOUT_SECS") {
            self.timeouts.request = Duration::from_secs(parse_secs(
                "PARKING_CAPTURE_TIMEOUT_SECS",
                &timeout,
            )?);
        }
        if let Ok(interval) = std::env::var("PARKING_CAPTURE_STATS_INTERVAL_SECS") {
            self.stats.interval = Duration::from_secs(parse_secs(
                "PARKING_CAPTURE_STATS_INTERVAL_SECS",
                &interval,
            )?);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| anyhow!("invalid base_url '{}': {}", self.base_url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "base_url must use http or https, got '{}'",
                url.scheme()
            ));
        }
        if self.timeouts.request.is_zero() || self.timeouts.retrain.is_zero() {
            return Err(anyhow!("timeouts must be greater than zero"));
        }
        if self.stats.interval.is_zero() {
            return Err(anyhow!("stats interval must be greater than zero"));
        }
        if self.stats.retraining_threshold == 0 {
            return Err(anyhow!("retraining threshold must be greater than zero"));
        }
        if self.display.max_width == 0 || self.display.max_height == 0 {
            return Err(anyhow!("display bounds must be greater than zero"));
        }
        for endpoint in Endpoint::ALL {
            let path = self.endpoints.path(endpoint);
            if !path.starts_with('/') {
                return Err(anyhow!(
                    "endpoint path for {} must start with '/', got '{}'",
                    endpoint,
                    path
                ));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ClientConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_secs(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be an integer number of seconds", name))
}
