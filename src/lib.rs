pub mod capture;
pub mod compositor;
pub mod display;
pub mod error;
pub mod nav;
pub mod pipeline;
pub mod route;
pub mod startup;
pub mod tracking;
pub mod utils;
pub mod worker;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use capture::frame::PixelFormat;
use compositor::{FitMode, RotateDirection};
use serde::{Deserialize, Serialize};

use crate::utils::Facing;

/// Config file used when neither `--config` nor `WAYFINDER_CONFIG` is given
pub const DEFAULT_CONFIG_FILE: &str = "wayfinder.toml";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub route: RouteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Ideal resolution; the driver may settle on another
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub facing: Facing,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_interval_ms: u64,
    pub debounce_ms: u64,
    pub ring_buffer_size: usize,
    pub rotate: RotateDirection,
    pub fit: FitMode,
    pub worker_ready_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub base_url: String,
    pub name: String,
    /// Load markers from this JSON file instead of the waypoint service
    pub file: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            format: PixelFormat::Mjpeg,
            facing: Facing::Environment,
            buffer_count: 4,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
            title: "Wayfinder".into(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 300,
            debounce_ms: 100,
            ring_buffer_size: 2,
            rotate: RotateDirection::Right,
            fit: FitMode::Cover,
            worker_ready_timeout_ms: 2000,
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            name: String::new(),
            file: None,
        }
    }
}

impl PipelineConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn worker_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_ready_timeout_ms)
    }
}

impl Config {
    /// Layer an optional TOML file and `WAYFINDER_*` environment variables
    /// over the defaults. Nested keys use `__`, e.g.
    /// `WAYFINDER_PIPELINE__SAMPLE_INTERVAL_MS=200`.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("WAYFINDER_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("WAYFINDER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
