//! Application Configuration
//!
//! User settings and preferences stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::layout::LayoutParams;
use crate::vision::postprocess::DbParams;

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Reading order and overlay policy
    pub layout: LayoutParams,
    /// Recognition engine settings
    pub engine: EngineSettings,
    /// Viewer window settings
    pub viewer: ViewerSettings,
}

/// Recognition engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Run inference on the GPU where the platform supports it
    pub use_acceleration: bool,
    /// Long side limit for the detection input
    pub detection_target_size: u32,
    /// Pixel probability threshold for the text mask
    pub box_threshold: f32,
    /// Minimum mean probability of a kept box
    pub box_score_threshold: f32,
    /// Box expansion ratio
    pub unclip_ratio: f32,
    /// Minimum short side of a kept box
    pub min_box_size: f32,
    /// Recognition input height
    pub recognition_height: u32,
    /// Recognition input width limit
    pub recognition_max_width: u32,
    /// Fold lone periods into the preceding word
    pub merge_detached_periods: bool,
    /// Model directory override (defaults to `<data_dir>/models`)
    pub models_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            use_acceleration: false,
            detection_target_size: 1024,
            box_threshold: 0.3,
            box_score_threshold: 0.6,
            unclip_ratio: 1.5,
            min_box_size: 3.0,
            recognition_height: 48,
            recognition_max_width: 1280,
            merge_detached_periods: true,
            models_dir: None,
        }
    }
}

impl EngineSettings {
    /// Detector postprocessing parameters
    pub fn db_params(&self) -> DbParams {
        DbParams {
            box_threshold: self.box_threshold,
            box_score_threshold: self.box_score_threshold,
            unclip_ratio: self.unclip_ratio,
            min_box_size: self.min_box_size,
            ..DbParams::default()
        }
    }
}

/// Viewer window settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub window_width: f32,
    pub window_height: f32,
    /// Tallest the photo is drawn before scaling down
    pub max_preview_height: f32,
    /// Outline recognized regions
    pub show_boxes: bool,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            window_width: 1000.0,
            window_height: 800.0,
            max_preview_height: 600.0,
            show_boxes: false,
        }
    }
}

/// Default config file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Load configuration, or defaults when the file does not exist
pub fn load_config_or_default(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        info!("No config at {:?}, using defaults", path);
        return Ok(AppConfig::default());
    }
    load_config(path)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
