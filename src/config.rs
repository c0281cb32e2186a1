use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::console::DisplayOptions;
use crate::detect::{DetectParams, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD};
use crate::frame::{Preprocess, MAX_BRIGHTNESS, MIN_BRIGHTNESS};
use crate::geometry::{
    CalibrationParameters, DEFAULT_CALIBRATION_DISTANCE_CM, DEFAULT_FOCAL_LENGTH_PX,
    DEFAULT_IMAGE_HEIGHT, DEFAULT_IMAGE_WIDTH, DEFAULT_REAL_WIDTH_CM,
};
use crate::zone::{TargetZone, DEFAULT_ZONE_LEFT, DEFAULT_ZONE_RIGHT};

pub const DEFAULT_CONFIG_FILE: &str = "strawberry_config.txt";

#[derive(Debug, Deserialize, Default)]
struct ConsoleConfigFile {
    real_width: Option<f64>,
    focal_length: Option<f64>,
    calibration_distance: Option<f64>,
    x_line_left: Option<i32>,
    x_line_right: Option<i32>,
    conf_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    brightness: Option<i32>,
    show_distance: Option<bool>,
    show_coordinates: Option<bool>,
    flip_horizontal: Option<bool>,
    tracking_enabled: Option<bool>,
    show_target_zone: Option<bool>,
    auto_stop_enabled: Option<bool>,
    current_camera: Option<u32>,
    image_width: Option<u32>,
    image_height: Option<u32>,
}

/// Flat operator settings, persisted as a JSON object with the same keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleConfig {
    pub real_width: f64,
    pub focal_length: f64,
    pub calibration_distance: f64,
    pub x_line_left: i32,
    pub x_line_right: i32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub brightness: i32,
    pub show_distance: bool,
    pub show_coordinates: bool,
    pub flip_horizontal: bool,
    pub tracking_enabled: bool,
    pub show_target_zone: bool,
    pub auto_stop_enabled: bool,
    pub current_camera: u32,
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self::from_file(ConsoleConfigFile::default())
    }
}

impl ConsoleConfig {
    /// Load from `HARVEST_CONFIG` (or `strawberry_config.txt`), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var("HARVEST_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// A missing or unreadable file yields the defaults; environment
    /// overrides still apply.
    pub fn load_from(path: &Path) -> Result<Self> {
        let file_cfg = if path.exists() {
            match read_config_file(path) {
                Ok(file) => {
                    log::info!("config: loaded {}", path.display());
                    file
                }
                Err(err) => {
                    log::warn!("config: {}; using defaults", err);
                    ConsoleConfigFile::default()
                }
            }
        } else {
            log::info!("config: {} not found; using defaults", path.display());
            ConsoleConfigFile::default()
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConsoleConfigFile) -> Self {
        Self {
            real_width: file.real_width.unwrap_or(DEFAULT_REAL_WIDTH_CM),
            focal_length: file.focal_length.unwrap_or(DEFAULT_FOCAL_LENGTH_PX),
            calibration_distance: file
                .calibration_distance
                .unwrap_or(DEFAULT_CALIBRATION_DISTANCE_CM),
            x_line_left: file.x_line_left.unwrap_or(DEFAULT_ZONE_LEFT),
            x_line_right: file.x_line_right.unwrap_or(DEFAULT_ZONE_RIGHT),
            conf_threshold: file.conf_threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            iou_threshold: file.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            brightness: file.brightness.unwrap_or(0),
            show_distance: file.show_distance.unwrap_or(true),
            show_coordinates: file.show_coordinates.unwrap_or(true),
            flip_horizontal: file.flip_horizontal.unwrap_or(true),
            tracking_enabled: file.tracking_enabled.unwrap_or(true),
            show_target_zone: file.show_target_zone.unwrap_or(true),
            auto_stop_enabled: file.auto_stop_enabled.unwrap_or(false),
            current_camera: file.current_camera.unwrap_or(0),
            image_width: file.image_width.unwrap_or(DEFAULT_IMAGE_WIDTH),
            image_height: file.image_height.unwrap_or(DEFAULT_IMAGE_HEIGHT),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_value("HARVEST_FOCAL_LENGTH") {
            self.focal_length = value
                .parse()
                .map_err(|_| anyhow!("HARVEST_FOCAL_LENGTH must be a number of pixels"))?;
        }
        if let Some(value) = env_value("HARVEST_REAL_WIDTH") {
            self.real_width = value
                .parse()
                .map_err(|_| anyhow!("HARVEST_REAL_WIDTH must be a width in cm"))?;
        }
        if let Some(value) = env_value("HARVEST_ZONE") {
            let (left, right) = parse_zone(&value)
                .ok_or_else(|| anyhow!("HARVEST_ZONE must be 'left,right' pixel columns"))?;
            self.x_line_left = left;
            self.x_line_right = right;
        }
        if let Some(value) = env_value("HARVEST_CONF_THRESHOLD") {
            self.conf_threshold = value
                .parse()
                .map_err(|_| anyhow!("HARVEST_CONF_THRESHOLD must be a number in [0, 1]"))?;
        }
        if let Some(value) = env_value("HARVEST_IOU_THRESHOLD") {
            self.iou_threshold = value
                .parse()
                .map_err(|_| anyhow!("HARVEST_IOU_THRESHOLD must be a number in [0, 1]"))?;
        }
        if let Some(value) = env_value("HARVEST_AUTO_STOP") {
            self.auto_stop_enabled = parse_flag(&value)
                .ok_or_else(|| anyhow!("HARVEST_AUTO_STOP must be true/false (or 1/0)"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.conf_threshold) {
            return Err(anyhow!(
                "conf_threshold must be within [0, 1] (got {})",
                self.conf_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(anyhow!(
                "iou_threshold must be within [0, 1] (got {})",
                self.iou_threshold
            ));
        }
        if self.real_width <= 0.0 {
            return Err(anyhow!("real_width must be greater than zero"));
        }
        if self.focal_length <= 0.0 {
            return Err(anyhow!("focal_length must be greater than zero"));
        }
        if self.calibration_distance <= 0.0 {
            return Err(anyhow!("calibration_distance must be greater than zero"));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(anyhow!("image dimensions must be greater than zero"));
        }
        if !(MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(&self.brightness) {
            log::warn!(
                "config: brightness {} clamped to [{}, {}]",
                self.brightness,
                MIN_BRIGHTNESS,
                MAX_BRIGHTNESS
            );
            self.brightness = self.brightness.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS);
        }
        if let Err(err) = TargetZone::new(self.x_line_left, self.x_line_right, self.image_width) {
            log::warn!("config: {}; using default zone", err);
            let fallback = TargetZone::default();
            self.x_line_left = fallback.left();
            self.x_line_right = fallback.right();
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        log::info!("config: saved {}", path.display());
        Ok(())
    }

    pub fn calibration(&self) -> CalibrationParameters {
        CalibrationParameters {
            focal_length_px: self.focal_length,
            real_width_cm: self.real_width,
            calibration_distance_cm: self.calibration_distance,
            image_width: self.image_width,
            image_height: self.image_height,
        }
    }

    /// Falls back to the default zone if the bounds no longer fit the image.
    pub fn zone(&self) -> TargetZone {
        TargetZone::new(self.x_line_left, self.x_line_right, self.image_width).unwrap_or_default()
    }

    pub fn preprocess(&self) -> Preprocess {
        Preprocess {
            mirror: self.flip_horizontal,
            brightness: self.brightness,
        }
    }

    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            confidence_threshold: self.conf_threshold,
            iou_threshold: self.iou_threshold,
            tracking: self.tracking_enabled,
        }
    }

    pub fn display(&self) -> DisplayOptions {
        DisplayOptions {
            show_distance: self.show_distance,
            show_coordinates: self.show_coordinates,
            show_target_zone: self.show_target_zone,
        }
    }
}

fn read_config_file(path: &Path) -> Result<ConsoleConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_zone(value: &str) -> Option<(i32, i32)> {
    let (left, right) = value.split_once(',')?;
    Some((left.trim().parse().ok()?, right.trim().parse().ok()?))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
