//! Synthetic camera source.
//!
//! Stands in for the camera on `stub://` URLs so the pipeline can run on a
//! bench without video hardware. Frames carry a slowly shifting gradient;
//! the content is irrelevant to the model-free detector backends.

use anyhow::{bail, Result};

use crate::frame::{Frame, CHANNELS};
use crate::geometry::{DEFAULT_IMAGE_HEIGHT, DEFAULT_IMAGE_WIDTH};

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Source URL, `stub://camera<N>`.
    pub url: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera0".to_string(),
            target_fps: 30,
            width: DEFAULT_IMAGE_WIDTH,
            height: DEFAULT_IMAGE_HEIGHT,
        }
    }
}

impl SyntheticConfig {
    pub fn for_camera(index: u32) -> Self {
        Self {
            url: format!("stub://camera{index}"),
            ..Self::default()
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    /// Shifts every 50 frames so consecutive scenes differ.
    scene_state: u8,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if !config.url.starts_with("stub://") {
            bail!(
                "camera source '{}' is not supported; only stub:// sources are built in",
                config.url
            );
        }
        if config.width == 0 || config.height == 0 {
            bail!("synthetic source needs non-zero frame dimensions");
        }
        Ok(Self {
            config,
            frame_count: 0,
            scene_state: 0,
            connected: false,
        })
    }

    /// Synthetic sources are always reachable.
    pub fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.config.url,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            bail!("source {} is not connected", self.config.url);
        }
        self.frame_count += 1;
        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let pixels = self.generate_pixels();
        Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let pixel_count = width * self.config.height as usize * CHANNELS;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let column = (i / CHANNELS) % width;
            *pixel = ((column as u64 + self.scene_state as u64 * 16) % 256) as u8;
        }
        pixels
    }

    pub fn is_healthy(&self) -> bool {
        self.connected
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }

    pub fn target_fps(&self) -> u32 {
        self.config.target_fps
    }
}
