//! Camera frames and pre-processing.
//!
//! - `Frame`: packed 3-channel (BGR) pixels plus dimensions and capture instant.
//! - `Preprocess`: the operator's mirror and brightness settings, applied
//!   in place before detection.

use anyhow::{anyhow, Result};
use std::time::Instant;

pub const CHANNELS: usize = 3;
pub const MIN_BRIGHTNESS: i32 = -100;
pub const MAX_BRIGHTNESS: i32 = 100;

pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic frame counter assigned by the source.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer holds {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    pub fn blank(width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * CHANNELS],
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Mirror left-right, so the operator sees the scene as in a mirror.
    pub fn mirror_horizontal(&mut self) {
        let row_len = self.width as usize * CHANNELS;
        if row_len == 0 {
            return;
        }
        for row in self.data.chunks_exact_mut(row_len) {
            let width = self.width as usize;
            for col in 0..width / 2 {
                let left = col * CHANNELS;
                let right = (width - 1 - col) * CHANNELS;
                for ch in 0..CHANNELS {
                    row.swap(left + ch, right + ch);
                }
            }
        }
    }

    /// Add `beta` to every channel, then take the absolute value and saturate
    /// to 0..=255 (the `convertScaleAbs(alpha = 1)` rule).
    pub fn adjust_brightness(&mut self, beta: i32) {
        if beta == 0 {
            return;
        }
        for px in &mut self.data {
            *px = (i32::from(*px) + beta).abs().min(255) as u8;
        }
    }
}

/// Pre-processing applied to every frame before detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preprocess {
    pub mirror: bool,
    /// Additive offset in `MIN_BRIGHTNESS..=MAX_BRIGHTNESS`.
    pub brightness: i32,
}

impl Default for Preprocess {
    fn default() -> Self {
        Self {
            mirror: true,
            brightness: 0,
        }
    }
}

impl Preprocess {
    pub fn apply(&self, frame: &mut Frame) {
        if self.mirror {
            frame.mirror_horizontal();
        }
        frame.adjust_brightness(self.brightness.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, 0).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2, 0).is_ok());
    }

    #[test]
    fn mirror_swaps_pixels_not_channels() {
        // one row, three pixels
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9];
        let mut frame = Frame::new(data, 3, 1, 0).unwrap();
        frame.mirror_horizontal();
        assert_eq!(frame.pixels(), &[7, 8, 9, 4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn brightness_saturates_and_folds_negatives() {
        let mut frame = Frame::new(vec![0, 10, 200, 250, 128, 60], 2, 1, 0).unwrap();
        frame.adjust_brightness(20);
        assert_eq!(frame.pixels(), &[20, 30, 220, 255, 148, 80]);

        let mut frame = Frame::new(vec![0, 10, 200, 250, 128, 60], 2, 1, 0).unwrap();
        frame.adjust_brightness(-50);
        assert_eq!(frame.pixels(), &[50, 40, 150, 200, 78, 10]);
    }

    #[test]
    fn preprocess_clamps_brightness() {
        let mut frame = Frame::new(vec![100; 6], 2, 1, 0).unwrap();
        Preprocess {
            mirror: false,
            brightness: 500,
        }
        .apply(&mut frame);
        assert_eq!(frame.pixels(), &[200; 6]);
    }
}
