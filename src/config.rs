//! Recorder configuration
//!
//! Build-time defaults plus the serde-facing [`RecorderConfig`] an embedding
//! layer hands to [`Recorder::new`](crate::recorder::Recorder::new).

use crate::capture::traits::{CaptureFormat, PixelLayout};
use crate::codec::EncoderConfig;
use crate::processing::colorspace::i420_frame_size;
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CAPTURE_WIDTH: u32 = 640;
pub const CAPTURE_HEIGHT: u32 = 480;
pub const FPS_NUMERATOR: u32 = 30;
pub const FPS_DENOMINATOR: u32 = 1;

/// Encoder quality index (0-63)
pub const ENCODER_QUALITY: u8 = 48;

/// Maximum frames between keyframes
pub const KEYFRAME_INTERVAL: u32 = 64;

/// Extra bytes of frame channel capacity beyond one frame
pub const CHANNEL_MARGIN: usize = 128;

/// Broadcast capacity for recorder events
pub const EVENT_CAPACITY: usize = 100;

/// Settings for one recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    pub fps_numerator: u32,
    pub fps_denominator: u32,

    /// Encoder quality index (0-63)
    pub quality: u8,

    /// Target bitrate in bits per second, 0 for constant quality
    pub target_bitrate: u32,

    /// Maximum frames between keyframes
    pub keyframe_interval: u32,

    /// Directory for recordings (system temp dir if unset)
    pub output_dir: Option<PathBuf>,

    /// Extra stream comments, `KEY=value`
    pub comments: Vec<String>,

    /// Fixed Ogg stream serial (random per session if unset)
    pub stream_serial: Option<u32>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            width: CAPTURE_WIDTH,
            height: CAPTURE_HEIGHT,
            fps_numerator: FPS_NUMERATOR,
            fps_denominator: FPS_DENOMINATOR,
            quality: ENCODER_QUALITY,
            target_bitrate: 0,
            keyframe_interval: KEYFRAME_INTERVAL,
            output_dir: None,
            comments: Vec::new(),
            stream_serial: None,
        }
    }
}

impl RecorderConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> RecorderResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RecorderError::InvalidConfig(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Bytes in one I420 frame
    pub fn frame_size(&self) -> usize {
        i420_frame_size(self.width, self.height)
    }

    /// Frame channel capacity for this configuration
    pub fn channel_capacity(&self) -> usize {
        self.frame_size() + CHANNEL_MARGIN
    }

    /// Directory new recordings are created in
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn capture_format(&self) -> CaptureFormat {
        CaptureFormat {
            width: self.width,
            height: self.height,
            layout: PixelLayout::I420,
            fps_numerator: self.fps_numerator,
            fps_denominator: self.fps_denominator,
        }
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        let mut config = EncoderConfig::new(
            self.width,
            self.height,
            self.fps_numerator,
            self.fps_denominator,
        )
        .with_quality(self.quality)
        .with_target_bitrate(self.target_bitrate)
        .with_keyframe_interval(self.keyframe_interval);
        config.comments = self.comments.clone();
        config
    }

    /// Reject configurations no session could be started with
    pub fn validate(&self) -> RecorderResult<()> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(RecorderError::InvalidConfig(format!(
                "frame size {}x{} must be even and non-zero",
                self.width, self.height
            )));
        }
        if let Some(dir) = &self.output_dir {
            if !dir.is_dir() {
                return Err(RecorderError::InvalidConfig(format!(
                    "output directory {} does not exist",
                    dir.display()
                )));
            }
        }
        self.encoder_config()
            .validate()
            .map_err(|e| RecorderError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecorderConfig::default();
        assert_eq!(config.frame_size(), 460_800);
        assert_eq!(config.channel_capacity(), 460_928);
        assert!(config.validate().is_ok());
        assert_eq!(config.encoder_config().quality, ENCODER_QUALITY);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = RecorderConfig::from_json(r#"{"width": 320, "height": 240, "quality": 30}"#)
            .unwrap();
        assert_eq!((config.width, config.height, config.quality), (320, 240, 30));
        assert_eq!(config.fps_numerator, FPS_NUMERATOR);
        assert_eq!(config.keyframe_interval, KEYFRAME_INTERVAL);
    }

    #[test]
    fn test_invalid_configs() {
        let err = RecorderConfig::from_json(r#"{"width": 321}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");

        let err = RecorderConfig::from_json("{not json").unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");

        let config = RecorderConfig {
            quality: 99,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RecorderConfig {
            output_dir: Some(PathBuf::from("/definitely/not/a/real/dir")),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_string(&RecorderConfig::default()).unwrap();
        assert!(json.contains("\"fpsNumerator\":30"));
        assert!(json.contains("\"keyframeInterval\":64"));
    }
}
