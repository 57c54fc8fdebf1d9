use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::domain::face_model::EstimateFlags;
use crate::overlay::domain::drawing_surface::StrokeStyle;
use crate::shared::constants::{
    DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_MIN_CYCLE_DELAY_MS, DEFAULT_REFRESH_HZ,
};
use crate::video::domain::frame_source::{CaptureConfig, OutputConfig};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("channel depth must be 3 or 4, got {0}")]
    InvalidChannels(u8),
    #[error("{0} size must be non-zero")]
    EmptySize(&'static str),
    #[error("max_consecutive_failures must be at least 1")]
    ZeroFailureThreshold,
    #[error("refresh_hz must be at least 1")]
    ZeroRefreshRate,
    #[error("line width must be positive and finite, got {0}")]
    InvalidLineWidth(String),
}

/// Everything the loop needs at construction. Missing JSON fields fall back
/// to the defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output: OutputConfig,
    pub capture: CaptureConfig,
    #[serde(with = "millis")]
    pub min_cycle_delay: Duration,
    pub max_consecutive_failures: u32,
    pub refresh_hz: u32,
    pub flip_horizontal: bool,
    pub stroke: StrokeStyle,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            capture: CaptureConfig::default(),
            min_cycle_delay: Duration::from_millis(DEFAULT_MIN_CYCLE_DELAY_MS),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            refresh_hz: DEFAULT_REFRESH_HZ,
            flip_horizontal: false,
            stroke: StrokeStyle::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.output.channels, 3 | 4) {
            return Err(ConfigError::InvalidChannels(self.output.channels));
        }
        if self.output.size().is_empty() {
            return Err(ConfigError::EmptySize("output"));
        }
        if self.capture.size().is_empty() {
            return Err(ConfigError::EmptySize("capture"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.refresh_hz == 0 {
            return Err(ConfigError::ZeroRefreshRate);
        }
        let width = self.stroke.line_width;
        if !(width.is_finite() && width > 0.0) {
            return Err(ConfigError::InvalidLineWidth(width.to_string()));
        }
        Ok(())
    }

    pub fn estimate_flags(&self) -> EstimateFlags {
        EstimateFlags {
            flip_horizontal: self.flip_horizontal,
        }
    }

    /// Parses a JSON config and validates it.
    pub fn from_json(text: &str) -> Result<Self, crate::BoxError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

/// `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
