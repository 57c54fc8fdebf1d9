use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::shared::constants::{
    DEFAULT_OUTPUT_CHANNELS, DEFAULT_OUTPUT_HEIGHT, DEFAULT_OUTPUT_WIDTH,
};
use crate::shared::frame::{Frame, FrameSize};
use crate::BoxError;

/// Resolution requested from the capture device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
}

impl CaptureConfig {
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_OUTPUT_WIDTH,
            height: DEFAULT_OUTPUT_HEIGHT,
        }
    }
}

/// Shape of every frame handed to the loop. `channels` is 3 (RGB) or 4 (RGBA).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl OutputConfig {
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_OUTPUT_WIDTH,
            height: DEFAULT_OUTPUT_HEIGHT,
            channels: DEFAULT_OUTPUT_CHANNELS,
        }
    }
}

/// Live camera (or camera stand-in) that the loop pulls frames from.
///
/// Implementations own the device handle and convert pixels to the
/// configured [`OutputConfig`] before returning; the loop never converts.
#[async_trait]
pub trait FrameSource: Send {
    /// Asks for access to the device. An error here is a denied permission.
    async fn request_permission(&mut self) -> Result<(), BoxError>;

    /// Pulls the most recent frame.
    ///
    /// `Ok(None)` marks the end of the stream; the next pull restarts it.
    async fn next_frame(&mut self) -> Result<Option<Frame>, BoxError>;

    /// Releases the device. Default: no-op.
    fn close(&mut self) {}
}
