use serde::{Deserialize, Serialize};

use crate::shared::frame::FrameSize;

/// Outline style for detection rectangles.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    /// Straight (non-premultiplied) RGBA.
    pub color: [u8; 4],
    pub line_width: f64,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: [255, 0, 0, 255],
            line_width: 2.0,
        }
    }
}

/// 2D immediate-mode drawing context layered above the live video.
///
/// Mirrors a canvas: changing the size discards existing content. The
/// pipeline never touches the video layer itself, only this surface.
pub trait DrawingSurface: Send {
    fn size(&self) -> FrameSize;

    fn set_size(&mut self, size: FrameSize);

    fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64);

    fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64, style: &StrokeStyle);
}
