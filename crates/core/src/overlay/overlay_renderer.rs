use crate::overlay::domain::drawing_surface::{DrawingSurface, StrokeStyle};
use crate::shared::detection::Detection;
use crate::shared::frame::FrameSize;

/// Draws detection boxes onto the overlay surface.
///
/// The surface may be mounted after the loop has started, so every call
/// tolerates a missing surface by doing nothing.
pub struct OverlayRenderer {
    surface: Option<Box<dyn DrawingSurface>>,
    style: StrokeStyle,
}

impl OverlayRenderer {
    pub fn new(style: StrokeStyle) -> Self {
        Self {
            surface: None,
            style,
        }
    }

    pub fn mount(&mut self, surface: Box<dyn DrawingSurface>) {
        self.surface = Some(surface);
    }

    pub fn unmount(&mut self) -> Option<Box<dyn DrawingSurface>> {
        self.surface.take()
    }

    pub fn is_mounted(&self) -> bool {
        self.surface.is_some()
    }

    /// Replaces the overlay with one rectangle per detection.
    ///
    /// The surface is first resized to `frame_size` so box coordinates line
    /// up with the frame they came from. An empty slice leaves the surface
    /// cleared, same as [`OverlayRenderer::clear`].
    pub fn render(&mut self, detections: &[Detection], frame_size: FrameSize) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        if surface.size() != frame_size {
            log::debug!("Resizing overlay {} -> {frame_size}", surface.size());
            surface.set_size(frame_size);
        }
        clear_all(&mut **surface);

        for d in detections {
            surface.stroke_rect(
                d.top_left.x,
                d.top_left.y,
                d.width(),
                d.height(),
                &self.style,
            );
        }
    }

    pub fn clear(&mut self) {
        if let Some(surface) = self.surface.as_mut() {
            clear_all(&mut **surface);
        }
    }
}

fn clear_all(surface: &mut dyn DrawingSurface) {
    let size = surface.size();
    surface.clear_rect(0.0, 0.0, size.width as f64, size.height as f64);
}
