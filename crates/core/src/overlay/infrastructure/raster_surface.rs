use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::{Rgba, RgbaImage};

use crate::overlay::domain::drawing_surface::{DrawingSurface, StrokeStyle};
use crate::shared::frame::FrameSize;
use crate::BoxError;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// In-memory RGBA overlay backed by the `image` crate.
///
/// Pixels are painted when their center falls inside the shape, so a
/// stroke of width 2 on integer coordinates covers exactly one pixel on
/// each side of the edge.
pub struct RasterSurface {
    image: RgbaImage,
}

impl RasterSurface {
    pub fn new(size: FrameSize) -> Self {
        Self {
            image: RgbaImage::from_pixel(size.width, size.height, TRANSPARENT),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Writes the overlay as a PNG, creating parent directories as needed.
    pub fn save_png(&self, path: &Path) -> Result<(), BoxError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.image
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }

    /// Pixel index range whose centers lie in `[lo, hi)`, clipped to `limit`.
    fn span(lo: f64, hi: f64, limit: u32) -> std::ops::Range<u32> {
        let start = (lo - 0.5).ceil().max(0.0);
        let end = (hi - 0.5).ceil().clamp(0.0, limit as f64);
        if end <= start {
            return 0..0;
        }
        start as u32..end as u32
    }
}

impl Default for RasterSurface {
    fn default() -> Self {
        Self::new(FrameSize::new(300, 150))
    }
}

impl DrawingSurface for RasterSurface {
    fn size(&self) -> FrameSize {
        FrameSize::new(self.image.width(), self.image.height())
    }

    fn set_size(&mut self, size: FrameSize) {
        self.image = RgbaImage::from_pixel(size.width, size.height, TRANSPARENT);
    }

    fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        let cols = Self::span(x, x + width, self.image.width());
        for py in Self::span(y, y + height, self.image.height()) {
            for px in cols.clone() {
                self.image.put_pixel(px, py, TRANSPARENT);
            }
        }
    }

    fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64, style: &StrokeStyle) {
        let half = style.line_width / 2.0;
        let (ox0, oy0) = (x - half, y - half);
        let (ox1, oy1) = (x + width + half, y + height + half);
        let (ix0, iy0) = (x + half, y + half);
        let (ix1, iy1) = (x + width - half, y + height - half);
        let color = Rgba(style.color);

        let cols = Self::span(ox0, ox1, self.image.width());
        for py in Self::span(oy0, oy1, self.image.height()) {
            let cy = py as f64 + 0.5;
            for px in cols.clone() {
                let cx = px as f64 + 0.5;
                let inside_inner = cx > ix0 && cx < ix1 && cy > iy0 && cy < iy1;
                if !inside_inner {
                    self.image.put_pixel(px, py, color);
                }
            }
        }
    }
}

/// Cloneable handle to one [`RasterSurface`].
///
/// The loop draws through the clone it was mounted with while the host
/// keeps another to read or export the overlay.
#[derive(Clone, Default)]
pub struct SharedRasterSurface {
    inner: Arc<Mutex<RasterSurface>>,
}

impl SharedRasterSurface {
    pub fn new(size: FrameSize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RasterSurface::new(size))),
        }
    }

    /// Copy of the current overlay pixels.
    pub fn snapshot(&self) -> RgbaImage {
        self.lock().image().clone()
    }

    pub fn save_png(&self, path: &Path) -> Result<(), BoxError> {
        self.lock().save_png(path)
    }

    fn lock(&self) -> MutexGuard<'_, RasterSurface> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DrawingSurface for SharedRasterSurface {
    fn size(&self) -> FrameSize {
        self.lock().size()
    }

    fn set_size(&mut self, size: FrameSize) {
        self.lock().set_size(size);
    }

    fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.lock().clear_rect(x, y, width, height);
    }

    fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64, style: &StrokeStyle) {
        self.lock().stroke_rect(x, y, width, height, style);
    }
}
