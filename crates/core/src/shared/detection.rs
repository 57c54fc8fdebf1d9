use super::frame::FrameSize;

/// A point in buffer-pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One face bounding box produced by the model for a single cycle.
///
/// Coordinates are in the pixel space of the frame buffer that was
/// estimated, so the overlay can draw them without rescaling as long as the
/// surface matches the configured output size.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub top_left: Point,
    pub bottom_right: Point,
    /// Model confidence in `[0, 1]`, when the model reports one.
    pub score: Option<f32>,
}

impl Detection {
    pub fn new(top_left: Point, bottom_right: Point) -> Self {
        Self {
            top_left,
            bottom_right,
            score: None,
        }
    }

    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(Point::new(x1, y1), Point::new(x2, y2))
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn width(&self) -> f64 {
        self.bottom_right.x - self.top_left.x
    }

    pub fn height(&self) -> f64 {
        self.bottom_right.y - self.top_left.y
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Clamps the box to `[0, width] × [0, height]`.
    ///
    /// Returns `None` when nothing of the box remains inside the frame or a
    /// corner is not finite.
    pub fn clamp_to(&self, size: FrameSize) -> Option<Detection> {
        let corners = [
            self.top_left.x,
            self.top_left.y,
            self.bottom_right.x,
            self.bottom_right.y,
        ];
        if !corners.iter().all(|v| v.is_finite()) {
            return None;
        }
        let max_x = size.width as f64;
        let max_y = size.height as f64;
        let x1 = self.top_left.x.clamp(0.0, max_x);
        let y1 = self.top_left.y.clamp(0.0, max_y);
        let x2 = self.bottom_right.x.clamp(0.0, max_x);
        let y2 = self.bottom_right.y.clamp(0.0, max_y);
        if x2 - x1 <= 0.0 || y2 - y1 <= 0.0 {
            return None;
        }
        Some(Detection {
            top_left: Point::new(x1, y1),
            bottom_right: Point::new(x2, y2),
            score: self.score,
        })
    }

    /// Mirrors the box horizontally inside a frame of the given width.
    pub fn mirrored(&self, frame_width: u32) -> Detection {
        let w = frame_width as f64;
        Detection {
            top_left: Point::new(w - self.bottom_right.x, self.top_left.y),
            bottom_right: Point::new(w - self.top_left.x, self.bottom_right.y),
            score: self.score,
        }
    }

    pub fn iou(&self, other: &Detection) -> f64 {
        let ix1 = self.top_left.x.max(other.top_left.x);
        let iy1 = self.top_left.y.max(other.top_left.y);
        let ix2 = self.bottom_right.x.min(other.bottom_right.x);
        let iy2 = self.bottom_right.y.min(other.bottom_right.y);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }
}
