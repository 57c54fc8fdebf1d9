use ndarray::{ArrayView3, ShapeError};
use serde::{Deserialize, Serialize};

/// Width × height of a frame or drawing surface, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single camera frame: contiguous RGB or RGBA bytes in row-major order.
///
/// Format conversion happens at the capture boundary only; the loop treats
/// pixel data as opaque and hands it to the model as an `[H, W, C]` view.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Capture sequence number assigned by the frame source.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// True when the data holds exactly `width * height * channels` bytes.
    pub fn is_well_formed(&self) -> bool {
        let (h, w, c) = self.shape();
        self.data.len() == h * w * c
    }

    /// `[H, W, C]` view of the pixels. Fails when the data length does not
    /// match the dimensions.
    pub fn as_ndarray(&self) -> Result<ArrayView3<'_, u8>, ShapeError> {
        ArrayView3::from_shape(self.shape(), &self.data)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}

#[cfg(test)]
impl Frame {
    /// Builds a frame without the length check, to exercise malformed input.
    pub(crate) fn unchecked(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Self {
        Self {
            data,
            width,
            height,
            channels,
            index: 0,
        }
    }
}
