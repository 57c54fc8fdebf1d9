use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::shared::frame::Frame;
use crate::video::domain::frame_source::{FrameSource, OutputConfig};
use crate::BoxError;

/// Presents one image file as an endless camera feed.
///
/// The image is decoded once with the `image` crate, resized to the output
/// size and converted to RGB or RGBA; every pull returns a copy with the
/// next sequence number. Useful for running the loop without a device.
pub struct StillImageSource {
    path: Option<PathBuf>,
    output: OutputConfig,
    frame: Option<Frame>,
    next_index: usize,
}

impl StillImageSource {
    pub fn new(path: &Path, output: OutputConfig) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            output,
            frame: None,
            next_index: 0,
        }
    }

    /// Source that serves an already-decoded frame.
    pub fn from_frame(frame: Frame) -> Self {
        let output = OutputConfig {
            width: frame.width(),
            height: frame.height(),
            channels: frame.channels(),
        };
        Self {
            path: None,
            output,
            frame: Some(frame),
            next_index: 0,
        }
    }
}

fn load_frame(path: &Path, output: OutputConfig) -> Result<Frame, BoxError> {
    let img = image::open(path)?;
    let img = if img.width() == output.width && img.height() == output.height {
        img
    } else {
        img.resize_exact(
            output.width,
            output.height,
            image::imageops::FilterType::Triangle,
        )
    };

    let data = match output.channels {
        4 => img.to_rgba8().into_raw(),
        3 => img.to_rgb8().into_raw(),
        n => return Err(format!("unsupported channel depth {n}").into()),
    };
    Ok(Frame::new(data, output.width, output.height, output.channels, 0))
}

#[async_trait]
impl FrameSource for StillImageSource {
    async fn request_permission(&mut self) -> Result<(), BoxError> {
        if self.frame.is_some() {
            return Ok(());
        }
        let path = self.path.clone().ok_or("no image to open")?;
        let output = self.output;
        let frame = tokio::task::spawn_blocking(move || load_frame(&path, output)).await??;
        log::info!("Loaded still image {}", frame.size());
        self.frame = Some(frame);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, BoxError> {
        let template = self
            .frame
            .as_ref()
            .ok_or("image not loaded; request permission first")?;
        let frame = Frame::new(
            template.data().to_vec(),
            template.width(),
            template.height(),
            template.channels(),
            self.next_index,
        );
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if self.path.is_some() {
            self.frame = None;
        }
    }
}
