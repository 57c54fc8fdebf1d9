//! Real-time face detection loop.
//!
//! A [`pipeline::pipeline_controller::PipelineController`] pulls frames from
//! a [`video::domain::frame_source::FrameSource`], runs them through a face
//! model and draws the boxes on an overlay surface, one cycle at a time.

pub mod detection;
pub mod lifecycle;
pub mod overlay;
pub mod pipeline;
pub mod shared;
pub mod video;

/// Error type crossing collaborator seams (camera, model, runtime).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
