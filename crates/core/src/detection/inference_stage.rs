use thiserror::Error;

use crate::detection::domain::face_model::{EstimateFlags, FaceModel};
use crate::lifecycle::buffer_tracker::FrameBuffer;
use crate::shared::detection::Detection;
use crate::BoxError;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("estimate called before a model was loaded")]
    NotReady,
    #[error("model failed: {0}")]
    ModelFailure(#[source] BoxError),
}

/// Uniform async front for the loaded face model.
///
/// Owns the model-load state: the controller publishes a model here only
/// after the whole init sequence succeeded. Retrying is the scheduler's job,
/// so failures are returned as-is.
pub struct InferenceStage {
    model: Option<Box<dyn FaceModel>>,
    flags: EstimateFlags,
}

impl InferenceStage {
    pub fn new(flags: EstimateFlags) -> Self {
        Self { model: None, flags }
    }

    pub fn publish(&mut self, model: Box<dyn FaceModel>) {
        self.model = Some(model);
    }

    pub fn unload(&mut self) -> Option<Box<dyn FaceModel>> {
        self.model.take()
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    /// Runs the model on one buffer.
    ///
    /// Boxes are clamped to the buffer; boxes with nothing left inside it are
    /// dropped. Never returns `None`-like output: no faces is an empty `Vec`.
    pub async fn estimate(&mut self, buffer: &FrameBuffer) -> Result<Vec<Detection>, InferenceError> {
        let model = self.model.as_mut().ok_or(InferenceError::NotReady)?;
        let raw = model
            .estimate(buffer.frame(), self.flags)
            .await
            .map_err(InferenceError::ModelFailure)?;

        let size = buffer.size();
        Ok(raw.iter().filter_map(|d| d.clamp_to(size)).collect())
    }
}
