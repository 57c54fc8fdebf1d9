use async_trait::async_trait;

use crate::shared::detection::Detection;
use crate::shared::frame::Frame;
use crate::BoxError;

/// Options forwarded to the model on every estimate call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EstimateFlags {
    /// Mirror returned boxes horizontally (selfie-style preview).
    pub flip_horizontal: bool,
}

/// A loaded face-detection model.
///
/// Implementations may hold mutable inference state (sessions, scratch
/// tensors), hence `&mut self`. An empty `Vec` means no faces.
#[async_trait]
pub trait FaceModel: Send {
    async fn estimate(
        &mut self,
        frame: &Frame,
        flags: EstimateFlags,
    ) -> Result<Vec<Detection>, BoxError>;
}

/// Produces a [`FaceModel`] once the compute backend is available.
#[async_trait]
pub trait ModelLoader: Send {
    async fn load(&mut self) -> Result<Box<dyn FaceModel>, BoxError>;
}
