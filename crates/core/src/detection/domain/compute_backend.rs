use async_trait::async_trait;

use crate::BoxError;

/// The numeric runtime the model executes on.
///
/// Must be initialized once before any model is loaded.
#[async_trait]
pub trait ComputeBackend: Send {
    /// Brings the runtime up and returns a short description for logging.
    async fn initialize(&mut self) -> Result<String, BoxError>;
}
