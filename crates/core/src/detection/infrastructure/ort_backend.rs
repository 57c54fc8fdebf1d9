use async_trait::async_trait;

use crate::detection::domain::compute_backend::ComputeBackend;
use crate::BoxError;

use super::execution_provider::{preferred_execution_providers, preferred_provider_label};

/// Brings up the ONNX Runtime environment shared by every session.
pub struct OrtBackend {
    name: String,
}

impl OrtBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for OrtBackend {
    fn default() -> Self {
        Self::new("facewatch")
    }
}

#[async_trait]
impl ComputeBackend for OrtBackend {
    async fn initialize(&mut self) -> Result<String, BoxError> {
        let committed = ort::init()
            .with_name(self.name.as_str())
            .with_execution_providers(preferred_execution_providers())
            .commit();
        log::debug!("ONNX Runtime environment commit: {committed:?}");

        // Creating a session builder forces the runtime library to load.
        ort::session::Session::builder()?;

        Ok(format!("ONNX Runtime ({})", preferred_provider_label()))
    }
}
