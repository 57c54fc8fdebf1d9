use thiserror::Error;

use crate::detection::inference_stage::InferenceError;
use crate::lifecycle::buffer_tracker::LifecycleError;
use crate::BoxError;

/// Terminal failures of [`PipelineController::initialize`].
///
/// [`PipelineController::initialize`]: crate::pipeline::pipeline_controller::PipelineController::initialize
#[derive(Error, Debug)]
pub enum InitError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(#[source] BoxError),
    #[error("compute runtime unavailable: {0}")]
    RuntimeUnavailable(#[source] BoxError),
    #[error("failed to load face model: {0}")]
    ModelLoadFailed(#[source] BoxError),
    #[error("initialize called in state {0}")]
    InvalidState(String),
    #[error("failed to start loop: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Why a single cycle did not complete.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("frame capture failed: {0}")]
    Capture(#[source] BoxError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl CycleError {
    /// Lifecycle errors are programming errors and halt the loop at once.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleError::Lifecycle(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("a loop is already running")]
    AlreadyRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lifecycle_errors_are_fatal() {
        assert!(CycleError::Lifecycle(LifecycleError::LeakDetected { count: 1 }).is_fatal());
        assert!(!CycleError::Inference(InferenceError::NotReady).is_fatal());
        assert!(!CycleError::Capture("camera unplugged".into()).is_fatal());
    }

    #[test]
    fn test_init_error_messages_carry_cause() {
        let err = InitError::PermissionDenied("user declined".into());
        assert_eq!(err.to_string(), "camera permission denied: user declined");

        let err = InitError::ModelLoadFailed("file truncated".into());
        assert!(err.to_string().contains("file truncated"));
    }

    #[test]
    fn test_inference_error_is_transparent() {
        let err = CycleError::from(InferenceError::NotReady);
        assert_eq!(err.to_string(), InferenceError::NotReady.to_string());
    }
}
