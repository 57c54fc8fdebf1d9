use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lifecycle of a [`PipelineController`](super::pipeline_controller::PipelineController).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    AwaitingPermission,
    LoadingRuntime,
    LoadingModel,
    Ready,
    Running,
    Error(String),
    Disposed,
}

impl PipelineState {
    pub fn is_running(&self) -> bool {
        matches!(self, PipelineState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Error(_) | PipelineState::Disposed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Uninitialized => write!(f, "uninitialized"),
            PipelineState::AwaitingPermission => write!(f, "awaiting permission"),
            PipelineState::LoadingRuntime => write!(f, "loading runtime"),
            PipelineState::LoadingModel => write!(f, "loading model"),
            PipelineState::Ready => write!(f, "ready"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Error(reason) => write!(f, "error: {reason}"),
            PipelineState::Disposed => write!(f, "disposed"),
        }
    }
}

struct StatusInner {
    state: PipelineState,
    last_error: Option<String>,
}

/// Shared, read-mostly view of the pipeline state.
///
/// The controller and the loop task write through [`PipelineStatus::transition`]
/// and [`PipelineStatus::fail`]; the presentation layer clones the handle and
/// only reads.
#[derive(Clone)]
pub struct PipelineStatus {
    inner: Arc<Mutex<StatusInner>>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusInner {
                state: PipelineState::Uninitialized,
                last_error: None,
            })),
        }
    }
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().state.is_running()
    }

    pub(crate) fn transition(&self, next: PipelineState) {
        let mut inner = self.lock();
        if inner.state != next {
            log::debug!("Pipeline {} -> {next}", inner.state);
        }
        if let PipelineState::Error(reason) = &next {
            inner.last_error = Some(reason.clone());
        }
        inner.state = next;
    }

    /// Moves to `Error(reason)` unless already disposed.
    pub(crate) fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut inner = self.lock();
        inner.last_error = Some(reason.clone());
        if inner.state != PipelineState::Disposed {
            log::error!("Pipeline error: {reason}");
            inner.state = PipelineState::Error(reason);
        }
    }

    /// Leaves `Running` for `next`; any other state is kept. Returns whether
    /// the transition happened.
    pub(crate) fn leave_running(&self, next: PipelineState) -> bool {
        let mut inner = self.lock();
        if inner.state.is_running() {
            log::debug!("Pipeline running -> {next}");
            inner.state = next;
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
