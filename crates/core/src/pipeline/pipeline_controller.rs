use crossbeam_channel::{Receiver, Sender};

use super::detection_cycle::{DetectionCycle, SurfaceCommand};
use super::error::InitError;
use super::pacing_scheduler::{LoopHandle, LoopParts, PacingScheduler, SchedulerOptions};
use super::pipeline_config::{ConfigError, PipelineConfig};
use super::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use super::pipeline_state::{PipelineState, PipelineStatus};
use super::refresh_signal::{IntervalRefresh, RefreshSignal};
use crate::detection::domain::compute_backend::ComputeBackend;
use crate::detection::domain::face_model::ModelLoader;
use crate::detection::inference_stage::InferenceStage;
use crate::lifecycle::buffer_tracker::{BufferStats, BufferTracker};
use crate::overlay::domain::drawing_surface::DrawingSurface;
use crate::overlay::overlay_renderer::OverlayRenderer;
use crate::video::domain::frame_source::FrameSource;

/// The external pieces a controller drives.
pub struct Collaborators {
    pub source: Box<dyn FrameSource>,
    pub backend: Box<dyn ComputeBackend>,
    pub loader: Box<dyn ModelLoader>,
}

/// Orchestrates startup and owns the running loop.
///
/// `initialize` walks permission → runtime → model and only then starts
/// the scheduler; any failure on the way is terminal. There is no degraded
/// mode: either the loop runs with a loaded model or it does not run.
pub struct PipelineController {
    config: PipelineConfig,
    status: PipelineStatus,
    tracker: BufferTracker,
    scheduler: PacingScheduler,
    collaborators: Option<Collaborators>,
    refresh: Option<Box<dyn RefreshSignal>>,
    logger: Option<Box<dyn PipelineLogger>>,
    surface_tx: Sender<SurfaceCommand>,
    surface_rx: Option<Receiver<SurfaceCommand>>,
    stopped: Option<LoopParts>,
}

impl PipelineController {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        let status = PipelineStatus::new();
        let scheduler = PacingScheduler::new(
            SchedulerOptions {
                min_cycle_delay: config.min_cycle_delay,
                max_consecutive_failures: config.max_consecutive_failures,
            },
            status.clone(),
        );
        let (surface_tx, surface_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            config,
            status,
            tracker: BufferTracker::new(),
            scheduler,
            collaborators: Some(collaborators),
            refresh: None,
            logger: None,
            surface_tx,
            surface_rx: Some(surface_rx),
            stopped: None,
        })
    }

    /// Replaces the default interval refresh (at `config.refresh_hz`).
    pub fn with_refresh(mut self, refresh: Box<dyn RefreshSignal>) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Replaces the default silent logger.
    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Runs the startup sequence and starts the loop.
    pub async fn initialize(&mut self) -> Result<LoopHandle, InitError> {
        let state = self.status.state();
        if state != PipelineState::Uninitialized {
            return Err(InitError::InvalidState(state.to_string()));
        }
        let Collaborators {
            mut source,
            mut backend,
            mut loader,
        } = self
            .collaborators
            .take()
            .ok_or_else(|| InitError::InvalidState(state.to_string()))?;

        self.status.transition(PipelineState::AwaitingPermission);
        if let Err(e) = source.request_permission().await {
            return Err(self.abort(InitError::PermissionDenied(e)));
        }

        self.status.transition(PipelineState::LoadingRuntime);
        match backend.initialize().await {
            Ok(runtime) => log::info!("Compute runtime: {runtime}"),
            Err(e) => {
                source.close();
                return Err(self.abort(InitError::RuntimeUnavailable(e)));
            }
        }

        self.status.transition(PipelineState::LoadingModel);
        let model = match loader.load().await {
            Ok(model) => model,
            Err(e) => {
                source.close();
                return Err(self.abort(InitError::ModelLoadFailed(e)));
            }
        };

        self.status.transition(PipelineState::Ready);
        let mut stage = InferenceStage::new(self.config.estimate_flags());
        stage.publish(model);

        let surface_rx = self
            .surface_rx
            .take()
            .ok_or_else(|| InitError::InvalidState("surface channel already taken".into()))?;
        let cycle = DetectionCycle::new(
            source,
            stage,
            OverlayRenderer::new(self.config.stroke),
            self.tracker.clone(),
            self.config.output,
            surface_rx,
        );
        let refresh = self
            .refresh
            .take()
            .unwrap_or_else(|| Box::new(IntervalRefresh::new(self.config.refresh_hz)));
        let logger = self
            .logger
            .take()
            .unwrap_or_else(|| Box::new(NullPipelineLogger));

        let handle = self.scheduler.start(Box::new(cycle), refresh, logger)?;
        Ok(handle)
    }

    fn abort(&self, err: InitError) -> InitError {
        self.status.fail(err.to_string());
        err
    }

    /// Hands a drawing surface to the loop. Allowed at any time before
    /// `dispose`; the loop picks it up at its next stage boundary.
    pub fn mount_surface(&self, surface: Box<dyn DrawingSurface>) {
        if self.surface_tx.send(SurfaceCommand::Mount(surface)).is_err() {
            log::warn!("Surface mounted after dispose; ignoring");
        }
    }

    pub fn unmount_surface(&self) {
        let _ = self.surface_tx.send(SurfaceCommand::Unmount);
    }

    /// Stops the loop. The cycle in flight may finish but draws nothing.
    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    /// Waits for the loop to exit (after `stop`, an error, or never if
    /// neither happens). Returns the number of cycles it ran.
    pub async fn join(&mut self) -> Option<u64> {
        let parts = self.scheduler.join().await?;
        let cycles = parts.cycles;
        self.stopped = Some(parts);
        Some(cycles)
    }

    /// Stops, joins, and releases the camera and model. Terminal.
    pub async fn dispose(&mut self) {
        if self.status.state() == PipelineState::Disposed {
            return;
        }
        self.stop();
        self.join().await;
        if let Some(mut parts) = self.stopped.take() {
            parts.cycle.dispose();
        }
        if let Some(mut collaborators) = self.collaborators.take() {
            collaborators.source.close();
        }
        self.surface_rx = None;
        self.status.transition(PipelineState::Disposed);
        log::info!("Pipeline disposed");
    }

    pub fn state(&self) -> PipelineState {
        self.status.state()
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.last_error()
    }

    /// Cloneable read handle for the presentation layer.
    pub fn status(&self) -> PipelineStatus {
        self.status.clone()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.tracker.stats()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_model::{EstimateFlags, FaceModel};
    use crate::pipeline::refresh_signal::ImmediateRefresh;
    use crate::shared::detection::Detection;
    use crate::shared::frame::Frame;
    use crate::BoxError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<&'static str>>>;

    struct StubSource {
        calls: Calls,
        deny: bool,
    }

    #[async_trait]
    impl FrameSource for StubSource {
        async fn request_permission(&mut self) -> Result<(), BoxError> {
            self.calls.lock().unwrap().push("permission");
            if self.deny {
                Err("user declined".into())
            } else {
                Ok(())
            }
        }

        async fn next_frame(&mut self) -> Result<Option<Frame>, BoxError> {
            let output = PipelineConfig::default().output;
            Ok(Some(Frame::new(
                vec![0u8; output.frame_len()],
                output.width,
                output.height,
                output.channels,
                0,
            )))
        }

        fn close(&mut self) {
            self.calls.lock().unwrap().push("close");
        }
    }

    struct StubBackend {
        calls: Calls,
        fail: bool,
    }

    #[async_trait]
    impl ComputeBackend for StubBackend {
        async fn initialize(&mut self) -> Result<String, BoxError> {
            self.calls.lock().unwrap().push("runtime");
            if self.fail {
                Err("no GPU".into())
            } else {
                Ok("stub".into())
            }
        }
    }

    struct StubModel;

    #[async_trait]
    impl FaceModel for StubModel {
        async fn estimate(
            &mut self,
            _frame: &Frame,
            _flags: EstimateFlags,
        ) -> Result<Vec<Detection>, BoxError> {
            Ok(vec![])
        }
    }

    struct StubLoader {
        calls: Calls,
        fail: bool,
    }

    #[async_trait]
    impl ModelLoader for StubLoader {
        async fn load(&mut self) -> Result<Box<dyn FaceModel>, BoxError> {
            self.calls.lock().unwrap().push("model");
            if self.fail {
                Err("file truncated".into())
            } else {
                Ok(Box::new(StubModel))
            }
        }
    }

    fn controller(deny: bool, runtime_fails: bool, model_fails: bool) -> (PipelineController, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let collaborators = Collaborators {
            source: Box::new(StubSource {
                calls: calls.clone(),
                deny,
            }),
            backend: Box::new(StubBackend {
                calls: calls.clone(),
                fail: runtime_fails,
            }),
            loader: Box::new(StubLoader {
                calls: calls.clone(),
                fail: model_fails,
            }),
        };
        let controller = PipelineController::new(PipelineConfig::default(), collaborators)
            .unwrap()
            .with_refresh(Box::new(ImmediateRefresh));
        (controller, calls)
    }

    // ── initialize ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_initialize_runs_steps_in_order_and_starts() {
        let (mut c, calls) = controller(false, false, false);
        let handle = c.initialize().await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["permission", "runtime", "model"]);
        assert_eq!(c.state(), PipelineState::Running);
        assert_eq!(handle.id(), 1);
        c.dispose().await;
    }

    #[tokio::test]
    async fn test_permission_denied_is_terminal() {
        let (mut c, calls) = controller(true, false, false);
        let err = c.initialize().await.unwrap_err();

        assert!(matches!(err, InitError::PermissionDenied(_)));
        assert_eq!(*calls.lock().unwrap(), vec!["permission"]);
        assert!(matches!(c.state(), PipelineState::Error(_)));
        assert!(c.last_error().unwrap().contains("user declined"));
    }

    #[tokio::test]
    async fn test_runtime_failure_skips_model_load() {
        let (mut c, calls) = controller(false, true, false);
        let err = c.initialize().await.unwrap_err();

        assert!(matches!(err, InitError::RuntimeUnavailable(_)));
        assert_eq!(*calls.lock().unwrap(), vec!["permission", "runtime", "close"]);
    }

    #[tokio::test]
    async fn test_model_failure_never_runs() {
        let (mut c, _) = controller(false, false, true);
        let status = c.status();
        let err = c.initialize().await.unwrap_err();

        assert!(matches!(err, InitError::ModelLoadFailed(_)));
        assert!(!status.is_running());
        assert!(c.join().await.is_none());
    }

    #[tokio::test]
    async fn test_second_initialize_is_invalid_state() {
        let (mut c, _) = controller(true, false, false);
        let _ = c.initialize().await;
        let err = c.initialize().await.unwrap_err();
        assert!(matches!(err, InitError::InvalidState(_)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let mut config = PipelineConfig::default();
        config.output.channels = 2;
        let result = PipelineController::new(
            config,
            Collaborators {
                source: Box::new(StubSource {
                    calls: calls.clone(),
                    deny: false,
                }),
                backend: Box::new(StubBackend {
                    calls: calls.clone(),
                    fail: false,
                }),
                loader: Box::new(StubLoader { calls, fail: false }),
            },
        );
        assert!(matches!(result, Err(ConfigError::InvalidChannels(2))));
    }

    // ── stop / dispose ──────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_stop_then_join_reports_cycles() {
        let (mut c, _) = controller(false, false, false);
        c.initialize().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        c.stop();
        assert_eq!(c.state(), PipelineState::Ready);
        let cycles = c.join().await.unwrap();
        assert!(cycles > 0);
        let stats = c.buffer_stats();
        assert_eq!(stats.acquired, stats.released);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_releases_source_and_is_idempotent() {
        let (mut c, calls) = controller(false, false, false);
        c.initialize().await.unwrap();
        c.dispose().await;
        c.dispose().await;

        assert_eq!(c.state(), PipelineState::Disposed);
        let closes = calls.lock().unwrap().iter().filter(|s| **s == "close").count();
        assert_eq!(closes, 1);
        // Mounting after dispose is ignored.
        c.mount_surface(Box::new(crate::overlay::infrastructure::raster_surface::RasterSurface::default()));
    }

    #[tokio::test]
    async fn test_dispose_before_initialize_closes_source() {
        let (mut c, calls) = controller(false, false, false);
        c.dispose().await;
        assert_eq!(*calls.lock().unwrap(), vec!["close"]);
        assert!(matches!(
            c.initialize().await,
            Err(InitError::InvalidState(_))
        ));
    }
}
