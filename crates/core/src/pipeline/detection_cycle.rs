use async_trait::async_trait;
use crossbeam_channel::Receiver;
use tokio::time::Instant;

use super::error::CycleError;
use super::pacing_scheduler::{Cycle, CycleContext};
use crate::detection::inference_stage::InferenceStage;
use crate::lifecycle::buffer_tracker::{BufferTracker, FrameBuffer};
use crate::overlay::domain::drawing_surface::DrawingSurface;
use crate::overlay::overlay_renderer::OverlayRenderer;
use crate::video::domain::frame_source::{FrameSource, OutputConfig};

/// Overlay changes requested from outside the loop.
pub enum SurfaceCommand {
    Mount(Box<dyn DrawingSurface>),
    Unmount,
}

/// The per-cycle work: camera → buffer → model → overlay.
///
/// Owns the frame source, the loaded model and the overlay, so the loop
/// task is their only user. Surface changes arrive over a channel and are
/// applied between stages.
pub struct DetectionCycle {
    source: Box<dyn FrameSource>,
    stage: InferenceStage,
    renderer: OverlayRenderer,
    tracker: BufferTracker,
    output: OutputConfig,
    surface_rx: Receiver<SurfaceCommand>,
}

impl DetectionCycle {
    pub fn new(
        source: Box<dyn FrameSource>,
        stage: InferenceStage,
        renderer: OverlayRenderer,
        tracker: BufferTracker,
        output: OutputConfig,
        surface_rx: Receiver<SurfaceCommand>,
    ) -> Self {
        Self {
            source,
            stage,
            renderer,
            tracker,
            output,
            surface_rx,
        }
    }

    fn apply_surface_commands(&mut self) {
        for command in self.surface_rx.try_iter() {
            match command {
                SurfaceCommand::Mount(surface) => {
                    log::debug!("Overlay surface mounted");
                    self.renderer.mount(surface);
                }
                SurfaceCommand::Unmount => {
                    log::debug!("Overlay surface unmounted");
                    self.renderer.unmount();
                }
            }
        }
    }

    async fn process(&mut self, ctx: &mut CycleContext<'_>) -> Result<(), CycleError> {
        let acquire_start = Instant::now();
        let frame = self
            .source
            .next_frame()
            .await
            .map_err(CycleError::Capture)?;
        let Some(frame) = frame else {
            log::debug!("Frame source ended; it restarts on the next pull");
            return Ok(());
        };
        if frame.size() != self.output.size() || frame.channels() != self.output.channels {
            return Err(CycleError::Capture(
                format!(
                    "frame {} x{} does not match output {} x{}",
                    frame.size(),
                    frame.channels(),
                    self.output.size(),
                    self.output.channels
                )
                .into(),
            ));
        }
        if frame.byte_len() != self.output.frame_len() {
            return Err(CycleError::Capture(
                format!(
                    "frame {} holds {} bytes, expected {}",
                    frame.index(),
                    frame.byte_len(),
                    self.output.frame_len()
                )
                .into(),
            ));
        }

        let buffer = self.tracker.acquire(frame);
        ctx.timing("acquire", acquire_start);

        let result = self.infer_and_render(&buffer, ctx).await;
        self.tracker.release(buffer)?;
        result
    }

    async fn infer_and_render(
        &mut self,
        buffer: &FrameBuffer,
        ctx: &mut CycleContext<'_>,
    ) -> Result<(), CycleError> {
        let estimate_start = Instant::now();
        let estimated = self.stage.estimate(buffer).await;
        ctx.timing("estimate", estimate_start);

        if !ctx.is_running() {
            log::debug!("Loop stopped during estimate; discarding result");
            return Ok(());
        }
        self.apply_surface_commands();

        let detections = match estimated {
            Ok(detections) => detections,
            Err(e) => {
                // No stale boxes while the model is failing.
                self.renderer.clear();
                return Err(e.into());
            }
        };
        ctx.metric("detections", detections.len() as f64);

        let render_start = Instant::now();
        self.renderer.render(&detections, buffer.size());
        ctx.timing("render", render_start);
        Ok(())
    }
}

#[async_trait]
impl Cycle for DetectionCycle {
    async fn run(&mut self, ctx: &mut CycleContext<'_>) -> Result<(), CycleError> {
        self.apply_surface_commands();
        let tracker = self.tracker.clone();
        tracker.with_scope(self.process(ctx)).await?
    }

    fn halted(&mut self) {
        self.apply_surface_commands();
        self.renderer.clear();
    }

    fn dispose(&mut self) {
        self.renderer.clear();
        self.renderer.unmount();
        self.stage.unload();
        self.source.close();
    }
}
