//! End-to-end loop behavior with scripted camera, runtime, model and surface.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use facewatch_core::detection::domain::compute_backend::ComputeBackend;
use facewatch_core::detection::domain::face_model::{EstimateFlags, FaceModel, ModelLoader};
use facewatch_core::overlay::domain::drawing_surface::{DrawingSurface, StrokeStyle};
use facewatch_core::pipeline::error::InitError;
use facewatch_core::pipeline::pipeline_config::PipelineConfig;
use facewatch_core::pipeline::pipeline_controller::{Collaborators, PipelineController};
use facewatch_core::pipeline::pipeline_state::PipelineState;
use facewatch_core::pipeline::refresh_signal::ImmediateRefresh;
use facewatch_core::shared::detection::Detection;
use facewatch_core::shared::frame::{Frame, FrameSize};
use facewatch_core::video::domain::frame_source::{FrameSource, OutputConfig};
use facewatch_core::BoxError;

const OUTPUT: OutputConfig = OutputConfig {
    width: 640,
    height: 480,
    channels: 3,
};

#[derive(Clone, Debug, PartialEq)]
enum Event {
    Acquire(usize),
    EstimateStart,
    EstimateEnd,
    Resize(FrameSize),
    Clear,
    Stroke(f64, f64, f64, f64),
}

type Events = Arc<Mutex<Vec<Event>>>;

// ── collaborators ───────────────────────────────────────────────────

struct CameraStub {
    events: Events,
    deny: bool,
    next_index: usize,
    fail_from: usize,
}

#[async_trait]
impl FrameSource for CameraStub {
    async fn request_permission(&mut self) -> Result<(), BoxError> {
        if self.deny {
            Err("camera access denied by user".into())
        } else {
            Ok(())
        }
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, BoxError> {
        let index = self.next_index;
        self.next_index += 1;
        if index >= self.fail_from {
            return Err("camera unplugged".into());
        }
        self.events.lock().unwrap().push(Event::Acquire(index));
        Ok(Some(Frame::new(
            vec![0u8; OUTPUT.frame_len()],
            OUTPUT.width,
            OUTPUT.height,
            OUTPUT.channels,
            index,
        )))
    }
}

struct RuntimeStub;

#[async_trait]
impl ComputeBackend for RuntimeStub {
    async fn initialize(&mut self) -> Result<String, BoxError> {
        Ok("stub runtime".into())
    }
}

#[derive(Clone)]
enum Reply {
    Boxes(Vec<Detection>),
    Fail,
}

struct ScriptedModel {
    events: Events,
    replies: Vec<Reply>,
    calls: Arc<Mutex<usize>>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

#[async_trait]
impl FaceModel for ScriptedModel {
    async fn estimate(
        &mut self,
        _frame: &Frame,
        _flags: EstimateFlags,
    ) -> Result<Vec<Detection>, BoxError> {
        self.events.lock().unwrap().push(Event::EstimateStart);
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls - 1
        };
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.events.lock().unwrap().push(Event::EstimateEnd);

        match self.replies[call % self.replies.len()].clone() {
            Reply::Boxes(boxes) => Ok(boxes),
            Reply::Fail => Err("inference kernel crashed".into()),
        }
    }
}

struct LoaderStub {
    model: Option<ScriptedModel>,
    loads: Arc<Mutex<usize>>,
}

#[async_trait]
impl ModelLoader for LoaderStub {
    async fn load(&mut self) -> Result<Box<dyn FaceModel>, BoxError> {
        *self.loads.lock().unwrap() += 1;
        let model = self.model.take().ok_or("model already loaded")?;
        Ok(Box::new(model))
    }
}

struct RecordingSurface {
    size: FrameSize,
    events: Events,
}

impl DrawingSurface for RecordingSurface {
    fn size(&self) -> FrameSize {
        self.size
    }

    fn set_size(&mut self, size: FrameSize) {
        self.size = size;
        self.events.lock().unwrap().push(Event::Resize(size));
    }

    fn clear_rect(&mut self, _x: f64, _y: f64, _w: f64, _h: f64) {
        self.events.lock().unwrap().push(Event::Clear);
    }

    fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64, _style: &StrokeStyle) {
        self.events.lock().unwrap().push(Event::Stroke(x, y, w, h));
    }
}

// ── harness ─────────────────────────────────────────────────────────

struct Rig {
    controller: PipelineController,
    events: Events,
    model_calls: Arc<Mutex<usize>>,
    loads: Arc<Mutex<usize>>,
}

struct RigOptions {
    replies: Vec<Reply>,
    deny: bool,
    threshold: u32,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    camera_fails_from: usize,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            replies: vec![Reply::Boxes(vec![])],
            deny: false,
            threshold: 5,
            gate: None,
            camera_fails_from: usize::MAX,
        }
    }
}

fn rig(options: RigOptions) -> Rig {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let model_calls = Arc::new(Mutex::new(0));
    let loads = Arc::new(Mutex::new(0));

    let config = PipelineConfig {
        output: OUTPUT,
        min_cycle_delay: Duration::from_millis(2),
        max_consecutive_failures: options.threshold,
        ..Default::default()
    };
    let collaborators = Collaborators {
        source: Box::new(CameraStub {
            events: events.clone(),
            deny: options.deny,
            next_index: 0,
            fail_from: options.camera_fails_from,
        }),
        backend: Box::new(RuntimeStub),
        loader: Box::new(LoaderStub {
            model: Some(ScriptedModel {
                events: events.clone(),
                replies: options.replies,
                calls: model_calls.clone(),
                gate: options.gate,
            }),
            loads: loads.clone(),
        }),
    };
    let controller = PipelineController::new(config, collaborators)
        .unwrap()
        .with_refresh(Box::new(ImmediateRefresh));
    controller.mount_surface(Box::new(RecordingSurface {
        size: FrameSize::new(300, 150),
        events: events.clone(),
    }));

    Rig {
        controller,
        events,
        model_calls,
        loads,
    }
}

fn face() -> Detection {
    Detection::from_corners(10.0, 10.0, 50.0, 60.0)
}

fn surface_events(events: &Events) -> Vec<Event> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, Event::Resize(_) | Event::Clear | Event::Stroke(..)))
        .cloned()
        .collect()
}

// ── rendering ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_detection_is_drawn_after_resize_to_output() {
    let mut rig = rig(RigOptions {
        replies: vec![Reply::Boxes(vec![face()])],
        ..Default::default()
    });
    rig.controller.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_millis(3)).await;
    rig.controller.stop();
    rig.controller.join().await.unwrap();

    let drawn = surface_events(&rig.events);
    assert_eq!(
        &drawn[..3],
        &[
            Event::Resize(FrameSize::new(640, 480)),
            Event::Clear,
            Event::Stroke(10.0, 10.0, 40.0, 50.0),
        ]
    );
    // Later cycles reuse the size and redraw the same single box.
    let resizes = drawn.iter().filter(|e| matches!(e, Event::Resize(_))).count();
    assert_eq!(resizes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_result_only_clears() {
    let mut rig = rig(RigOptions::default());
    rig.controller.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    rig.controller.stop();
    rig.controller.join().await.unwrap();

    let drawn = surface_events(&rig.events);
    assert!(drawn.contains(&Event::Clear));
    assert!(!drawn.iter().any(|e| matches!(e, Event::Stroke(..))));
}

// ── pacing ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cycles_do_not_overlap() {
    let mut rig = rig(RigOptions {
        replies: vec![Reply::Boxes(vec![face()]), Reply::Fail, Reply::Boxes(vec![])],
        threshold: 10,
        ..Default::default()
    });
    rig.controller.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    rig.controller.stop();
    rig.controller.join().await.unwrap();

    // Every acquire is followed by exactly one estimate start/end pair
    // before the next acquire.
    let events = rig.events.lock().unwrap().clone();
    let mut acquired = false;
    let mut estimating = false;
    for event in &events {
        match event {
            Event::Acquire(_) => {
                assert!(!estimating, "acquire during estimate");
                acquired = true;
            }
            Event::EstimateStart => {
                assert!(acquired && !estimating, "estimate without acquire");
                acquired = false;
                estimating = true;
            }
            Event::EstimateEnd => {
                assert!(estimating);
                estimating = false;
            }
            _ => assert!(!estimating, "surface touched during estimate"),
        }
    }
    let acquires = events.iter().filter(|e| matches!(e, Event::Acquire(_))).count();
    assert!(acquires >= 5, "only {acquires} cycles");
}

#[tokio::test(start_paused = true)]
async fn test_every_buffer_is_released_including_failed_cycles() {
    let mut rig = rig(RigOptions {
        replies: vec![Reply::Fail, Reply::Boxes(vec![face()])],
        threshold: 2,
        ..Default::default()
    });
    rig.controller.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(rig.controller.state(), PipelineState::Running);
    rig.controller.stop();
    rig.controller.join().await.unwrap();

    let stats = rig.controller.buffer_stats();
    assert!(stats.acquired > 2);
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(stats.live, 0);
}

// ── stop ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_stop_during_estimate_prevents_render() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut rig = rig(RigOptions {
        replies: vec![Reply::Boxes(vec![face()])],
        gate: Some((entered.clone(), release.clone())),
        ..Default::default()
    });
    rig.controller.initialize().await.unwrap();

    entered.notified().await;
    rig.controller.stop();
    release.notify_one();
    let cycles = rig.controller.join().await.unwrap();

    assert_eq!(cycles, 1);
    assert!(surface_events(&rig.events).is_empty());
    assert_eq!(*rig.model_calls.lock().unwrap(), 1);
    assert_eq!(rig.controller.buffer_stats().live, 0);
}

// ── failures ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_threshold_failures_move_to_error_and_halt() {
    let mut rig = rig(RigOptions {
        replies: vec![Reply::Fail],
        threshold: 3,
        ..Default::default()
    });
    rig.controller.initialize().await.unwrap();

    let cycles = rig.controller.join().await.unwrap();
    assert_eq!(cycles, 3);
    assert!(matches!(rig.controller.state(), PipelineState::Error(_)));
    assert!(rig
        .controller
        .last_error()
        .unwrap()
        .contains("inference kernel crashed"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*rig.model_calls.lock().unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_halt_on_capture_failures_clears_overlay() {
    let mut rig = rig(RigOptions {
        replies: vec![Reply::Boxes(vec![face()])],
        threshold: 2,
        camera_fails_from: 2,
        ..Default::default()
    });
    rig.controller.initialize().await.unwrap();
    rig.controller.join().await.unwrap();

    assert!(rig
        .controller
        .last_error()
        .unwrap()
        .contains("camera unplugged"));
    let drawn = surface_events(&rig.events);
    assert!(drawn.iter().any(|e| matches!(e, Event::Stroke(..))));
    assert_eq!(drawn.last(), Some(&Event::Clear));
}

#[tokio::test]
async fn test_permission_denied_never_runs() {
    let mut rig = rig(RigOptions {
        deny: true,
        ..Default::default()
    });
    let status = rig.controller.status();

    let err = rig.controller.initialize().await.unwrap_err();
    assert!(matches!(err, InitError::PermissionDenied(_)));
    assert!(err.to_string().contains("camera access denied by user"));
    assert!(!status.is_running());
    assert_eq!(*rig.loads.lock().unwrap(), 0);
    assert!(rig.controller.join().await.is_none());
    assert!(rig.events.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dispose_after_error_is_terminal() {
    let mut rig = rig(RigOptions {
        replies: vec![Reply::Fail],
        threshold: 1,
        ..Default::default()
    });
    rig.controller.initialize().await.unwrap();
    rig.controller.join().await.unwrap();
    rig.controller.dispose().await;

    assert_eq!(rig.controller.state(), PipelineState::Disposed);
    assert!(rig.controller.last_error().is_some());
}
