use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};

use crate::shared::frame::Frame;
use crate::video::domain::frame_source::{CaptureConfig, FrameSource, OutputConfig};
use crate::BoxError;

/// Frames buffered between the capture thread and the loop. Kept at one so
/// a slow loop sees a recent frame instead of a backlog.
const FRAME_CHANNEL_CAPACITY: usize = 1;

/// How often a capture thread blocked on a full slot rechecks the stop flag.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Where and how to open the camera.
#[derive(Clone, Debug)]
pub struct FfmpegCameraOptions {
    /// Device path, device index string, file, or stream URL.
    pub input: String,
    /// libavdevice demuxer such as `v4l2`, `avfoundation` or `dshow`.
    /// `None` lets ffmpeg probe the input (files and URLs).
    pub input_format: Option<String>,
    pub capture: CaptureConfig,
    pub output: OutputConfig,
}

enum CaptureEvent {
    Frame(Frame),
    EndOfStream,
    Failed(String),
}

/// Camera source backed by ffmpeg-next (libavdevice + libavcodec).
///
/// Decoding runs on a dedicated capture thread which scales every frame to
/// the output size and RGB24/RGBA, then hands it over a bounded channel.
/// When the input ends the thread reopens it, so files loop like a camera.
pub struct FfmpegCameraSource {
    options: FfmpegCameraOptions,
    frame_rx: Option<Receiver<CaptureEvent>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FfmpegCameraSource {
    pub fn new(options: FfmpegCameraOptions) -> Self {
        Self {
            options,
            frame_rx: None,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // A capture thread waiting on a full slot sees the flag within STOP_POLL.
        self.frame_rx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Capture thread panicked");
            }
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegCameraSource {
    async fn request_permission(&mut self) -> Result<(), BoxError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let (frame_tx, frame_rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        self.stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_capture(
            self.options.clone(),
            frame_tx,
            frame_rx.clone(),
            ready_tx,
            self.stop.clone(),
        );

        let opened = tokio::task::spawn_blocking(move || ready_rx.recv()).await?;
        match opened {
            Ok(Ok(())) => {
                log::info!("Opened camera {}", self.options.input);
                self.frame_rx = Some(frame_rx);
                self.handle = Some(handle);
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(format!("cannot open {}: {reason}", self.options.input).into())
            }
            Err(_) => {
                let _ = handle.join();
                Err("capture thread exited before opening the camera".into())
            }
        }
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, BoxError> {
        let rx = self
            .frame_rx
            .clone()
            .ok_or("camera not opened; request permission first")?;

        let event = tokio::task::spawn_blocking(move || rx.recv()).await?;
        match event {
            Ok(CaptureEvent::Frame(frame)) => Ok(Some(frame)),
            Ok(CaptureEvent::EndOfStream) => Ok(None),
            Ok(CaptureEvent::Failed(reason)) => Err(reason.into()),
            Err(_) => Err("capture thread stopped".into()),
        }
    }

    fn close(&mut self) {
        self.shutdown();
    }
}

impl Drop for FfmpegCameraSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_capture(
    options: FfmpegCameraOptions,
    frame_tx: Sender<CaptureEvent>,
    stale_rx: Receiver<CaptureEvent>,
    ready_tx: Sender<Result<(), String>>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut session = match CaptureSession::open(&options) {
            Ok(session) => {
                let _ = ready_tx.send(Ok(()));
                session
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
        };
        drop(ready_tx);

        let mut frame_index = 0usize;
        while !stop.load(Ordering::Relaxed) {
            let (event, fatal) = match session.next_frame(frame_index) {
                Ok(Some(frame)) => {
                    frame_index += 1;
                    (CaptureEvent::Frame(frame), false)
                }
                Ok(None) => match CaptureSession::open(&options) {
                    Ok(reopened) => {
                        log::debug!("Input ended; reopened {}", options.input);
                        session = reopened;
                        (CaptureEvent::EndOfStream, false)
                    }
                    Err(e) => (CaptureEvent::Failed(format!("reopen failed: {e}")), true),
                },
                Err(e) => (CaptureEvent::Failed(e.to_string()), false),
            };

            if !publish_latest(&frame_tx, &stale_rx, event, &stop) || fatal {
                break;
            }
        }
    })
}

/// Hands `event` to the loop without letting frames queue up.
///
/// A frame still waiting in the slot is replaced by the newer event.
/// End-of-stream and failure events are never dropped: when one holds the
/// slot, the thread waits for the loop to take it. Returns `false` once the
/// source is stopping.
fn publish_latest(
    tx: &Sender<CaptureEvent>,
    stale: &Receiver<CaptureEvent>,
    event: CaptureEvent,
    stop: &AtomicBool,
) -> bool {
    let mut event = event;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        match tx.try_send(event) {
            Ok(()) => return true,
            Err(TrySendError::Disconnected(_)) => return false,
            Err(TrySendError::Full(back)) => {
                event = back;
                match stale.try_recv() {
                    // Stale frame dropped, or the loop took the slot first.
                    Ok(CaptureEvent::Frame(_)) | Err(_) => {}
                    Ok(control) => {
                        return send_until_stopped(tx, control, stop)
                            && send_until_stopped(tx, event, stop);
                    }
                }
            }
        }
    }
}

fn send_until_stopped(tx: &Sender<CaptureEvent>, event: CaptureEvent, stop: &AtomicBool) -> bool {
    let mut event = event;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        match tx.send_timeout(event, STOP_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => event = back,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// One open input: demuxer, decoder and scaler to the output format.
struct CaptureSession {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    video_stream_index: usize,
    output: OutputConfig,
    flushing: bool,
}

impl CaptureSession {
    fn open(options: &FfmpegCameraOptions) -> Result<Self, BoxError> {
        ffmpeg_next::init()?;
        ffmpeg_next::device::register_all();

        let path = Path::new(&options.input);
        let ictx = match options.input_format.as_deref() {
            Some(name) => {
                let format = ffmpeg_next::device::input::video()
                    .find(|f| f.name() == name)
                    .ok_or_else(|| format!("unknown input format: {name}"))?;
                let mut dict = ffmpeg_next::Dictionary::new();
                dict.set("video_size", &options.capture.size().to_string());
                ffmpeg_next::format::open_with(path, &ffmpeg_next::format::Format::Input(format), dict)?
                    .input()
            }
            None => ffmpeg_next::format::input(path)?,
        };

        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;
        let video_stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let pixel = match options.output.channels {
            4 => ffmpeg_next::format::Pixel::RGBA,
            _ => ffmpeg_next::format::Pixel::RGB24,
        };
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            pixel,
            options.output.width,
            options.output.height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        log::debug!(
            "Capture {}x{} {:?} -> {} x{}",
            decoder.width(),
            decoder.height(),
            decoder.format(),
            options.output.size(),
            options.output.channels
        );

        Ok(Self {
            ictx,
            decoder,
            scaler,
            video_stream_index,
            output: options.output,
            flushing: false,
        })
    }

    /// Decodes the next frame, or `None` once the input is exhausted.
    fn next_frame(&mut self, index: usize) -> Result<Option<Frame>, BoxError> {
        if let Some(frame) = self.try_receive(index)? {
            return Ok(Some(frame));
        }
        if self.flushing {
            return Ok(None);
        }

        loop {
            let Some((stream, packet)) = self.ictx.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                return self.try_receive(index);
            };
            if stream.index() != self.video_stream_index {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            if let Some(frame) = self.try_receive(index)? {
                return Ok(Some(frame));
            }
        }
    }

    fn try_receive(&mut self, index: usize) -> Result<Option<Frame>, BoxError> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut scaled = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler.run(&decoded, &mut scaled)?;

        let pixels = extract_pixels(&scaled, self.output);
        Ok(Some(Frame::new(
            pixels,
            self.output.width,
            self.output.height,
            self.output.channels,
            index,
        )))
    }
}

/// Copies a scaled frame into a tightly-packed buffer, dropping row padding.
fn extract_pixels(scaled: &ffmpeg_next::util::frame::video::Video, output: OutputConfig) -> Vec<u8> {
    let stride = scaled.stride(0);
    let data = scaled.data(0);
    let row_len = output.width as usize * output.channels as usize;

    let mut pixels = Vec::with_capacity(output.frame_len());
    for row in 0..output.height as usize {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + row_len]);
    }
    pixels
}
