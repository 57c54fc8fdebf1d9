//! Single-flight, self-rescheduling loop.
//!
//! One cycle runs at a time on a spawned task. The next cycle starts only
//! after the current one has finished, the minimum delay since its start
//! has elapsed, and the refresh signal has fired.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::{CycleError, SchedulerError};
use super::pipeline_logger::PipelineLogger;
use super::pipeline_state::{PipelineState, PipelineStatus};
use super::refresh_signal::RefreshSignal;

/// What the loop hands each cycle.
pub struct CycleContext<'a> {
    running: &'a AtomicBool,
    index: u64,
    logger: &'a mut dyn PipelineLogger,
}

impl<'a> CycleContext<'a> {
    pub(crate) fn new(running: &'a AtomicBool, index: u64, logger: &'a mut dyn PipelineLogger) -> Self {
        Self {
            running,
            index,
            logger,
        }
    }

    /// False once `stop()` was called or the loop is halting. Checked right
    /// before drawing so a late result is discarded.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Zero-based number of this cycle within the loop.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timing(&mut self, stage: &str, since: Instant) {
        self.logger
            .timing(stage, since.elapsed().as_secs_f64() * 1000.0);
    }

    pub fn metric(&mut self, name: &str, value: f64) {
        self.logger.metric(name, value);
    }
}

/// One unit of loop work: acquire, infer, render.
#[async_trait]
pub trait Cycle: Send {
    async fn run(&mut self, ctx: &mut CycleContext<'_>) -> Result<(), CycleError>;

    /// Called once when the loop halts into `Error`, before the task exits.
    fn halted(&mut self) {}

    /// Releases whatever the cycle owns. Called once, after the loop exited.
    fn dispose(&mut self) {}
}

/// Identifies one started loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoopHandle {
    id: u64,
}

impl LoopHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub min_cycle_delay: Duration,
    pub max_consecutive_failures: u32,
}

/// Everything moved into the loop task, handed back by [`PacingScheduler::join`].
pub struct LoopParts {
    pub cycle: Box<dyn Cycle>,
    pub refresh: Box<dyn RefreshSignal>,
    pub logger: Box<dyn PipelineLogger>,
    /// Cycles that ran (successful or not).
    pub cycles: u64,
}

pub struct PacingScheduler {
    options: SchedulerOptions,
    status: PipelineStatus,
    running: Arc<AtomicBool>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<LoopParts>>,
    handle: Option<LoopHandle>,
    next_id: u64,
}

impl PacingScheduler {
    pub fn new(options: SchedulerOptions, status: PipelineStatus) -> Self {
        Self {
            options,
            status,
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            task: None,
            handle: None,
            next_id: 1,
        }
    }

    /// Spawns the loop on the current tokio runtime and moves the status to
    /// `Running`.
    pub fn start(
        &mut self,
        cycle: Box<dyn Cycle>,
        refresh: Box<dyn RefreshSignal>,
        logger: Box<dyn PipelineLogger>,
    ) -> Result<LoopHandle, SchedulerError> {
        if self.is_live() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let handle = LoopHandle { id: self.next_id };
        self.next_id += 1;

        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = watch::channel(false);
        let parts = LoopParts {
            cycle,
            refresh,
            logger,
            cycles: 0,
        };

        self.status.transition(PipelineState::Running);
        log::info!("Starting loop {}", handle.id);
        self.task = Some(tokio::spawn(run_loop(
            parts,
            running.clone(),
            stop_rx,
            self.status.clone(),
            self.options,
        )));
        self.running = running;
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        Ok(handle)
    }

    /// Cancels the pending continuation. An in-flight cycle may finish but
    /// will not draw. Safe to call any number of times.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
            if let Some(handle) = self.handle {
                log::info!("Stopping loop {}", handle.id);
            }
            self.status.leave_running(PipelineState::Ready);
        }
        self.handle = None;
    }

    /// Waits for the loop task to exit and reclaims what it owned.
    ///
    /// Returns `None` when no loop was started or the task panicked.
    /// Cancel-safe: dropping the future leaves the task joinable.
    pub async fn join(&mut self) -> Option<LoopParts> {
        let result = self.task.as_mut()?.await;
        self.task = None;
        self.handle = None;
        match result {
            Ok(parts) => Some(parts),
            Err(e) => {
                log::error!("Loop task ended abnormally: {e}");
                self.status.fail(format!("loop task ended abnormally: {e}"));
                None
            }
        }
    }

    /// The live loop's handle, if any.
    pub fn current(&self) -> Option<LoopHandle> {
        if self.is_live() {
            self.handle
        } else {
            None
        }
    }

    pub fn is_live(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PacingScheduler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
    }
}

async fn run_loop(
    mut parts: LoopParts,
    running: Arc<AtomicBool>,
    mut stop_rx: watch::Receiver<bool>,
    status: PipelineStatus,
    options: SchedulerOptions,
) -> LoopParts {
    let mut failures = 0u32;

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        let result = {
            let mut ctx = CycleContext::new(&running, parts.cycles, parts.logger.as_mut());
            let result = parts.cycle.run(&mut ctx).await;
            ctx.timing("cycle", started);
            result
        };
        parts.cycles += 1;
        parts.logger.progress(parts.cycles as usize, 0);

        match result {
            Ok(()) => failures = 0,
            Err(e) if e.is_fatal() => {
                running.store(false, Ordering::SeqCst);
                status.fail(format!("cycle {} aborted: {e}", parts.cycles));
                parts.cycle.halted();
                break;
            }
            Err(e) => {
                failures += 1;
                log::warn!(
                    "Cycle {} failed ({failures}/{}): {e}",
                    parts.cycles,
                    options.max_consecutive_failures
                );
                if failures >= options.max_consecutive_failures {
                    running.store(false, Ordering::SeqCst);
                    status.fail(format!("{failures} consecutive cycle failures; last: {e}"));
                    parts.cycle.halted();
                    break;
                }
            }
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }

        let refresh = &mut parts.refresh;
        let pace = async {
            tokio::time::sleep_until(started + options.min_cycle_delay).await;
            refresh.next_refresh().await;
        };
        tokio::select! {
            _ = pace => {}
            _ = stop_rx.changed() => break,
        }
    }

    log::info!("Loop exited after {} cycles", parts.cycles);
    parts.logger.summary();
    parts
}
