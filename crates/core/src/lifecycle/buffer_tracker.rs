//! Ownership ledger for per-cycle frame buffers.
//!
//! Every captured frame enters the loop through [`BufferTracker::acquire`]
//! and leaves it exactly once: explicitly via [`BufferTracker::release`], on
//! `Drop` of the [`FrameBuffer`], or by the enclosing [`CycleScope`] which
//! force-releases anything still live when the cycle ends.

use std::collections::HashSet;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("frame buffer {id} was released more than once")]
    DoubleRelease { id: u64 },
    #[error("{count} frame buffer(s) outlived their cycle and were force-released")]
    LeakDetected { count: usize },
}

/// Snapshot of the ledger counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub acquired: u64,
    pub released: u64,
    pub live: usize,
}

#[derive(Default)]
struct Ledger {
    next_id: u64,
    live: HashSet<u64>,
    acquired: u64,
    released: u64,
    /// Buffer ids acquired while each scope was the innermost open one.
    scopes: Vec<Vec<u64>>,
}

impl Ledger {
    fn release(&mut self, id: u64) -> Result<(), LifecycleError> {
        if self.live.remove(&id) {
            self.released += 1;
            Ok(())
        } else {
            Err(LifecycleError::DoubleRelease { id })
        }
    }
}

/// Shared handle to the buffer ledger. Cloning is cheap.
#[derive(Clone, Default)]
pub struct BufferTracker {
    ledger: Arc<Mutex<Ledger>>,
}

impl BufferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a captured frame and hands back its tracked buffer.
    pub fn acquire(&self, frame: Frame) -> FrameBuffer {
        let mut ledger = self.ledger();
        let id = ledger.next_id;
        ledger.next_id += 1;
        ledger.live.insert(id);
        ledger.acquired += 1;
        if let Some(scope) = ledger.scopes.last_mut() {
            scope.push(id);
        }
        drop(ledger);

        FrameBuffer {
            id,
            frame,
            tracker: self.clone(),
            released: false,
        }
    }

    pub fn release(&self, mut buffer: FrameBuffer) -> Result<(), LifecycleError> {
        buffer.released = true;
        self.ledger().release(buffer.id)
    }

    /// Opens a scope that owns every buffer acquired until it closes.
    pub fn open_scope(&self) -> CycleScope {
        let mut ledger = self.ledger();
        ledger.scopes.push(Vec::new());
        CycleScope {
            tracker: self.clone(),
            depth: ledger.scopes.len(),
            closed: false,
        }
    }

    /// Runs `fut` inside a fresh scope and closes it on every exit path.
    ///
    /// The future's own output (including its errors) is returned untouched;
    /// the outer `Err` only reports buffers that had to be force-released.
    pub async fn with_scope<F, T>(&self, fut: F) -> Result<T, LifecycleError>
    where
        F: Future<Output = T>,
    {
        let scope = self.open_scope();
        let output = fut.await;
        scope.close()?;
        Ok(output)
    }

    pub fn stats(&self) -> BufferStats {
        let ledger = self.ledger();
        BufferStats {
            acquired: ledger.acquired,
            released: ledger.released,
            live: ledger.live.len(),
        }
    }

    /// Pops the scope at `depth` (and any left open inside it), releasing
    /// whatever it still owns. Returns the number of buffers force-released.
    fn close_scope(&self, depth: usize) -> usize {
        let mut ledger = self.ledger();
        if depth == 0 || ledger.scopes.len() < depth {
            return 0;
        }
        let owned: Vec<u64> = ledger.scopes.drain(depth - 1..).flatten().collect();
        owned
            .into_iter()
            .filter(|id| ledger.release(*id).is_ok())
            .count()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One captured frame owned by the cycle that acquired it.
pub struct FrameBuffer {
    id: u64,
    frame: Frame,
    tracker: BufferTracker,
    released: bool,
}

impl FrameBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl Deref for FrameBuffer {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("size", &self.frame.size())
            .field("channels", &self.frame.channels())
            .finish()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.tracker.ledger().release(self.id) {
            log::warn!("Dropping frame buffer after its scope ended: {e}");
        }
    }
}

/// Guard returned by [`BufferTracker::open_scope`].
///
/// Prefer [`CycleScope::close`], which reports leaks; dropping an unclosed
/// scope still releases everything but can only log.
pub struct CycleScope {
    tracker: BufferTracker,
    depth: usize,
    closed: bool,
}

impl CycleScope {
    pub fn close(mut self) -> Result<(), LifecycleError> {
        self.closed = true;
        match self.tracker.close_scope(self.depth) {
            0 => Ok(()),
            count => Err(LifecycleError::LeakDetected { count }),
        }
    }
}

impl Drop for CycleScope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let count = self.tracker.close_scope(self.depth);
        if count > 0 {
            log::warn!("Cycle scope abandoned; force-released {count} frame buffer(s)");
        }
    }
}
