use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crate::foundation::core::{LinearRgba, RowRange};
use crate::foundation::error::{VireoError, VireoResult};
use crate::frame::buffer::FrameBuffer;
use crate::render::sampler::Sampler;

/// Lifecycle states of one render-pass worker.
///
/// `Completed`, `Cancelled` and `Failed` are final: a worker is never reused
/// across passes. A new pass spawns a new worker bound to a new frame
/// buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned but not yet sampling.
    Idle,
    /// Producing rows.
    Running,
    /// Every row was written and all channels are closed.
    Completed,
    /// Cancellation was observed between rows; the partial image is retained.
    Cancelled,
    /// The sampler or a channel write failed; the error is surfaced on join.
    Failed,
}

impl WorkerState {
    /// Return `true` for the three final states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Cancelled => 3,
            Self::Failed => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

struct WorkerShared {
    state: AtomicU8,
    rows_done: AtomicU32,
    cancel: AtomicBool,
    failure: Mutex<Option<VireoError>>,
}

impl WorkerShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Idle.as_u8()),
            rows_done: AtomicU32::new(0),
            cancel: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn record_failure(&self, err: VireoError) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_failure(&self) -> Option<VireoError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Owning handle to one background render worker.
///
/// The handle is held by the session for the duration of the pass; dropping
/// it without [`WorkerHandle::join`] detaches the thread, so the session
/// always cancels and joins before letting go (including on drop).
pub struct WorkerHandle {
    shared: Arc<WorkerShared>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a worker executing one pass over `frame` with `sampler`.
    pub(crate) fn spawn(
        frame: Arc<FrameBuffer>,
        sampler: Arc<dyn Sampler>,
        thread_name: &str,
    ) -> VireoResult<Self> {
        let shared = Arc::new(WorkerShared::new());
        let worker_shared = Arc::clone(&shared);
        let join = std::thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || run_pass(&frame, sampler.as_ref(), &worker_shared))
            .map_err(|e| anyhow::anyhow!("spawn render worker thread: {e}"))?;
        Ok(Self {
            shared,
            join: Some(join),
        })
    }

    /// Request cooperative cancellation. Idempotent; observed between rows.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
    }

    /// Return `true` once cancellation has been requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel.load(Ordering::Acquire)
    }

    /// Current worker state.
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Rows fully written and published so far.
    pub fn rows_done(&self) -> u32 {
        self.shared.rows_done.load(Ordering::Acquire)
    }

    /// Block until the worker thread has terminated.
    ///
    /// A pass that `Failed` returns its recorded error here; a worker panic
    /// is recorded as a failure rather than swallowed. `Completed` and
    /// `Cancelled` passes return `Ok(())`.
    pub fn join(&mut self) -> VireoResult<()> {
        if let Some(handle) = self.join.take()
            && handle.join().is_err()
        {
            self.shared.set_state(WorkerState::Failed);
            self.shared
                .record_failure(anyhow::anyhow!("render worker panicked").into());
        }
        if self.shared.state() == WorkerState::Failed {
            return Err(self
                .shared
                .take_failure()
                .unwrap_or_else(|| anyhow::anyhow!("render pass failed").into()));
        }
        Ok(())
    }
}

/// One full pass: sample row-major, write whole rows, publish, check cancel.
///
/// The row is assembled in local buffers and written in one call per channel,
/// so cancellation or failure can never leave a partially-written row behind.
/// All exit paths close every channel first, so the display side never waits
/// on a pass that will not finish.
fn run_pass(frame: &FrameBuffer, sampler: &dyn Sampler, shared: &WorkerShared) {
    shared.set_state(WorkerState::Running);
    let resolution = frame.resolution();
    let width = resolution.width as usize;
    let mut color_row = vec![LinearRgba::TRANSPARENT; width];
    let mut depth_row = vec![0.0f32; width];

    for y in 0..resolution.height {
        for x in 0..resolution.width {
            match sampler.sample(x, y) {
                Ok(s) => {
                    color_row[x as usize] = s.color;
                    depth_row[x as usize] = s.depth;
                }
                Err(e) => {
                    let err = match e {
                        VireoError::Sampler(_) => e,
                        other => VireoError::sampler(other.to_string()),
                    };
                    fail(frame, shared, err);
                    return;
                }
            }
        }

        if let Err(e) = publish_row(frame, y, &color_row, &depth_row) {
            fail(frame, shared, e);
            return;
        }
        shared.rows_done.store(y.saturating_add(1), Ordering::Release);

        // Per-row cancellation: worst-case stop latency is one row's sampling
        // cost, and a cancelled pass keeps whatever rows it finished.
        if shared.cancel.load(Ordering::Acquire) {
            frame.close_all();
            shared.set_state(WorkerState::Cancelled);
            let rows_done = shared.rows_done.load(Ordering::Acquire);
            tracing::debug!(rows_done, "render pass cancelled");
            return;
        }
    }

    frame.close_all();
    shared.set_state(WorkerState::Completed);
}

fn publish_row(
    frame: &FrameBuffer,
    row: u32,
    color_row: &[LinearRgba],
    depth_row: &[f32],
) -> VireoResult<()> {
    frame.color().write_row(row, color_row)?;
    frame.depth().write_row(row, depth_row)?;
    frame.mark_rows_ready(RowRange::single(row))
}

fn fail(frame: &FrameBuffer, shared: &WorkerShared, err: VireoError) {
    frame.close_all();
    shared.record_failure(err);
    shared.set_state(WorkerState::Failed);
}
