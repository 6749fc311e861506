use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use crate::foundation::core::{LinearRgba, PassId, PassProgress, Resolution};
use crate::foundation::error::{VireoError, VireoResult};
use crate::frame::buffer::FrameBuffer;
use crate::render::sampler::Sampler;
use crate::render::worker::{WorkerHandle, WorkerState};
use crate::session::display::{DisplayPipelineAdapter, FrameSlot, new_frame_slot};

/// Session lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No pass active; the frame slot is empty.
    Stopped,
    /// A pass is being set up (frame buffer created, worker spawning).
    Starting,
    /// A worker owns the pass. It may already have reached a terminal state;
    /// the session stays `Running` until [`RenderSession::stop`].
    Running,
    /// Cancelling, joining, and releasing the frame buffer.
    Stopping,
}

/// Options controlling session behavior.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct SessionOpts {
    /// If set, the color channel is prefilled with this color before the
    /// worker starts, so early composite cycles show a defined background.
    pub clear_color: Option<LinearRgba>,
    /// Render worker thread name. `None` uses `"vireo-render-worker"`.
    pub thread_name: Option<String>,
}

/// Host display-mode lifecycle boundary.
///
/// `StartRenderer`/`OnRenderSizeChanged`/`ShutdownRenderer` on the host side
/// map one-to-one onto `start`/`resize`/`stop`. Implemented by
/// [`RenderSession`]; adapter code at the host boundary should depend on this
/// trait rather than the concrete session.
pub trait SessionLifecycle {
    /// Begin a new pass at `resolution`.
    fn start(&mut self, resolution: Resolution) -> VireoResult<PassId>;
    /// Stop the current pass, then begin a new one at `resolution`.
    fn resize(&mut self, resolution: Resolution) -> VireoResult<PassId>;
    /// Cancel, join, and release the current pass.
    fn stop(&mut self) -> VireoResult<()>;
    /// `true` while a worker is live (not yet in a terminal state).
    fn is_running(&self) -> bool;
    /// `true` only after a clean `Completed` transition.
    fn is_completed(&self) -> bool;
}

/// Lifecycle controller for one viewport's render passes.
///
/// The central guarantee is **at most one running worker per session**: every
/// path that starts a new pass first cancels and joins the previous worker,
/// and [`RenderSession::stop`] does not return until the worker thread has
/// terminated and the frame buffer has been released. Dropping the session
/// upholds the same join-before-destroy discipline.
///
/// The sampler is injected at construction; there is no process-wide engine
/// registry. One session serves one viewport.
pub struct RenderSession {
    sampler: Arc<dyn Sampler>,
    opts: SessionOpts,
    slot: Arc<FrameSlot>,
    worker: Option<WorkerHandle>,
    state: SessionState,
    last_worker_state: WorkerState,
    last_rows_done: u32,
    passes: u64,
    resolution: Option<Resolution>,
    keep_alive: AtomicBool,
}

impl RenderSession {
    /// Create a stopped session around the injected `sampler`.
    pub fn new(sampler: Arc<dyn Sampler>, opts: SessionOpts) -> Self {
        Self {
            sampler,
            opts,
            slot: new_frame_slot(),
            worker: None,
            state: SessionState::Stopped,
            last_worker_state: WorkerState::Idle,
            last_rows_done: 0,
            passes: 0,
            resolution: None,
            keep_alive: AtomicBool::new(true),
        }
    }

    /// Consumer-side view for the host compositor. Cloneable; stays valid
    /// across passes (it observes whichever frame buffer is current).
    pub fn display_adapter(&self) -> DisplayPipelineAdapter {
        DisplayPipelineAdapter::new(Arc::clone(&self.slot))
    }

    /// Begin a new pass at `resolution`.
    ///
    /// Valid only from `Stopped`; a session with a live or unreaped pass
    /// reports `InvalidState` until [`RenderSession::stop`] is called.
    #[tracing::instrument(skip(self))]
    pub fn start(&mut self, resolution: Resolution) -> VireoResult<PassId> {
        if self.state != SessionState::Stopped {
            return Err(VireoError::invalid_state(
                "start while a pass is already active",
            ));
        }
        self.state = SessionState::Starting;
        match self.start_inner(resolution) {
            Ok(id) => {
                self.state = SessionState::Running;
                Ok(id)
            }
            Err(e) => {
                // Roll back the published frame so the session is reusable.
                *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
                self.worker = None;
                self.state = SessionState::Stopped;
                Err(e)
            }
        }
    }

    fn start_inner(&mut self, resolution: Resolution) -> VireoResult<PassId> {
        let frame = FrameBuffer::standard(resolution)?;
        if let Some(color) = self.opts.clear_color {
            frame.color().fill(color)?;
        }
        let frame = Arc::new(frame);
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&frame));

        let thread_name = self
            .opts
            .thread_name
            .clone()
            .unwrap_or_else(|| "vireo-render-worker".to_owned());
        let worker = WorkerHandle::spawn(frame, Arc::clone(&self.sampler), &thread_name)?;

        self.worker = Some(worker);
        self.last_worker_state = WorkerState::Idle;
        self.last_rows_done = 0;
        self.resolution = Some(resolution);
        self.passes += 1;
        Ok(PassId(self.passes))
    }

    /// Cancel the current pass, join the worker, and release the frame.
    ///
    /// Blocks until the worker thread has fully terminated (bounded by the
    /// per-row cancellation check) and until every outstanding display read
    /// scope has been released. Idempotent from `Stopped`. A pass that
    /// `Failed` surfaces its recorded error here, after cleanup.
    #[tracing::instrument(skip(self))]
    pub fn stop(&mut self) -> VireoResult<()> {
        if self.state == SessionState::Stopped {
            return Ok(());
        }
        self.state = SessionState::Stopping;

        let join_result = match self.worker.as_mut() {
            Some(worker) => {
                worker.cancel();
                let result = worker.join();
                self.last_worker_state = worker.state();
                self.last_rows_done = worker.rows_done();
                result
            }
            None => Ok(()),
        };
        self.worker = None;

        // Release the frame; blocks while a display read scope is open.
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.state = SessionState::Stopped;
        tracing::debug!(outcome = ?self.last_worker_state, "render pass stopped");
        join_result
    }

    /// Stop the current pass and begin a new one at `new_resolution`.
    ///
    /// Never mutates a frame buffer in place: the old buffer is released
    /// after the worker joins and a brand-new one is created for the new
    /// pass. A failed pass's error is surfaced here before restarting.
    #[tracing::instrument(skip(self))]
    pub fn resize(&mut self, new_resolution: Resolution) -> VireoResult<PassId> {
        self.stop()?;
        self.start(new_resolution)
    }

    /// `true` while the current pass's worker is live (spawned and not yet in
    /// a terminal state).
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.state().is_terminal())
    }

    /// `true` only after the current (or just-stopped) pass ran every row to
    /// the end, not after cancellation or failure.
    pub fn is_completed(&self) -> bool {
        self.worker_state() == WorkerState::Completed
    }

    /// State of the current pass's worker; a stopped session reports the
    /// previous pass's terminal state (`Idle` before any pass).
    pub fn worker_state(&self) -> WorkerState {
        match &self.worker {
            Some(worker) => worker.state(),
            None => self.last_worker_state,
        }
    }

    /// Row-level progress of the current pass; a stopped session keeps
    /// reporting the previous pass's final count.
    pub fn progress(&self) -> PassProgress {
        let rows_total = self.resolution.map(|r| r.height).unwrap_or(0);
        let rows_done = self
            .worker
            .as_ref()
            .map(|w| w.rows_done())
            .unwrap_or(self.last_rows_done);
        PassProgress {
            rows_done,
            rows_total,
        }
    }

    /// Identifier of the newest pass, if any was started.
    pub fn current_pass(&self) -> Option<PassId> {
        (self.passes > 0).then_some(PassId(self.passes))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Set the flag the host's modal loop polls to decide whether to keep
    /// this display mode alive.
    pub fn set_keep_alive(&self, keep_alive: bool) {
        self.keep_alive.store(keep_alive, Ordering::Release);
    }

    /// Flag consumed by the host's modal loop. Defaults to `true`.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive.load(Ordering::Acquire)
    }
}

impl SessionLifecycle for RenderSession {
    fn start(&mut self, resolution: Resolution) -> VireoResult<PassId> {
        RenderSession::start(self, resolution)
    }

    fn resize(&mut self, resolution: Resolution) -> VireoResult<PassId> {
        RenderSession::resize(self, resolution)
    }

    fn stop(&mut self) -> VireoResult<()> {
        RenderSession::stop(self)
    }

    fn is_running(&self) -> bool {
        RenderSession::is_running(self)
    }

    fn is_completed(&self) -> bool {
        RenderSession::is_completed(self)
    }
}

impl Drop for RenderSession {
    // Join-before-destroy must hold on every exit path, not just stop().
    fn drop(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            worker.cancel();
            let _ = worker.join();
        }
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::sampler::{GradientSampler, Sample};
    use std::time::{Duration, Instant};

    fn res(w: u32, h: u32) -> Resolution {
        Resolution::new(w, h).unwrap()
    }

    fn gradient_session(resolution: Resolution) -> RenderSession {
        RenderSession::new(
            Arc::new(GradientSampler::new(resolution)),
            SessionOpts::default(),
        )
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn start_twice_is_invalid_state() {
        let mut sess = gradient_session(res(4, 4));
        sess.start(res(4, 4)).unwrap();
        assert!(matches!(
            sess.start(res(4, 4)),
            Err(VireoError::InvalidState(_))
        ));
        sess.stop().unwrap();
    }

    #[test]
    fn pass_runs_to_completion_and_stop_is_clean() {
        let mut sess = gradient_session(res(4, 3));
        let id = sess.start(res(4, 3)).unwrap();
        assert_eq!(id, PassId(1));

        wait_until(|| sess.is_completed());
        assert!(!sess.is_running());
        assert!(sess.progress().is_finished());

        sess.stop().unwrap();
        assert_eq!(sess.state(), SessionState::Stopped);
        // Completion outcome survives the stop for status queries.
        assert!(sess.is_completed());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut sess = gradient_session(res(2, 2));
        sess.stop().unwrap();
        sess.start(res(2, 2)).unwrap();
        sess.stop().unwrap();
        sess.stop().unwrap();
    }

    #[test]
    fn resize_restarts_with_a_new_pass_id() {
        let mut sess = gradient_session(res(4, 4));
        assert_eq!(sess.start(res(4, 4)).unwrap(), PassId(1));
        assert_eq!(sess.resize(res(8, 8)).unwrap(), PassId(2));
        assert_eq!(sess.progress().rows_total, 8);
        sess.stop().unwrap();
    }

    #[test]
    fn failed_pass_surfaces_its_error_on_stop() {
        let failing =
            |_x: u32, _y: u32| -> VireoResult<Sample> { Err(VireoError::sampler("boom")) };
        let mut sess = RenderSession::new(Arc::new(failing), SessionOpts::default());
        sess.start(res(4, 4)).unwrap();

        wait_until(|| sess.worker_state().is_terminal());
        assert_eq!(sess.worker_state(), WorkerState::Failed);
        assert!(!sess.is_completed());
        assert!(matches!(sess.stop(), Err(VireoError::Sampler(_))));
        // The session is reusable after the failure was surfaced.
        sess.start(res(4, 4)).unwrap();
        let _ = sess.stop();
    }

    #[test]
    fn clear_color_prefills_the_color_channel() {
        // Sampler blocks until released, pinning the worker on row 0 so the
        // prefill is observable at the bottom of the frame.
        let gate = Arc::new((std::sync::Mutex::new(false), std::sync::Condvar::new()));
        let worker_gate = Arc::clone(&gate);
        let sampler = move |_x: u32, _y: u32| -> VireoResult<Sample> {
            let (lock, cond) = &*worker_gate;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cond.wait(open).unwrap();
            }
            Ok(Sample {
                color: LinearRgba::TRANSPARENT,
                depth: 0.0,
            })
        };

        let mut sess = RenderSession::new(
            Arc::new(sampler),
            SessionOpts {
                clear_color: Some(LinearRgba::new(0.0, 0.0, 1.0, 1.0)),
                thread_name: None,
            },
        );
        sess.start(res(2, 64)).unwrap();

        let adapter = sess.display_adapter();
        let view = adapter.acquire_for_read().unwrap();
        let bottom = view.frame().color().read_row(63).unwrap();
        assert_eq!(bottom[0].b, 1.0);
        drop(view);

        *gate.0.lock().unwrap() = true;
        gate.1.notify_all();
        sess.stop().unwrap();
    }

    #[test]
    fn keep_alive_flag_round_trips() {
        let sess = gradient_session(res(2, 2));
        assert!(sess.keep_alive());
        sess.set_keep_alive(false);
        assert!(!sess.keep_alive());
    }
}
