use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use smallvec::SmallVec;

use crate::foundation::core::RowRange;
use crate::frame::buffer::FrameBuffer;

/// Shared slot holding the current pass's frame buffer, if any.
///
/// The session writes it (publish on start, clear on stop/resize); the
/// display side only ever read-locks it. The write lock is what makes
/// stop/resize block until every outstanding read scope has been released.
pub(crate) type FrameSlot = RwLock<Option<Arc<FrameBuffer>>>;

pub(crate) fn new_frame_slot() -> Arc<FrameSlot> {
    Arc::new(RwLock::new(None))
}

/// Consumer-side contract handed to the host's compositor.
///
/// The adapter never owns the frame buffer: it borrows a time-bounded read
/// view per composite cycle via [`DisplayPipelineAdapter::acquire_for_read`].
/// Cloning is cheap; every clone observes the same session.
#[derive(Clone)]
pub struct DisplayPipelineAdapter {
    slot: Arc<FrameSlot>,
}

impl DisplayPipelineAdapter {
    pub(crate) fn new(slot: Arc<FrameSlot>) -> Self {
        Self { slot }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Option<Arc<FrameBuffer>>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return `true` once a frame buffer exists and at least one row has been
    /// marked ready.
    pub fn is_frame_available(&self) -> bool {
        self.read_slot()
            .as_ref()
            .is_some_and(|frame| frame.rows_published() > 0)
    }

    /// Acquire a scoped read view of the current frame buffer.
    ///
    /// Returns `None` while no pass has published a buffer. The returned
    /// guard carries the dirty-row snapshot (consumed here, so each ready
    /// range reaches exactly one composite cycle) and pins the buffer: the
    /// owning session's stop/resize blocks until the guard is dropped. The
    /// render worker is not blocked; it keeps writing subsequent rows while
    /// the scope is open.
    ///
    /// Do not call the owning session's `stop`/`resize` from the same thread
    /// while holding the guard; release first.
    pub fn acquire_for_read(&self) -> Option<FrameReadGuard<'_>> {
        let slot = self.read_slot();
        let frame = Arc::clone(slot.as_ref()?);
        let dirty = frame.consume_dirty_rows();
        Some(FrameReadGuard {
            _slot: slot,
            frame,
            dirty,
        })
    }
}

/// Scoped read view over the current frame buffer.
///
/// Releasing is dropping, guaranteed on every exit path. The compositor
/// must not retain channel data references past the scope.
pub struct FrameReadGuard<'a> {
    _slot: RwLockReadGuard<'a, Option<Arc<FrameBuffer>>>,
    frame: Arc<FrameBuffer>,
    dirty: SmallVec<[RowRange; 8]>,
}

impl FrameReadGuard<'_> {
    /// The frame buffer under read.
    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    /// Row ranges that became ready since the previous acquisition.
    pub fn dirty_rows(&self) -> &[RowRange] {
        &self.dirty
    }
}

/// The acquire/release half of the host compositor boundary.
pub trait ReadAcquirer {
    /// See [`DisplayPipelineAdapter::is_frame_available`].
    fn is_frame_available(&self) -> bool;
    /// See [`DisplayPipelineAdapter::acquire_for_read`].
    fn acquire_for_read(&self) -> Option<FrameReadGuard<'_>>;
}

impl ReadAcquirer for DisplayPipelineAdapter {
    fn is_frame_available(&self) -> bool {
        DisplayPipelineAdapter::is_frame_available(self)
    }

    fn acquire_for_read(&self) -> Option<FrameReadGuard<'_>> {
        DisplayPipelineAdapter::acquire_for_read(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Resolution;

    #[test]
    fn no_frame_means_unavailable_and_no_guard() {
        let adapter = DisplayPipelineAdapter::new(new_frame_slot());
        assert!(!adapter.is_frame_available());
        assert!(adapter.acquire_for_read().is_none());
    }

    #[test]
    fn availability_requires_a_published_row() {
        let slot = new_frame_slot();
        let frame =
            Arc::new(FrameBuffer::standard(Resolution::new(2, 2).unwrap()).unwrap());
        *slot.write().unwrap() = Some(Arc::clone(&frame));

        let adapter = DisplayPipelineAdapter::new(Arc::clone(&slot));
        assert!(!adapter.is_frame_available());

        frame.mark_rows_ready(RowRange::single(0)).unwrap();
        assert!(adapter.is_frame_available());
    }

    #[test]
    fn acquire_consumes_the_dirty_snapshot_exactly_once() {
        let slot = new_frame_slot();
        let frame =
            Arc::new(FrameBuffer::standard(Resolution::new(2, 2).unwrap()).unwrap());
        frame.mark_rows_ready(RowRange::new(0, 2).unwrap()).unwrap();
        *slot.write().unwrap() = Some(frame);

        let adapter = DisplayPipelineAdapter::new(slot);
        let first = adapter.acquire_for_read().unwrap();
        assert_eq!(first.dirty_rows(), &[RowRange { start: 0, end: 2 }]);
        assert_eq!(first.frame().resolution().height, 2);
        drop(first);

        let second = adapter.acquire_for_read().unwrap();
        assert!(second.dirty_rows().is_empty());
    }
}
