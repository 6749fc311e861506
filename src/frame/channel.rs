use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::foundation::core::{LinearRgba, Resolution};
use crate::foundation::error::{VireoError, VireoResult};

/// Element types storable in a [`PixelChannel`].
pub trait ChannelElement: Copy + Default + Send + Sync + 'static {}

impl ChannelElement for LinearRgba {}
impl ChannelElement for f32 {}

struct ChannelState<T> {
    width: u32,
    height: u32,
    open: bool,
    data: Vec<T>,
}

/// A typed 2D grid of per-pixel samples with row-addressable access and an
/// explicit open/closed lifecycle.
///
/// Writes are whole-row operations performed under the channel lock, so a
/// concurrent reader observes each row either entirely pre-write or entirely
/// post-write, never a mix. Reads stay valid after [`PixelChannel::close`];
/// closing only makes the contents final for the pass.
pub struct PixelChannel<T: ChannelElement> {
    state: RwLock<ChannelState<T>>,
}

impl<T: ChannelElement> PixelChannel<T> {
    /// A closed, zero-sized channel. Call [`PixelChannel::open`] to allocate.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChannelState {
                width: 0,
                height: 0,
                open: false,
                data: Vec::new(),
            }),
        }
    }

    // Rows are written as whole-slice copies, so a poisoned lock still holds
    // structurally valid rows; recover the guard instead of propagating.
    fn read_state(&self) -> RwLockReadGuard<'_, ChannelState<T>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ChannelState<T>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate backing storage at `resolution` and mark the channel open.
    ///
    /// Opening an already-open channel at identical dimensions is a no-op.
    /// Any other call reallocates and resets the contents to `T::default()`.
    pub fn open(&self, resolution: Resolution) -> VireoResult<()> {
        let mut st = self.write_state();
        if st.open && st.width == resolution.width && st.height == resolution.height {
            return Ok(());
        }

        let len = resolution.pixel_count()?;
        len.checked_mul(size_of::<T>()).ok_or_else(|| {
            VireoError::allocation(format!(
                "channel byte size overflows usize at {}x{}",
                resolution.width, resolution.height
            ))
        })?;

        st.data.clear();
        st.data.resize(len, T::default());
        st.width = resolution.width;
        st.height = resolution.height;
        st.open = true;
        Ok(())
    }

    /// Mark the channel read-only. Idempotent; contents are final for the pass.
    pub fn close(&self) {
        self.write_state().open = false;
    }

    /// Return `true` while the channel accepts writes.
    pub fn is_open(&self) -> bool {
        self.read_state().open
    }

    /// Current channel dimensions (0x0 before the first open).
    pub fn resolution(&self) -> Resolution {
        let st = self.read_state();
        Resolution {
            width: st.width,
            height: st.height,
        }
    }

    /// Write one full row in a single lock-held copy.
    ///
    /// Requires the channel be open, `row < height`, and
    /// `values.len() == width`. Partial-row writes are not expressible.
    pub fn write_row(&self, row: u32, values: &[T]) -> VireoResult<()> {
        let mut st = self.write_state();
        if !st.open {
            return Err(VireoError::invalid_state(
                "write_row on a closed channel",
            ));
        }
        if row >= st.height {
            return Err(VireoError::out_of_range(format!(
                "row {row} >= height {}",
                st.height
            )));
        }
        let width = st.width as usize;
        if values.len() != width {
            return Err(VireoError::out_of_range(format!(
                "row length {} != width {width}",
                values.len()
            )));
        }
        let offset = row as usize * width;
        st.data[offset..offset + width].copy_from_slice(values);
        Ok(())
    }

    /// Read one row, valid in any state.
    ///
    /// Rows never written since the last open hold `T::default()`. A row is
    /// never observed partially written.
    pub fn read_row(&self, row: u32) -> VireoResult<Vec<T>> {
        let st = self.read_state();
        if row >= st.height {
            return Err(VireoError::out_of_range(format!(
                "row {row} >= height {}",
                st.height
            )));
        }
        let width = st.width as usize;
        let offset = row as usize * width;
        Ok(st.data[offset..offset + width].to_vec())
    }

    /// Fill the whole grid with `value`. Requires the channel be open.
    pub fn fill(&self, value: T) -> VireoResult<()> {
        let mut st = self.write_state();
        if !st.open {
            return Err(VireoError::invalid_state("fill on a closed channel"));
        }
        st.data.fill(value);
        Ok(())
    }
}

impl<T: ChannelElement> Default for PixelChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}
