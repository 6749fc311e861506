use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use smallvec::SmallVec;

use crate::foundation::core::{LinearRgba, Resolution, RowRange};
use crate::foundation::error::{VireoError, VireoResult};
use crate::frame::channel::PixelChannel;

/// Well-known name of the mandatory color channel.
pub const CHANNEL_COLOR: &str = "color";
/// Well-known name of the mandatory depth channel.
pub const CHANNEL_DEPTH: &str = "depth";

/// Element kind stored by a named channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChannelKind {
    /// 4-component linear color samples.
    Color,
    /// Single-float samples (depth, alpha, object ids, ...).
    Scalar,
}

/// Channel layout requested at frame-buffer creation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChannelSpec {
    /// Channel name, unique within one frame buffer.
    pub name: String,
    /// Element kind.
    pub kind: ChannelKind,
}

impl ChannelSpec {
    /// Spec for a color channel named `name`.
    pub fn color(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Color,
        }
    }

    /// Spec for a scalar channel named `name`.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Scalar,
        }
    }
}

/// An auxiliary channel slot beyond the mandatory color/depth pair.
pub enum ChannelSlot {
    /// Color samples.
    Color(PixelChannel<LinearRgba>),
    /// Scalar samples.
    Scalar(PixelChannel<f32>),
}

impl ChannelSlot {
    fn open(&self, resolution: Resolution) -> VireoResult<()> {
        match self {
            Self::Color(c) => c.open(resolution),
            Self::Scalar(c) => c.open(resolution),
        }
    }

    fn close(&self) {
        match self {
            Self::Color(c) => c.close(),
            Self::Scalar(c) => c.close(),
        }
    }

    fn is_open(&self) -> bool {
        match self {
            Self::Color(c) => c.is_open(),
            Self::Scalar(c) => c.is_open(),
        }
    }
}

/// Borrowed view of one named channel.
pub enum ChannelRef<'a> {
    /// Color samples.
    Color(&'a PixelChannel<LinearRgba>),
    /// Scalar samples.
    Scalar(&'a PixelChannel<f32>),
}

/// Rows written by the worker but not yet handed to the display side.
///
/// Ranges merge on append when adjacent, so a full sequential pass collapses
/// to a single range per consume cycle.
struct DirtyRows {
    ranges: Mutex<SmallVec<[RowRange; 8]>>,
    published: AtomicU64,
}

impl DirtyRows {
    fn new() -> Self {
        Self {
            ranges: Mutex::new(SmallVec::new()),
            published: AtomicU64::new(0),
        }
    }

    fn mark(&self, range: RowRange) {
        if range.is_empty() {
            return;
        }
        let mut ranges = self.ranges.lock().unwrap_or_else(PoisonError::into_inner);
        match ranges.last_mut() {
            Some(last) if last.end == range.start => last.end = range.end,
            _ => ranges.push(range),
        }
        self.published.fetch_add(range.len() as u64, Ordering::Release);
    }

    fn consume(&self) -> SmallVec<[RowRange; 8]> {
        let mut ranges = self.ranges.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *ranges)
    }

    fn reset(&self) {
        let mut ranges = self.ranges.lock().unwrap_or_else(PoisonError::into_inner);
        ranges.clear();
        self.published.store(0, Ordering::Release);
    }

    fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

/// Exported color-channel pixels as straight-alpha RGBA8, tightly packed,
/// row-major.
#[derive(Clone, Debug)]
pub struct FrameImage {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes.
    pub data: Vec<u8>,
}

/// An aggregate of named [`PixelChannel`]s sharing one resolution, plus the
/// dirty-row tracker connecting the render worker to the display side.
///
/// A frame buffer is exclusively owned by one `RenderSession` at a time; the
/// display pipeline only ever holds a time-bounded read view. Resolution is
/// fixed while any channel is open; [`FrameBuffer::resize`] refuses with
/// `Busy` until every channel has been closed.
pub struct FrameBuffer {
    color: PixelChannel<LinearRgba>,
    depth: PixelChannel<f32>,
    aux: Vec<(String, ChannelSlot)>,
    dirty: DirtyRows,
}

impl FrameBuffer {
    /// Create a frame buffer with the standard color + depth channel pair.
    pub fn standard(resolution: Resolution) -> VireoResult<Self> {
        Self::create(
            resolution,
            &[
                ChannelSpec::color(CHANNEL_COLOR),
                ChannelSpec::scalar(CHANNEL_DEPTH),
            ],
        )
    }

    /// Create a frame buffer from an explicit channel list.
    ///
    /// The list must contain a color channel named [`CHANNEL_COLOR`] and a
    /// scalar channel named [`CHANNEL_DEPTH`]; duplicates are rejected.
    /// Creation is atomic: validation and sizing run before any channel is
    /// allocated, so a failure never leaves a half-built buffer behind.
    pub fn create(resolution: Resolution, specs: &[ChannelSpec]) -> VireoResult<Self> {
        resolution.pixel_count()?;

        for (i, spec) in specs.iter().enumerate() {
            if spec.name.is_empty() {
                return Err(VireoError::invalid_state("channel name must be non-empty"));
            }
            if specs[..i].iter().any(|s| s.name == spec.name) {
                return Err(VireoError::invalid_state(format!(
                    "duplicate channel name '{}'",
                    spec.name
                )));
            }
        }
        let has_color = specs
            .iter()
            .any(|s| s.name == CHANNEL_COLOR && s.kind == ChannelKind::Color);
        let has_depth = specs
            .iter()
            .any(|s| s.name == CHANNEL_DEPTH && s.kind == ChannelKind::Scalar);
        if !has_color || !has_depth {
            return Err(VireoError::invalid_state(
                "frame buffer requires a 'color' color channel and a 'depth' scalar channel",
            ));
        }

        let color = PixelChannel::new();
        color.open(resolution)?;
        let depth = PixelChannel::new();
        depth.open(resolution)?;

        let mut aux = Vec::new();
        for spec in specs {
            if spec.name == CHANNEL_COLOR || spec.name == CHANNEL_DEPTH {
                continue;
            }
            let slot = match spec.kind {
                ChannelKind::Color => ChannelSlot::Color(PixelChannel::new()),
                ChannelKind::Scalar => ChannelSlot::Scalar(PixelChannel::new()),
            };
            slot.open(resolution)?;
            aux.push((spec.name.clone(), slot));
        }

        Ok(Self {
            color,
            depth,
            aux,
            dirty: DirtyRows::new(),
        })
    }

    /// Shared resolution of every channel.
    pub fn resolution(&self) -> Resolution {
        self.color.resolution()
    }

    /// The mandatory color channel.
    pub fn color(&self) -> &PixelChannel<LinearRgba> {
        &self.color
    }

    /// The mandatory depth channel.
    pub fn depth(&self) -> &PixelChannel<f32> {
        &self.depth
    }

    /// Look up any channel by name.
    pub fn channel(&self, name: &str) -> Option<ChannelRef<'_>> {
        match name {
            CHANNEL_COLOR => Some(ChannelRef::Color(&self.color)),
            CHANNEL_DEPTH => Some(ChannelRef::Scalar(&self.depth)),
            _ => self.aux.iter().find(|(n, _)| n == name).map(|(_, slot)| {
                match slot {
                    ChannelSlot::Color(c) => ChannelRef::Color(c),
                    ChannelSlot::Scalar(c) => ChannelRef::Scalar(c),
                }
            }),
        }
    }

    /// Names of every channel, standard pair first.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        [CHANNEL_COLOR, CHANNEL_DEPTH]
            .into_iter()
            .chain(self.aux.iter().map(|(n, _)| n.as_str()))
    }

    /// Return `true` while any channel is open for writing.
    pub fn is_open(&self) -> bool {
        self.color.is_open()
            || self.depth.is_open()
            || self.aux.iter().any(|(_, slot)| slot.is_open())
    }

    /// Close every channel. Idempotent; the pass contents become final.
    pub fn close_all(&self) {
        self.color.close();
        self.depth.close();
        for (_, slot) in &self.aux {
            slot.close();
        }
    }

    /// Tell the display side `range` is now safe to read.
    ///
    /// Called by the worker only after the row has been fully written to both
    /// the color and depth channel, which is what makes a row all-or-nothing
    /// visible.
    pub fn mark_rows_ready(&self, range: RowRange) -> VireoResult<()> {
        let height = self.resolution().height;
        if range.end > height {
            return Err(VireoError::out_of_range(format!(
                "ready range end {} > height {height}",
                range.end
            )));
        }
        self.dirty.mark(range);
        Ok(())
    }

    /// Atomically take and clear the dirty-row list.
    ///
    /// Each published row range is returned from exactly one call, so one
    /// composite cycle picks up newly-ready rows exactly once.
    pub fn consume_dirty_rows(&self) -> SmallVec<[RowRange; 8]> {
        self.dirty.consume()
    }

    /// Total rows ever marked ready for the current pass.
    pub fn rows_published(&self) -> u64 {
        self.dirty.published()
    }

    /// Reallocate every channel at `new_resolution` and reset the dirty
    /// tracker, leaving all channels open for the next pass.
    ///
    /// Refused with `Busy` while any channel is still open for writing: the
    /// owning session must stop its worker first. A session-level resize
    /// swaps in a brand-new buffer instead of calling this on a live one.
    pub fn resize(&self, new_resolution: Resolution) -> VireoResult<()> {
        if self.is_open() {
            return Err(VireoError::busy(
                "resize while a channel is open for writing; stop the worker first",
            ));
        }
        new_resolution.pixel_count()?;

        self.color.open(new_resolution)?;
        self.depth.open(new_resolution)?;
        for (_, slot) in &self.aux {
            slot.open(new_resolution)?;
        }
        self.dirty.reset();
        Ok(())
    }

    /// Export the color channel as straight-alpha RGBA8.
    pub fn color_to_rgba8(&self) -> VireoResult<FrameImage> {
        let resolution = self.resolution();
        let mut data = Vec::with_capacity(resolution.pixel_count()?.saturating_mul(4));
        for row in 0..resolution.height {
            for px in self.color.read_row(row)? {
                data.extend_from_slice(&px.to_rgba8());
            }
        }
        Ok(FrameImage {
            width: resolution.width,
            height: resolution.height,
            data,
        })
    }
}
