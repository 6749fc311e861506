use crate::foundation::error::{VireoError, VireoResult};

/// Render target dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Create a validated resolution with non-zero dimensions.
    pub fn new(width: u32, height: u32) -> VireoResult<Self> {
        if width == 0 || height == 0 {
            return Err(VireoError::allocation(format!(
                "resolution dimensions must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    /// Total pixel count, checked for zero dimensions and overflow.
    pub fn pixel_count(self) -> VireoResult<usize> {
        if self.width == 0 || self.height == 0 {
            return Err(VireoError::allocation(format!(
                "resolution dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        (self.width as usize)
            .checked_mul(self.height as usize)
            .ok_or_else(|| {
                VireoError::allocation(format!(
                    "pixel count overflows usize at {}x{}",
                    self.width, self.height
                ))
            })
    }
}

/// Half-open row range `[start, end)` within a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RowRange {
    /// Inclusive range start.
    pub start: u32,
    /// Exclusive range end.
    pub end: u32, // exclusive
}

impl RowRange {
    /// Create a validated range with `start <= end`.
    pub fn new(start: u32, end: u32) -> VireoResult<Self> {
        if start > end {
            return Err(VireoError::out_of_range("RowRange start must be <= end"));
        }
        Ok(Self { start, end })
    }

    /// One-row range covering `row`.
    pub fn single(row: u32) -> Self {
        Self {
            start: row,
            end: row.saturating_add(1),
        }
    }

    /// Number of rows contained in the range.
    pub fn len(self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Return `true` when the range has no rows.
    pub fn is_empty(self) -> bool {
        self.start == self.end
    }

    /// Return `true` when `row` is inside `[start, end)`.
    pub fn contains(self, row: u32) -> bool {
        self.start <= row && row < self.end
    }
}

/// Color sample in linear space with straight (non-premultiplied) alpha.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinearRgba {
    /// Red component.
    pub r: f32,
    /// Green component.
    pub g: f32,
    /// Blue component.
    pub b: f32,
    /// Alpha component.
    pub a: f32,
}

impl LinearRgba {
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    /// Fully opaque black.
    pub const OPAQUE_BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    /// Construct from components.
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Clamping conversion to 8-bit RGBA.
    pub fn to_rgba8(self) -> [u8; 4] {
        fn q(c: f32) -> u8 {
            (c.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }
}

/// Monotonically increasing identifier of one render pass within a session.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct PassId(pub u64);

/// Row-level progress of a render pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassProgress {
    /// Rows fully written and published so far.
    pub rows_done: u32,
    /// Total rows in the pass.
    pub rows_total: u32,
}

impl PassProgress {
    /// Completion ratio in `[0, 1]`. Zero-row passes report `0.0`.
    pub fn ratio(self) -> f32 {
        if self.rows_total == 0 {
            return 0.0;
        }
        self.rows_done as f32 / self.rows_total as f32
    }

    /// Return `true` once every row is done.
    pub fn is_finished(self) -> bool {
        self.rows_total > 0 && self.rows_done >= self.rows_total
    }
}
