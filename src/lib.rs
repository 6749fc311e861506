//! Vireo is the engine shell of a real-time progressive renderer.
//!
//! One background worker computes an image row by row into a channelled
//! [`FrameBuffer`] while the host's compositor concurrently reads
//! partially-completed results. The shell is sampler-agnostic: any
//! pixel-producing algorithm plugs in behind the [`Sampler`] trait.
//!
//! # Pipeline overview
//!
//! 1. **Start**: [`RenderSession::start`] creates a [`FrameBuffer`] sized to
//!    the viewport and spawns one render worker.
//! 2. **Produce**: the worker samples row-major, writes whole rows into the
//!    color and depth channels, and publishes each row's readiness.
//! 3. **Consume**: the host polls [`DisplayPipelineAdapter`] and composites
//!    newly-ready rows inside a scoped acquire/release read view.
//! 4. **Stop/Resize**: the session cancels cooperatively, joins the worker,
//!    and only then releases or replaces the frame buffer.
//!
//! The key design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **Row-atomic writes**: a reader sees every row either pre-write or
//!   fully written, never torn.
//! - **Join before destroy**: `stop` blocks until the worker thread has
//!   terminated; nothing frees a buffer a worker might still touch.
//! - **Two actors only**: one producer thread per session plus the host's
//!   foreground thread; no worker pool, no parallel sampling.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;
mod frame;
mod render;
mod session;

pub use foundation::core::{LinearRgba, PassId, PassProgress, Resolution, RowRange};
pub use foundation::error::{VireoError, VireoResult};
pub use frame::buffer::{
    CHANNEL_COLOR, CHANNEL_DEPTH, ChannelKind, ChannelRef, ChannelSpec, FrameBuffer, FrameImage,
};
pub use frame::channel::{ChannelElement, PixelChannel};
pub use render::sampler::{GradientSampler, Sample, Sampler, SolidSampler};
pub use render::worker::WorkerState;
pub use session::display::{DisplayPipelineAdapter, FrameReadGuard, ReadAcquirer};
pub use session::render_session::{RenderSession, SessionLifecycle, SessionOpts, SessionState};
