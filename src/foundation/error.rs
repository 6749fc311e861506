/// Convenience result type used across Vireo.
pub type VireoResult<T> = Result<T, VireoError>;

/// Top-level error taxonomy used by engine APIs.
#[derive(thiserror::Error, Debug)]
pub enum VireoError {
    /// A channel or frame buffer could not be sized (zero dimension, size
    /// overflow, or backing allocation failure).
    #[error("allocation error: {0}")]
    Allocation(String),

    /// A write was attempted on a closed channel, or a lifecycle operation
    /// was called from the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Row/column index or row-length mismatch.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The operation conflicts with one currently outstanding; retry after it
    /// completes.
    #[error("busy: {0}")]
    Busy(String),

    /// The external sampler callback raised an error mid-pass.
    #[error("sampler failure: {0}")]
    Sampler(String),

    /// Wrapped lower-level error from dependencies or the platform.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VireoError {
    /// Build a [`VireoError::Allocation`] value.
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Build a [`VireoError::InvalidState`] value.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Build a [`VireoError::OutOfRange`] value.
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Build a [`VireoError::Busy`] value.
    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    /// Build a [`VireoError::Sampler`] value.
    pub fn sampler(msg: impl Into<String>) -> Self {
        Self::Sampler(msg.into())
    }
}
