use thiserror::Error;

/// Misuse of an [`EditSession`](crate::session::EditSession) lifecycle.
///
/// These are programmer errors in the editing flow and are returned to it
/// immediately rather than recovered.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStateError {
    /// An action was appended after the session was closed.
    #[error("cannot append an action to a closed edit session")]
    AppendAfterClose,

    /// `close` was called on a session that is already closed.
    #[error("edit session is already closed")]
    AlreadyClosed,
}

/// Failure inside a replay backend.
///
/// Never surfaces through `RenderContext::render`: GPU failures fall back to
/// the CPU backend and CPU failures become an absent result.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No GPU device could be acquired.
    #[error("gpu backend unavailable: {0}")]
    Unavailable(String),

    /// The working image does not fit the device's texture or buffer budget.
    #[error("{width}x{height} image exceeds the gpu budget ({reason})")]
    OverBudget {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    /// The GPU accepted the work but execution or readback failed.
    #[error("gpu execution failed: {0:#}")]
    Gpu(anyhow::Error),

    /// An action cannot be applied to the current working image.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// The final resample to the target size failed.
    #[error("resample failed: {0:#}")]
    Resample(anyhow::Error),

    /// A background worker panicked or was aborted.
    #[error("replay worker failed: {0}")]
    Worker(String),
}

impl BackendError {
    pub fn invalid_action(msg: impl Into<String>) -> Self {
        Self::InvalidAction(msg.into())
    }
}

/// Library error type for photo-render operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Edit session lifecycle violation.
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    /// Replay backend failure, for callers driving an engine directly.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Image decode/encode error.
    #[error(transparent)]
    Image(#[from] image::ImageError),
}
