//! Error types shared by every part of the engine.
//!
//! Errors fall into a small taxonomy (see [`ErrorKind`]). Validation and
//! build-stale errors are always reported to the caller; capacity and state
//! errors that happen inside the mixer tick degrade to silence for the
//! affected source instead of surfacing here.

use crate::filter::FilterId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Everything that can go wrong in the motion engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Malformed size, format or parameter. Nothing was mutated.
    #[error("validation error: {0}")]
    Validation(String),

    /// Queue full, or fewer samples queued than requested.
    #[error("capacity error: {0}")]
    Capacity(String),

    /// Operation is not valid in the current state.
    #[error("state error: {0}")]
    State(String),

    /// The filter chain was modified after it was built.
    #[error("filter {0:?} was modified after build")]
    BuildStale(FilterId),

    /// No physical device; the engine keeps running in emulation.
    #[error("motion device unavailable (running in emulation)")]
    DeviceUnavailable,

    /// Opaque code reported by the device transport.
    #[error("device driver error (code {0})")]
    Driver(i32),

    /// The external loader rejected the stream.
    #[error("failed to load motion data: {0}")]
    Load(String),

    /// The external saver failed.
    #[error("failed to save motion data: {0}")]
    Save(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Capacity,
    State,
    BuildStale,
    DeviceUnavailable,
    Driver,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Capacity(_) => ErrorKind::Capacity,
            Error::State(_) => ErrorKind::State,
            Error::BuildStale(_) => ErrorKind::BuildStale,
            Error::DeviceUnavailable => ErrorKind::DeviceUnavailable,
            Error::Driver(_) => ErrorKind::Driver,
            Error::Load(_) | Error::Save(_) => ErrorKind::Io,
        }
    }

    /// Whether the mixer can absorb this error by silencing a single source.
    pub fn is_local(&self) -> bool {
        matches!(self.kind(), ErrorKind::Capacity | ErrorKind::State)
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn capacity(msg: impl Into<String>) -> Self {
        Error::Capacity(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Error::State(msg.into())
    }
}
