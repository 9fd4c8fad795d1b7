//! Renderer error type. Every failure aborts the enclosing call chain; nothing is retried.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Device storage, arena or texture budget exhausted.
    Allocation { resource: &'static str, requested: u64, available: u64 },
    /// A mesh file is missing or malformed. Aborts the whole scene load.
    AssetLoad { path: String, reason: String },
    /// Malformed scene input or configuration.
    Scene(String),
    /// The frame graph could not be scheduled.
    Graph(String),
    /// A frame-ring slot was requested while the frame that last used it is still in flight.
    FrameInFlight { slot: usize, frame: u64 },
    /// Device-side failure (pipeline, shader, surface).
    Device(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Allocation { resource, requested, available } => write!(
                f,
                "allocation of {} failed: requested {} bytes, {} available",
                resource, requested, available
            ),
            Error::AssetLoad { path, reason } => write!(f, "failed to load '{}': {}", path, reason),
            Error::Scene(msg) => write!(f, "scene: {}", msg),
            Error::Graph(msg) => write!(f, "frame graph: {}", msg),
            Error::FrameInFlight { slot, frame } => {
                write!(f, "frame slot {} still in flight with frame {}", slot, frame)
            }
            Error::Device(msg) => write!(f, "device: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub(crate) fn asset(path: &str, reason: impl fmt::Display) -> Self {
        Error::AssetLoad { path: path.to_string(), reason: reason.to_string() }
    }
}

impl From<Error> for String {
    fn from(e: Error) -> Self {
        e.to_string()
    }
}
