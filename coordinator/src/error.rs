use std::{error::Error, fmt, io};

use comms::specs::TaskId;

/// The coordinator module's result type.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// All errors that can surface from the coordinator to its caller.
///
/// Transient per-device faults (failed submissions, unknown completions, directory outages)
/// are absorbed and logged inside a round, they never show up here.
#[derive(Debug)]
pub enum CoordinatorError {
    /// Rejected input, caught before any task is sent.
    InvalidInput(String),
    /// A task id was created twice within one round.
    AlreadyExists(TaskId),
    /// A task id was looked up but never created this round.
    NotFound(TaskId),
    /// Aggregation was asked to reduce an empty set and the policy forbids it.
    NoResults,
    /// Failed to subscribe to the inbound event streams, the round didn't start.
    Subscription(io::Error),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::AlreadyExists(id) => write!(f, "{id} already exists"),
            Self::NotFound(id) => write!(f, "{id} not found"),
            Self::NoResults => f.write_str("no completed tasks to aggregate"),
            Self::Subscription(e) => write!(f, "failed to subscribe to events: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Subscription(e) | Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CoordinatorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CoordinatorError> for io::Error {
    fn from(value: CoordinatorError) -> Self {
        match value {
            CoordinatorError::Io(e) | CoordinatorError::Subscription(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
