use std::{error::Error, fmt, io};

/// The crate's result type.
pub type Result<T> = std::result::Result<T, ParallelErr>;

/// Every failure the loader, the model wrapper and the launcher can surface.
#[derive(Debug)]
pub enum ParallelErr {
    /// Invalid configuration, caught before any work starts.
    InvalidConfig(String),
    /// A global quantity can't be split evenly among the participants.
    NotDivisible {
        what: &'static str,
        value: usize,
        participants: usize,
    },
    /// The framework failed to join, leave or synchronize a process group.
    Communication { rank: usize, msg: String },
    /// Parameters produced no gradient while unused parameters aren't tolerated.
    UnusedParameters { names: Vec<String> },
    /// An error raised by the user-supplied training function.
    Training(Box<dyn Error + Send + Sync>),
    /// A spawned worker reported a failure.
    WorkerFailed { rank: usize, msg: String },
    /// A worker thread panicked.
    WorkerPanicked { rank: usize },
    IndexOutOfBounds { index: usize, len: usize },
    MissingLabel { stem: String },
    UnknownLabel { label: String },
    Io(io::Error),
    Serialization(serde_json::Error),
}

impl ParallelErr {
    /// Wraps an arbitrary error coming out of training code.
    pub fn training<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::Training(err.into())
    }

    /// Whether this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::NotDivisible { .. })
    }
}

impl fmt::Display for ParallelErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::NotDivisible {
                what,
                value,
                participants,
            } => write!(
                f,
                "{what} ({value}) is not divisible by the number of participants ({participants})"
            ),
            Self::Communication { rank, msg } => {
                write!(f, "communication error on rank {rank}: {msg}")
            }
            Self::UnusedParameters { names } => write!(
                f,
                "parameters received no gradient while unused parameters are not tolerated: {}",
                names.join(", ")
            ),
            Self::Training(e) => write!(f, "training error: {e}"),
            Self::WorkerFailed { rank, msg } => write!(f, "worker {rank} failed: {msg}"),
            Self::WorkerPanicked { rank } => write!(f, "worker {rank} panicked"),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for dataset of length {len}")
            }
            Self::MissingLabel { stem } => write!(f, "no label found for file stem {stem:?}"),
            Self::UnknownLabel { label } => {
                write!(f, "label {label:?} has no class index in the mapping")
            }
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl Error for ParallelErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Training(e) => Some(e.as_ref()),
            Self::Io(e) => Some(e),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ParallelErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ParallelErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ParallelErr> for io::Error {
    fn from(value: ParallelErr) -> Self {
        match value {
            ParallelErr::Io(e) => e,
            other if other.is_config() => io::Error::new(io::ErrorKind::InvalidInput, other),
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_divisible_message_names_the_quantity() {
        let err = ParallelErr::NotDivisible {
            what: "batch size",
            value: 10,
            participants: 4,
        };

        assert_eq!(
            err.to_string(),
            "batch size (10) is not divisible by the number of participants (4)"
        );
        assert!(err.is_config());
    }

    #[test]
    fn config_errors_map_to_invalid_input() {
        let err: io::Error = ParallelErr::InvalidConfig("nope".into()).into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err: io::Error = ParallelErr::WorkerPanicked { rank: 1 }.into();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn training_error_keeps_its_source() {
        let err = ParallelErr::training("loss exploded");
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "training error: loss exploded");
    }
}
