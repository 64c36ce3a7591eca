use std::{error::Error, fmt, io};

/// The engine's result type.
pub type Result<T> = std::result::Result<T, EngineErr>;

/// Failures of the coordination core.
///
/// Every variant is fatal for the run that produced it, restarting is done from the last
/// checkpoint by whoever launched the workers.
#[derive(Debug)]
pub enum EngineErr {
    Io(io::Error),
    Serde(serde_json::Error),
    Codec(bincode::Error),
    IllegalState(&'static str),
    MissingMetric {
        group: &'static str,
        key: &'static str,
    },
    UnexpectedMessage {
        seq: u64,
        expected: &'static str,
        got: &'static str,
    },
    SequenceMismatch {
        expected: u64,
        got: u64,
    },
    LengthMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    Remote(String),
    DeviceUnavailable(String),
    External(Box<dyn Error + Send + Sync>),
}

impl EngineErr {
    /// Wraps a failure raised by an external capability (model, optimizer, evaluator...).
    pub fn external<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::External(err.into())
    }
}

impl fmt::Display for EngineErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineErr::Io(e) => write!(f, "io error: {e}"),
            EngineErr::Serde(e) => write!(f, "serialization error: {e}"),
            EngineErr::Codec(e) => write!(f, "wire encoding error: {e}"),
            EngineErr::IllegalState(what) => write!(f, "illegal state: {what}"),
            EngineErr::MissingMetric { group, key } => {
                write!(f, "metric {key} required by loss group {group} is missing")
            }
            EngineErr::UnexpectedMessage { seq, expected, got } => {
                write!(
                    f,
                    "unexpected message at collective {seq}: expected {expected}, got {got}"
                )
            }
            EngineErr::SequenceMismatch { expected, got } => write!(
                f,
                "collective sequence mismatch: expected {expected}, got {got}"
            ),
            EngineErr::LengthMismatch {
                what,
                got,
                expected,
            } => write!(f, "{what} length mismatch: got {got}, expected {expected}"),
            EngineErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of range for world size {world_size}")
            }
            EngineErr::Remote(detail) => write!(f, "peer failure: {detail}"),
            EngineErr::DeviceUnavailable(name) => write!(f, "device {name} is not available"),
            EngineErr::External(e) => write!(f, "external capability failed: {e}"),
        }
    }
}

impl Error for EngineErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineErr::Io(e) => Some(e),
            EngineErr::Serde(e) => Some(e),
            EngineErr::Codec(e) => Some(e.as_ref()),
            EngineErr::External(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for EngineErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl From<bincode::Error> for EngineErr {
    fn from(value: bincode::Error) -> Self {
        Self::Codec(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<EngineErr> for io::Error {
    fn from(value: EngineErr) -> Self {
        match value {
            EngineErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
