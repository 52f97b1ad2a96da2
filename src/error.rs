use derive_more::From;
use std::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    /// A configuration field failed validation; fatal at construction
    Validation { field: &'static str, message: String },

    /// Initial cache synchronization did not complete before the deadline
    Sync(String),

    /// Graceful stop did not finish before the deadline; teardown continues
    /// detached in the background
    ShutdownTimeout(Duration),

    /// `start` was called on a pipeline that already left the Created state
    AlreadyStarted,

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    Io(std::io::Error),

    /// Custom error message
    Custom(String),
}

impl Error {
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Validation { field, message } => {
                write!(fmt, "validation error for field '{field}': {message}")
            }
            Self::Sync(msg) => write!(fmt, "sync error: {msg}"),
            Self::ShutdownTimeout(d) => {
                write!(fmt, "shutdown did not complete within {}ms", d.as_millis())
            }
            Self::AlreadyStarted => write!(fmt, "pipeline already started"),
            other => write!(fmt, "{other:?}"),
        }
    }
}

impl std::error::Error for Error {}
