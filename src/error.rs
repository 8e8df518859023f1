use thiserror::Error as ThisError;

/// Errors raised by the protocol and decoding layer.
///
/// The variants follow how the failure has to be handled, not where it came
/// from. `Transport` and `Closed` mean the link itself is gone and the next
/// operation must reconnect first. `Protocol` and `Exception` only spoil the
/// request they belong to. `Validation` never leaves the process. `Decode`
/// degrades a single value. `NoData` fails a poll that decoded nothing.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("device returned exception code {code:#04x} for function {function:#04x}")]
    Exception { function: u8, code: u8 },

    #[error("rejected: {0}")]
    Validation(String),

    #[error("cannot decode {register}: {reason}")]
    Decode { register: String, reason: String },

    #[error("unknown register {0}")]
    NotFound(String),

    #[error("device returned no data")]
    NoData,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True when the failure means the connection can no longer be trusted.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Closed)
    }

    pub fn transport<S: std::fmt::Display>(msg: S) -> Self {
        Error::Transport(msg.to_string())
    }

    pub fn protocol<S: std::fmt::Display>(msg: S) -> Self {
        Error::Protocol(msg.to_string())
    }

    pub fn validation<S: std::fmt::Display>(msg: S) -> Self {
        Error::Validation(msg.to_string())
    }
}

// tokio_util codecs require their error type to absorb io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
