use stepview_session::{ObjectId, SessionError};
use thiserror::Error;

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Error, Debug)]
pub enum InspectError {
    #[error("event has no thread to inspect")]
    MissingThread,
    #[error("`{method}` on object {object} did not return an object")]
    NotAnObject { object: ObjectId, method: &'static str },
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Failure that ends a run as an internal error.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("inspection failed: {0}")]
    Inspect(#[from] InspectError),
    #[error("debug session failed: {0}")]
    Session(#[from] SessionError),
}

impl TraceError {
    /// Type reported in the terminal step's `threw.exception`.
    pub fn type_name(&self) -> &'static str {
        match self {
            TraceError::Inspect(_) => "InternalError",
            TraceError::Session(_) => "ProtocolError",
        }
    }
}

/// Misuse of the command surface. The run itself is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("action not found: `{0}`")]
    UnknownCommand(String),
}
