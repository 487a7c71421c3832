//! Error taxonomy shared by both protocol stacks.
//!
//! Kinds, not types: parse/state/auth/not-found errors are caught at the
//! dispatch-loop boundary and turned into a protocol-specific negative
//! response line. I/O errors break the connection loop outright.

use std::fmt;

#[derive(Debug)]
pub enum MailError {
    /// Malformed command arguments.
    Parse(String),
    /// Command not allowed in the session's current state.
    State(String),
    /// Authentication required, failed, or mechanism unknown.
    Auth(String),
    /// Referenced message number does not exist.
    NotFound(String),
    /// Socket read/write failure; terminates the connection.
    Io(std::io::Error),
    /// Invalid configuration, raised synchronously to the harness.
    Config(String),
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailError::Parse(m) => write!(f, "parse error: {m}"),
            MailError::State(m) => write!(f, "bad sequence of commands: {m}"),
            MailError::Auth(m) => write!(f, "authentication error: {m}"),
            MailError::NotFound(m) => write!(f, "not found: {m}"),
            MailError::Io(e) => write!(f, "i/o error: {e}"),
            MailError::Config(m) => write!(f, "configuration error: {m}"),
        }
    }
}

impl std::error::Error for MailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MailError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MailError {
    fn from(e: std::io::Error) -> Self {
        MailError::Io(e)
    }
}

pub type MailResult<T> = Result<T, MailError>;
