//! Crate-wide error type unifying the per-component errors behind one
//! `Display`/`Error` surface, each mapped to a stable status classification
//! — the same `From<CdpError> for AppError` → `ExitCode` shape the teacher
//! uses, adapted from a CLI exit code to a session status classification.

use std::fmt;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Stable classification for a [`SessionError`], independent of the specific
/// variant — usable by an embedding binary to pick a process exit code or by
/// a status endpoint to bucket errors for alerting.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorClass {
    Config = 1,
    Connection = 2,
    Timeout = 3,
    Internal = 4,
}

impl fmt::Display for SessionErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "configuration error"),
            Self::Connection => write!(f, "connection error"),
            Self::Timeout => write!(f, "timeout error"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// Unified error type for callers that want a single `Result` surface across
/// configuration resolution and transport failures.
#[derive(Debug)]
pub enum SessionError {
    Config(ConfigError),
    Transport(TransportError),
}

impl SessionError {
    #[must_use]
    pub fn classification(&self) -> SessionErrorClass {
        match self {
            Self::Config(_) => SessionErrorClass::Config,
            Self::Transport(TransportError::Connect(_) | TransportError::Closed) => {
                SessionErrorClass::Connection
            }
            Self::Transport(TransportError::ConnectTimeout) => SessionErrorClass::Timeout,
            Self::Transport(TransportError::Send(_)) => SessionErrorClass::Internal,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ConfigError> for SessionError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}
