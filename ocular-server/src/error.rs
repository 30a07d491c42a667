// Session error types

use ocular_eye::EyeError;
use thiserror::Error;

/// Errors that end or affect a detection session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection failed or the outbound side went away
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol invariant broken; the connection must be closed
    #[error("Fatal session error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Eye(#[from] EyeError),
}

impl SessionError {
    /// True when the session cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Transport(_) | SessionError::Fatal(_) => true,
            SessionError::Eye(e) => e.is_fatal(),
        }
    }
}
