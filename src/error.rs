//! Failure taxonomy for the orchestration core
//!
//! Internal components signal failure through these types; they never emit
//! user-facing text. The orchestrator layer maps them to the locale's fixed
//! message set at its boundary, so nothing below the transport ever panics
//! or leaks an error string to the user.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Structured-output extraction did not yield usable data. Retryable.
    #[error("structured output parse failed: {0}")]
    Parse(String),

    /// The completion endpoint failed. Retryable at the orchestrator level.
    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// Accumulated context cannot be trimmed under the ceiling. Terminal
    /// for the current operation.
    #[error("accumulated context cannot be trimmed under {ceiling} tokens")]
    InsufficientBudget { ceiling: usize },

    /// Missing or invalid credentials, unknown locale, malformed request
    /// envelope. Fatal for the triggering request, never for the session.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external collaborator (code runner, chart service) reported
    /// failure. Handled per operation.
    #[error("capability '{name}' failed: {reason}")]
    Capability { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion call timed out after {0:?}")]
    Timeout(Duration),

    #[error("completion provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("malformed completion response: {0}")]
    Malformed(String),

    #[error("completion transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl Error {
    pub fn capability(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Capability {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether a bounded-retry block should attempt again after this error.
    ///
    /// Parse and completion failures are transient by contract; budget and
    /// configuration failures will not improve on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Parse(_) | Error::Completion(_))
    }
}
