//! Progress reporting hooks
//!
//! Long-running operations report through [`ProgressCallback`] so the library
//! stays free of terminal output.

use crate::error::Error;
use async_trait::async_trait;

/// Coarse phase of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading local and remote state
    Gathering,
    /// Computing what to do
    Planning,
    /// Trial cherry-picks in the scratch checkout
    Probing,
    /// Issuing remote operations
    Executing,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gathering => write!(f, "gathering"),
            Self::Planning => write!(f, "planning"),
            Self::Probing => write!(f, "probing"),
            Self::Executing => write!(f, "executing"),
        }
    }
}

/// Receives progress updates
#[async_trait]
pub trait ProgressCallback: Send + Sync {
    /// A new phase started
    async fn on_phase(&self, phase: Phase);

    /// Free-form status line
    async fn on_message(&self, message: &str);

    /// A non-fatal error (the operation continues)
    async fn on_error(&self, error: &Error);
}

/// Discards all progress updates
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressCallback for NoopProgress {
    async fn on_phase(&self, _phase: Phase) {}
    async fn on_message(&self, _message: &str) {}
    async fn on_error(&self, _error: &Error) {}
}
