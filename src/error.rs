//! Error types for spr
//!
//! One crate-wide error enum. Every variant carries the entity it concerns so
//! the command layer can format it without re-deriving context.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
///
/// Mirrors how callers are expected to react: local-state errors are fatal,
/// transient remote errors are retried, permanent remote errors are reported
/// per PR, ordering errors fail the whole plan closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The local repository is in a state we refuse to act on
    LocalState,
    /// Network or rate-limit failure worth retrying
    RemoteTransient,
    /// The code host rejected the operation
    RemotePermanent,
    /// No safe operation order exists
    Ordering,
    /// Setup problem (config, auth, missing tools)
    Environment,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalState => write!(f, "local state"),
            Self::RemoteTransient => write!(f, "transient remote"),
            Self::RemotePermanent => write!(f, "remote"),
            Self::Ordering => write!(f, "ordering"),
            Self::Environment => write!(f, "environment"),
        }
    }
}

/// Errors produced by spr
#[derive(Debug, Error)]
pub enum Error {
    /// `base` is not an ancestor of `tip`
    #[error("ambiguous range: {base} is not an ancestor of {tip}")]
    AmbiguousRange {
        /// Base reference
        base: String,
        /// Tip reference
        tip: String,
    },

    /// Two commits in the range carry the same commit-id trailer
    #[error("duplicate commit-id {commit_id} on commits {first} and {second}")]
    DuplicateCommitId {
        /// The duplicated id
        commit_id: String,
        /// Hash of the first commit carrying it
        first: String,
        /// Hash of the second commit carrying it
        second: String,
    },

    /// The provider could not produce an isolated checkout
    #[error("scratch checkout error: {0}")]
    ScratchCheckout(String),

    /// No safe remote operation order exists
    #[error("reconciliation impossible: {0}")]
    ReconciliationImpossible(String),

    /// A git subprocess failed
    #[error("git error: {0}")]
    Git(String),

    /// GitHub rejected a request
    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    /// Network failure or rate limiting
    #[error("transient error: {0}")]
    Transient(String),

    /// An operation exceeded its time budget
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being attempted
        operation: String,
        /// The budget that was exceeded
        after: Duration,
    },

    /// No usable credentials
    #[error("authentication error: {0}")]
    Auth(String),

    /// Configuration could not be loaded or is invalid
    #[error("config error: {0}")]
    Config(String),

    /// No remote points at a supported code host
    #[error("no supported remotes found (only GitHub is supported)")]
    NoSupportedRemotes,

    /// The requested remote does not exist
    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    /// Bug or unexpected state
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AmbiguousRange { .. } | Self::DuplicateCommitId { .. } | Self::Git(_) => {
                ErrorKind::LocalState
            }
            Self::Transient(_) | Self::Timeout { .. } => ErrorKind::RemoteTransient,
            Self::GitHubApi(_) => ErrorKind::RemotePermanent,
            Self::ReconciliationImpossible(_) => ErrorKind::Ordering,
            Self::ScratchCheckout(_)
            | Self::Auth(_)
            | Self::Config(_)
            | Self::NoSupportedRemotes
            | Self::RemoteNotFound(_)
            | Self::Internal(_) => ErrorKind::Environment,
        }
    }

    /// Whether retrying the same call might succeed
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::RemoteTransient)
    }

    /// Classify a failed `git push` from its stderr
    pub fn from_push_failure(stderr: &str) -> Self {
        let stderr = stderr.trim();
        let lower = stderr.to_lowercase();
        if TRANSIENT_PUSH_ERRORS.iter().any(|p| lower.contains(p)) {
            Self::Transient(format!("push failed: {stderr}"))
        } else {
            Self::GitHubApi(format!("push rejected: {stderr}"))
        }
    }
}

/// Fragments of git stderr that mean the network, not the remote, failed
const TRANSIENT_PUSH_ERRORS: &[&str] = &[
    "could not resolve host",
    "connection refused",
    "connection reset",
    "connection timed out",
    "operation timed out",
    "network is unreachable",
    "temporary failure in name resolution",
    "early eof",
    "rpc failed",
    "returned error: 429",
    "returned error: 5",
];

const fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

impl From<octocrab::Error> for Error {
    fn from(err: octocrab::Error) -> Self {
        match &err {
            octocrab::Error::GitHub { source, .. } => {
                let status = source.status_code.as_u16();
                let rate_limited =
                    status == 403 && source.message.to_lowercase().contains("rate limit");
                if is_transient_status(status) || rate_limited {
                    return Self::Transient(format!(
                        "GitHub returned {status}: {}",
                        source.message
                    ));
                }
            }
            // Connection, TLS and client-stack failures never reached GitHub
            octocrab::Error::Hyper { .. } | octocrab::Error::Service { .. } => {
                return Self::Transient(err.to_string());
            }
            _ => {}
        }
        Self::GitHubApi(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let transient = err.is_timeout()
            || err.is_connect()
            || err
                .status()
                .is_some_and(|s| is_transient_status(s.as_u16()));
        if transient {
            Self::Transient(err.to_string())
        } else {
            Self::GitHubApi(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_state_errors_are_not_transient() {
        let err = Error::DuplicateCommitId {
            commit_id: "deadbeef".to_string(),
            first: "aaa".to_string(),
            second: "bbb".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::LocalState);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = Error::Timeout {
            operation: "merge PR #3".to_string(),
            after: Duration::from_secs(5),
        };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "merge PR #3 timed out after 5s");
    }

    #[test]
    fn test_push_network_failures_are_transient() {
        for stderr in [
            "ssh: Could not resolve hostname github.com: Name or service not known\nfatal: Could not read from remote repository.",
            "fatal: unable to access 'https://github.com/o/r.git/': Could not resolve host: github.com",
            "error: RPC failed; HTTP 502 curl 22 The requested URL returned error: 502",
            "fatal: unable to access 'https://github.com/o/r.git/': Failed to connect to github.com port 443: Connection refused",
        ] {
            let err = Error::from_push_failure(stderr);
            assert_eq!(err.kind(), ErrorKind::RemoteTransient, "{stderr}");
        }
    }

    #[test]
    fn test_push_rejections_are_permanent() {
        for stderr in [
            "remote: error: GH006: Protected branch update failed for refs/heads/spr/main/0a1b2c3d.",
            "remote: Permission to o/r.git denied to someone.\nfatal: unable to access 'https://github.com/o/r.git/': The requested URL returned error: 403",
        ] {
            let err = Error::from_push_failure(stderr);
            assert_eq!(err.kind(), ErrorKind::RemotePermanent, "{stderr}");
            assert!(err.to_string().contains("push rejected"));
        }
    }

    #[test]
    fn test_transient_status_codes() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(502));
        assert!(!is_transient_status(403));
        assert!(!is_transient_status(422));
    }
}
