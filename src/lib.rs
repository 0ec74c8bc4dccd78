//! spr - stacked pull requests for git
//!
//! Every commit between the base branch and `HEAD` becomes its own pull
//! request, tracked across amends and rebases by a `commit-id:` trailer.
//!
//! The library is interface-agnostic: state is passed in explicitly, I/O is
//! async, and terminal output stays in the binary. Each command follows the
//! same split:
//!
//! 1. gather local and remote state (effectful)
//! 2. plan (pure, unit-tested)
//! 3. execute (effectful, per-operation failure reporting)

pub mod analyze;
pub mod auth;
pub mod breakup;
pub mod config;
pub mod error;
pub mod merge;
pub mod platform;
pub mod progress;
pub mod reconcile;
pub mod retry;
pub mod stack;
pub mod types;
pub mod vcs;

pub use error::{Error, ErrorKind, Result};
