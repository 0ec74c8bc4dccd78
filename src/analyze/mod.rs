//! Dependency analyzer
//!
//! Decides which commits of a stack could land on their own and which need
//! earlier commits, by trial cherry-picks in a scratch checkout rather than
//! by inspecting diffs.

mod graph;
mod probe;
mod report;

pub use graph::{DependencyGraph, Forest, ForestNode};
pub use probe::{AnalyzeOptions, Analysis, CommitAnalysis, Dependency, analyze_stack};
pub use report::render_report;

pub(crate) use probe::{acquire_scratch, release_scratch};
