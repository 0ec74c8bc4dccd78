//! Terminal styling shared by all commands

use indicatif::ProgressStyle;
use owo_colors::{OwoColorize, Style};
use std::fmt::Display;

/// Success marker
pub const CHECK: &str = "✓";

/// Semantic color helpers so commands don't pick raw colors
pub trait Stylize: Display + Sized {
    /// Headings and important names
    fn emphasis(&self) -> String {
        self.paint(Style::new().bold())
    }

    /// Numbers, branch names, PR references
    fn accent(&self) -> String {
        self.paint(Style::new().cyan())
    }

    /// Secondary information
    fn muted(&self) -> String {
        self.paint(Style::new().dimmed())
    }

    /// Completed work
    fn success(&self) -> String {
        self.paint(Style::new().green())
    }

    /// Something needs attention
    fn warn(&self) -> String {
        self.paint(Style::new().yellow())
    }

    /// Failure
    fn error(&self) -> String {
        self.paint(Style::new().red().bold())
    }

    /// Render with an explicit style
    fn paint(&self, style: Style) -> String {
        OwoColorize::style(self, style).to_string()
    }
}

impl<T: Display> Stylize for T {}

/// Green check mark
pub fn check() -> String {
    CHECK.success()
}

/// Bullet arrow for plan listings
pub fn arrow() -> String {
    "→".muted()
}

/// Spinner used for network and probing phases
pub fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}
