//! # Output Configuration
//!
//! Controls how the CLI talks to the operator: colour and emoji markers,
//! and the spinner shown while a container boots.
//!
//! Preferences are honoured in this order:
//! - `--color=never|always|auto`
//! - `NO_COLOR` (any value, see https://no-color.org/)
//! - `CLICOLOR=0` / `CLICOLOR_FORCE=1`
//! - `TERM=dumb`
//! - whether stdout is a terminal
//!
//! ```rust,ignore
//! use stagehand::output::{emoji, OutputConfig};
//!
//! let out = OutputConfig::from_env_and_flag("auto");
//! println!("{} Provisioning...", emoji(&out, "📦", "[ENV]"));
//! ```

use std::env;
use std::time::Duration;

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Build from the `--color` flag value ("always", "never" or "auto")
    /// and the environment.
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    fn detect_color_support() -> bool {
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }

        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }

        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }

        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }

        Term::stdout().features().colors_supported()
    }

    /// Spinner for waiting on a container; hidden unless stderr is a
    /// terminal.
    pub fn spinner(&self) -> ProgressBar {
        if !Term::stderr().is_term() {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        let template = if self.use_color {
            "{spinner:.cyan} {msg}"
        } else {
            "{spinner} {msg}"
        };
        if let Ok(spinner_style) = ProgressStyle::with_template(template) {
            spinner.set_style(spinner_style);
        }
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    }

    /// A section heading such as `devtest (master)`.
    pub fn heading(&self, text: &str) -> String {
        if self.use_color {
            style(text).bold().to_string()
        } else {
            text.to_string()
        }
    }

    #[cfg(test)]
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    #[cfg(test)]
    pub fn without_color() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// The emoji when colors are enabled, otherwise the plain marker.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}
