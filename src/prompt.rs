//! Operator confirmation.
//!
//! Decisions the tool must not take on its own (for example, building with
//! mismatched version sources) go through [`Confirm`], so the library never
//! talks to the terminal directly.

use dialoguer::theme::ColorfulTheme;
use log::warn;

use crate::error::Result;

/// Asks the operator a yes/no question.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Interactive prompt on the controlling terminal.
///
/// Without a terminal nobody can answer, so the question is declined.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        if !console::Term::stderr().is_term() {
            warn!("no terminal to confirm: {}", prompt);
            return Ok(false);
        }
        let answer = dialoguer::Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        Ok(answer)
    }
}

/// A fixed answer, for scripted runs and tests.
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(self.0)
    }
}
