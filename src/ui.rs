//! Terminal output for the Slipway CLI
//!
//! A small semantic palette and high-visibility message helpers.
//! Styling is applied only when the stream is a terminal.

use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use is_terminal::IsTerminal;

use crate::error::{SlipwayError, SlipwayResult};

/// Semantic colors
pub mod colors {
    use super::Color;

    pub const SUCCESS: Color = Color::Green;
    pub const ERROR: Color = Color::Red;
    pub const WARNING: Color = Color::Yellow;
    pub const INFO: Color = Color::Cyan;
    pub const DIM: Color = Color::DarkGrey;
}

fn paint(color: Color, bold: bool, text: &str, styled: bool) -> String {
    if !styled {
        return text.to_string();
    }
    if bold {
        format!(
            "{}{}{}{}{}",
            SetAttribute(Attribute::Bold),
            SetForegroundColor(color),
            text,
            ResetColor,
            SetAttribute(Attribute::Reset)
        )
    } else {
        format!("{}{}{}", SetForegroundColor(color), text, ResetColor)
    }
}

/// Red, bold, to stderr - deploy failures must not be missed
pub fn failure(message: &str) {
    let styled = std::io::stderr().is_terminal();
    eprintln!("{}", paint(colors::ERROR, true, &format!("** {message} **"), styled));
}

/// Yellow, to stderr
pub fn warning(message: &str) {
    let styled = std::io::stderr().is_terminal();
    eprintln!("{}", paint(colors::WARNING, true, message, styled));
}

/// Green, to stdout
pub fn success(message: &str) {
    let styled = std::io::stdout().is_terminal();
    println!("{}", paint(colors::SUCCESS, false, message, styled));
}

/// Plain progress line, to stdout
pub fn info(message: &str) {
    println!("{message}");
}

/// Dimmed detail line, to stdout
pub fn detail(message: &str) {
    let styled = std::io::stdout().is_terminal();
    println!("{}", paint(colors::DIM, false, message, styled));
}

/// Confirmation seam so workflows can be exercised without a tty
pub trait Prompter {
    fn confirm(&self, prompt: &str) -> SlipwayResult<bool>;
}

/// Interactive prompter; `assume_yes` answers every prompt (--yes)
pub struct TerminalPrompter {
    pub assume_yes: bool,
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, prompt: &str) -> SlipwayResult<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| SlipwayError::Io(std::io::Error::other(e)))
    }
}

/// Fixed-answer prompter for tests, counting how often it was asked
#[cfg(test)]
pub struct ScriptedPrompter {
    pub answer: bool,
    pub asked: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedPrompter {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn times_asked(&self) -> usize {
        self.asked.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl Prompter for ScriptedPrompter {
    fn confirm(&self, _prompt: &str) -> SlipwayResult<bool> {
        self.asked
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paint_without_style_is_plain() {
        assert_eq!(paint(colors::ERROR, true, "boom", false), "boom");
    }

    #[test]
    fn assume_yes_skips_the_prompt() {
        let prompter = TerminalPrompter { assume_yes: true };
        assert!(prompter.confirm("Deploy anyway?").unwrap());
    }

    #[test]
    fn scripted_prompter_counts_questions() {
        let prompter = ScriptedPrompter::answering(false);
        assert!(!prompter.confirm("sure?").unwrap());
        assert!(!prompter.confirm("really?").unwrap());
        assert_eq!(prompter.times_asked(), 2);
    }
}
