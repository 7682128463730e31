/*
    Terminal interaction.
    Everything the library needs from a person goes through `Interaction`, so
    sessions can be driven by a script in tests.
*/

use crossterm::execute;
use crossterm::style::{Print, PrintStyledContent, Stylize};
use std::io::{self, stderr, stdin, stdout, BufRead, IsTerminal, Write};
use tracing::warn;

pub trait Interaction {
    /// One line of text, or `None` when input was closed.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
    fn confirm(&mut self, question: &str) -> io::Result<bool>;
    fn notify(&mut self, message: &str);
    fn has_permission(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct TerminalUi {
    assume_permission: bool,
}

impl TerminalUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the interactive-terminal check.
    pub fn assume_permission(mut self) -> Self {
        self.assume_permission = true;
        self
    }

    pub fn success(&self, message: &str) {
        report(execute!(
            stdout(),
            PrintStyledContent("✓ ".green().bold()),
            Print(message),
            Print("\n")
        ));
    }

    pub fn warning(&self, message: &str) {
        report(execute!(
            stderr(),
            PrintStyledContent("! ".yellow().bold()),
            Print(message),
            Print("\n")
        ));
    }

    pub fn failure(&self, message: &str) {
        report(execute!(
            stderr(),
            PrintStyledContent("✗ ".red().bold()),
            Print(message),
            Print("\n")
        ));
    }

    pub fn heading(&self, title: &str) {
        report(execute!(
            stdout(),
            PrintStyledContent(title.bold().underlined()),
            Print("\n")
        ));
    }
}

/// Logs a failed terminal write. Returns whether the write went through.
fn report(result: io::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "could not write to the terminal");
            false
        }
    }
}

impl Interaction for TerminalUi {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let mut out = stdout();
        execute!(out, PrintStyledContent(prompt.cyan()))?;
        out.flush()?;
        let mut line = String::new();
        if stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        let answer = self.read_line(&format!("{question} [y/N] "))?;
        Ok(matches!(
            answer.as_deref().map(str::trim),
            Some("y") | Some("Y") | Some("yes")
        ))
    }

    // Also called while the listener holds the terminal in raw mode.
    fn notify(&mut self, message: &str) {
        report(execute!(stdout(), Print(message), Print("\r\n")));
    }

    // Key events come from the terminal, so an interactive stdin is all we need.
    fn has_permission(&self) -> bool {
        self.assume_permission || stdin().is_terminal()
    }
}
