use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use palaver_compiler::ValidationIssue;
use std::io::{self, Write};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const OK: Color = Color::Green;
    const ISSUE: Color = Color::Yellow;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Colored report output for the subcommands.
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    pub fn print_header(&self, text: &str) -> Result<()> {
        self.line(Colors::HEADER, text)
    }

    pub fn print_ok(&self, text: &str) -> Result<()> {
        self.line(Colors::OK, text)
    }

    pub fn print_info(&self, text: &str) -> Result<()> {
        self.line(Colors::DIM, text)
    }

    pub fn print_error(&self, text: &str) -> Result<()> {
        let mut stderr = io::stderr();
        execute!(
            stderr,
            SetForegroundColor(Colors::ERROR),
            Print(format!("error: {text}\n")),
            ResetColor,
        )?;
        Ok(())
    }

    pub fn print_issues(&self, issues: &[ValidationIssue]) -> Result<()> {
        let mut stdout = io::stdout();
        for issue in issues {
            execute!(
                stdout,
                SetForegroundColor(Colors::ISSUE),
                Print(format!("  [{}] ", issue.tool)),
                ResetColor,
                Print(format!("{}\n", issue.message)),
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    /// Plain output, uncolored so it can be piped.
    pub fn print_plain(&self, text: &str) -> Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{text}")?;
        stdout.flush()?;
        Ok(())
    }

    fn line(&self, color: Color, text: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, SetForegroundColor(color), Print(format!("{text}\n")), ResetColor)?;
        stdout.flush()?;
        Ok(())
    }
}
