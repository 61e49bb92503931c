//! Terminal status messages.
//!
//! Everything here writes to stderr; stdout belongs to the child process.

use console::style;

/// Prints an error message.
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Prints a warning message.
pub fn warning(message: &str) {
    eprintln!("{} {}", style("⚠").yellow().bold(), message);
}

/// Reports how a one-shot command finished.
pub fn command_finished(command: &str, code: i32) {
    if code == 0 {
        return;
    }
    error(&format!(
        "{} exited with code {}",
        style(command).bold(),
        code
    ));
}
