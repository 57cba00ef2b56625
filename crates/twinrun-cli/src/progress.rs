//! Operator-facing progress lines.

use std::io::Write;

use owo_colors::OwoColorize;

use twinrun_flow::progress::ProgressSink;

/// Prints phase messages and in-place counters.
///
/// Counters are redrawn on one line with a carriage return and finished with
/// a newline once they reach their total.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleProgress {
    quiet: bool,
}

impl ConsoleProgress {
    /// Progress printed to stdout.
    #[must_use]
    pub const fn new() -> Self {
        Self { quiet: false }
    }

    /// Progress suppressed, for machine-readable output.
    #[must_use]
    pub const fn quiet() -> Self {
        Self { quiet: true }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn phase(&self, message: &str) {
        if !self.quiet {
            println!("{}", message.bold());
        }
    }

    fn advance(&self, done: usize, total: usize, unit: &str) {
        if self.quiet {
            return;
        }
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\r{done}/{total} {unit}");
        if done >= total {
            let _ = writeln!(out);
        }
        let _ = out.flush();
    }
}
