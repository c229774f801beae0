//! Spinner for quiet steps, with a plain fallback for CI logs

use super::context::UiContext;
use console::style;
use std::time::Instant;

/// Shown while fingerprinting; dropped before child output is streamed
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    started: Instant,
}

impl TaskSpinner {
    /// Start a spinner, or print a `...` line when not interactive
    pub fn start(ctx: &UiContext, message: &str) -> Self {
        let spinner = if ctx.use_fancy_output() {
            let spinner = cliclack::spinner();
            spinner.start(message);
            Some(spinner)
        } else {
            eprintln!("{} {}", style("...").dim(), message);
            None
        };

        Self {
            spinner,
            started: Instant::now(),
        }
    }

    fn elapsed(&self) -> String {
        format!("{:.1}s", self.started.elapsed().as_secs_f32())
    }

    pub fn succeed(mut self, message: &str) {
        let message = format!("{} {}", message, style(self.elapsed()).dim());
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => eprintln!("{} {}", style("[OK]").green(), message),
        }
    }

    pub fn fail(mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => eprintln!("{} {}", style("[FAIL]").red(), message),
        }
    }
}
