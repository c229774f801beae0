//! Step lines, cliclack in a terminal and bracketed labels otherwise

use super::context::UiContext;
use console::{style, StyledObject};

#[derive(Debug, Clone, Copy)]
enum Step {
    Ok,
    Warn,
    Info,
    Fail,
}

impl Step {
    fn label(self) -> StyledObject<&'static str> {
        match self {
            Self::Ok => style("[OK]").green(),
            Self::Warn => style("[WARN]").yellow(),
            Self::Info => style("[INFO]").cyan(),
            Self::Fail => style("[FAIL]").red(),
        }
    }
}

fn emit(ctx: &UiContext, step: Step, message: String) {
    if !ctx.use_fancy_output() {
        eprintln!("{} {}", step.label(), message);
        return;
    }

    // cliclack only fails when stderr is gone
    let _ = match step {
        Step::Ok => cliclack::log::success(message),
        Step::Warn => cliclack::log::warning(message),
        Step::Info => cliclack::log::info(message),
        Step::Fail => cliclack::log::error(message),
    };
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    emit(ctx, Step::Ok, message.to_string());
}

/// Success line with a dimmed detail, e.g. the resolved reference
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    emit(ctx, Step::Ok, format!("{} ({})", message, style(detail).dim()));
}

pub fn step_warn(ctx: &UiContext, message: &str) {
    emit(ctx, Step::Warn, message.to_string());
}

pub fn step_info(ctx: &UiContext, message: &str) {
    emit(ctx, Step::Info, message.to_string());
}

pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    emit(ctx, Step::Fail, format!("{}: {}", message, style(detail).red()));
}

/// Dimmed follow-up line without a label
pub fn remark(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        let _ = cliclack::log::remark(message);
    } else {
        eprintln!("  {}", style(message).dim());
    }
}
