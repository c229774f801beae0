//! Step messages for the CLI
//!
//! Uses `cliclack` in interactive terminals and falls back to plain
//! `[OK]`/`[WARN]` lines in CI. Everything here writes to stderr so that
//! stdout carries only the resolved image reference.

mod context;
mod output;
mod progress;
mod theme;

pub use context::UiContext;
pub use output::{remark, step_error_detail, step_info, step_ok, step_ok_detail, step_warn};
pub use progress::TaskSpinner;
pub use theme::{init_theme, KilnTheme};
