//! Image builder abstraction
//!
//! The orchestrator never shells out itself. Build, pull, tag and push go
//! through an [`ImageBuilder`], so the decision logic can be exercised with a
//! recording fake while production uses the container CLI.

mod docker;

pub use docker::DockerCli;

use crate::error::KilnResult;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Max number of output lines to include in tool error messages.
const TOOL_ERROR_TAIL_LINES: usize = 50;

/// Whether external commands actually run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Execute,
    /// Print each command instead of running it
    DryRun,
}

impl ExecutionMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            Self::DryRun
        } else {
            Self::Execute
        }
    }

    pub fn is_dry_run(self) -> bool {
        self == Self::DryRun
    }
}

/// Print a command that dry-run mode skipped
pub fn announce_dry_run(command: &str) {
    println!("Command (not executed): {}", command);
}

/// Render a command line for logs and dry-run output
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|arg| quote(arg)));
    parts.join(" ")
}

fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Local image operations
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Human-readable name for display
    fn name(&self) -> &str;

    /// Build `context` with `dockerfile`, applying every reference in `tags`
    async fn build(&self, context: &Path, dockerfile: &Path, tags: &[String]) -> KilnResult<()>;

    async fn push(&self, reference: &str) -> KilnResult<()>;

    async fn pull(&self, reference: &str) -> KilnResult<()>;

    /// Add `target` as another name for the local image `source`
    async fn tag(&self, source: &str, target: &str) -> KilnResult<()>;
}

/// Extract the useful tail of tool output for error diagnostics.
pub(crate) fn tool_error_output(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(TOOL_ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Lines are read as raw bytes and decoded lossily, so non-UTF-8 tool output
/// never stops the pipes from draining. Returns all collected output lines for
/// error reporting.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Vec::new();
    };

    let mut stderr_reader = BufReader::new(stderr);
    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_buf = Vec::new();
    let mut stdout_buf = Vec::new();

    let mut all_output = Vec::new();
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            read = stderr_reader.read_until(b'\n', &mut stderr_buf), if !stderr_done => {
                stderr_done = take_line(read, &mut stderr_buf, on_output, &mut all_output);
            }
            read = stdout_reader.read_until(b'\n', &mut stdout_buf), if !stdout_done => {
                stdout_done = take_line(read, &mut stdout_buf, on_output, &mut all_output);
            }
        }
    }

    all_output
}

/// Emit the line buffered in `buf`. Returns true at end of stream.
fn take_line(
    read: std::io::Result<usize>,
    buf: &mut Vec<u8>,
    on_output: &(dyn Fn(String) + Send + Sync),
    all_output: &mut Vec<String>,
) -> bool {
    match read {
        // A select! cancellation can leave a partial last line in `buf`
        Ok(0) if buf.is_empty() => true,
        Ok(n) => {
            let line = String::from_utf8_lossy(buf)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            buf.clear();
            on_output(line.clone());
            all_output.push(line);
            n == 0
        }
        Err(e) => {
            // Keep reading: a stream left undrained would block the child
            debug!("Error reading tool output: {}", e);
            buf.clear();
            false
        }
    }
}
