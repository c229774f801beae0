//! Container CLI builder (docker or podman)

use super::{
    announce_dry_run, display_command, stream_child_output, tool_error_output, ExecutionMode,
    ImageBuilder,
};
use crate::error::{KilnError, KilnResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Image builder that drives a docker-compatible CLI
pub struct DockerCli {
    program: String,
    mode: ExecutionMode,
}

impl DockerCli {
    pub fn new(program: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            program: program.into(),
            mode,
        }
    }

    /// Run one CLI invocation, streaming its output to stdout
    async fn run(&self, args: Vec<String>) -> KilnResult<()> {
        let command_line = display_command(&self.program, &args);

        if self.mode.is_dry_run() {
            announce_dry_run(&command_line);
            return Ok(());
        }

        info!("Running: {}", command_line);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    KilnError::CliNotFound {
                        name: self.program.clone(),
                        hint: "Install docker or set build.container_cli".to_string(),
                    }
                } else {
                    KilnError::command_failed(command_line.clone(), e)
                }
            })?;

        let all_output = stream_child_output(&mut child, &|line| println!("{}", line)).await;

        let status = child
            .wait()
            .await
            .map_err(|e| KilnError::command_failed(command_line.clone(), e))?;

        if !status.success() {
            return Err(KilnError::tool_failed(command_line, tool_error_output(&all_output)));
        }

        Ok(())
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    fn name(&self) -> &str {
        &self.program
    }

    async fn build(&self, context: &Path, dockerfile: &Path, tags: &[String]) -> KilnResult<()> {
        let mut args = vec!["build".to_string()];
        for tag in tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }
        args.push("-f".to_string());
        args.push(dockerfile.display().to_string());
        args.push(context.display().to_string());

        self.run(args).await
    }

    async fn push(&self, reference: &str) -> KilnResult<()> {
        self.run(vec!["push".to_string(), reference.to_string()]).await
    }

    async fn pull(&self, reference: &str) -> KilnResult<()> {
        self.run(vec!["pull".to_string(), reference.to_string()]).await
    }

    async fn tag(&self, source: &str, target: &str) -> KilnResult<()> {
        self.run(vec!["tag".to_string(), source.to_string(), target.to_string()])
            .await
    }
}
