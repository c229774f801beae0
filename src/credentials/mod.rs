//! Local credential material for registry authentication
//!
//! Nothing here talks to a registry. These providers only collect what the
//! registry clients need to start a token exchange: OAuth2 access tokens from
//! gcloud/oauth2l, ACR refresh tokens, docker `config.json` entries, and a
//! check that the AWS CLI is usable for ECR.

pub mod aws;
pub mod azure;
pub mod docker_config;
pub mod gcp;

pub use aws::AwsCredentials;
pub use azure::AzureCredentials;
pub use docker_config::{DockerAuth, DockerConfigStore};
pub use gcp::GcpCredentials;

use crate::error::{KilnError, KilnResult};
use std::io::ErrorKind;
use std::process::{Output, Stdio};
use tokio::process::Command;

/// Run a credential CLI to completion, capturing its output.
///
/// A missing binary becomes `CliNotFound` with `install_hint`.
pub(crate) async fn cli_output(
    program: &str,
    args: &[&str],
    install_hint: &str,
) -> KilnResult<Output> {
    let display = format!("{} {}", program, args.join(" "));

    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                KilnError::CliNotFound {
                    name: program.to_string(),
                    hint: install_hint.to_string(),
                }
            } else {
                KilnError::command_failed(display, e)
            }
        })
}
