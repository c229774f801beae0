//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Kiln - content-addressed image builds
///
/// Tags container images with a fingerprint of their build inputs and
/// skips the build when the registry already has that fingerprint.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format (defaults to general.log_format)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build, reuse or resolve content-addressed images
    Image(ImageArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Parse the `general.log_format` config value
    pub fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Arguments for the image command
#[derive(Parser, Debug)]
pub struct ImageArgs {
    #[command(subcommand)]
    pub action: ImageAction,
}

#[derive(Subcommand, Debug)]
pub enum ImageAction {
    /// Build and push the image unless the registry already has it
    Build(ImageBuildArgs),

    /// Print the image reference a build would produce
    Url(ImageUrlArgs),
}

/// Where the image lives and what it is built from
#[derive(Args, Debug, Clone, Default)]
pub struct ImageTargetArgs {
    /// Registry host, e.g. gcr.io [env: IMAGE_REPO_HOST, DOCKER_REPO_HOST]
    #[arg(long)]
    pub image_repo_host: Option<String>,

    /// Project (first path segment) on the registry [env: IMAGE_REPO_PROJECT, DOCKER_REPO_PROJ]
    #[arg(long)]
    pub image_repo_project: Option<String>,

    /// Namespace, usually the project name [env: NAMESPACE]
    #[arg(long)]
    pub namespace: Option<String>,

    /// Image identifier, e.g. php or nginx [env: IMAGE_IDENTIFIER]
    #[arg(long)]
    pub image_identifier: Option<String>,

    /// Use this tag instead of the fingerprint [env: IMAGE_TAG]
    #[arg(long)]
    pub image_tag: Option<String>,

    /// Prefix for fingerprint tags (`prefix-<fingerprint>`)
    #[arg(long)]
    pub image_tag_prefix: Option<String>,

    /// Dockerfile path [env: DOCKERFILE]
    #[arg(long)]
    pub dockerfile: Option<PathBuf>,

    /// Build context directory; empty means an empty context [env: BUILD_PATH]
    #[arg(long)]
    pub build_path: Option<PathBuf>,

    /// Fall back to environment variables for unset flags (defaults to general.use_env)
    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub use_env: Option<bool>,
}

/// Arguments for `image build`
#[derive(Parser, Debug)]
pub struct ImageBuildArgs {
    #[command(flatten)]
    pub target: ImageTargetArgs,

    /// Branch name; adds a `branch--<name>` tag [env: BRANCHNAME]
    #[arg(long)]
    pub branchname: Option<String>,

    /// Reuse an existing image with the same fingerprint (defaults to build.reuse)
    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub image_reuse: Option<bool>,

    /// Print container and registry commands instead of running them
    #[arg(long, visible_alias = "dry-run")]
    pub debug: bool,
}

/// Arguments for `image url`
#[derive(Parser, Debug)]
pub struct ImageUrlArgs {
    #[command(flatten)]
    pub target: ImageTargetArgs,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Print a single value
    Get {
        /// Configuration key (e.g., build.container_cli)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., network.proxy)
        key: String,

        /// Value to set
        value: String,
    },
}
