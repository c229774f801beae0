//! Error types for kiln
//!
//! All modules use `KilnResult<T>` as their return type. The orchestrator is
//! the only place that decides whether an error is fatal; the classification
//! helpers at the bottom of this file are what it consults.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// All errors that can occur in kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Input errors
    #[error("Missing required value: {name}")]
    MissingInput { name: String },

    #[error("Invalid registry host: {0}")]
    InvalidRegistryHost(String),

    #[error("Invalid access scope: {0}")]
    InvalidScope(String),

    #[error("Required CLI not found: {name}. {hint}")]
    CliNotFound { name: String, hint: String },

    // Authentication errors
    #[error("No registry credentials found for {host}")]
    CredentialsNotFound { host: String },

    #[error("Token exchange with {host} failed: {reason}")]
    TokenExchange { host: String, reason: String },

    #[error("GCP not authenticated. Run: gcloud auth login")]
    GcpNotAuthenticated,

    #[error("GCP credential error: {0}")]
    GcpCredential(String),

    #[error("Azure not authenticated. Run: az login")]
    AzureNotAuthenticated,

    #[error("Azure credential error: {0}")]
    AzureCredential(String),

    #[error("AWS credentials not configured. Run: aws configure")]
    AwsNotConfigured,

    // Query errors
    #[error("Registry query against {host} failed: {reason}")]
    RegistryQuery { host: String, reason: String },

    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    // Build, push and tag errors
    #[error("{command} failed:\n{output}")]
    ToolFailed { command: String, output: String },

    #[error("Failed to create repository {repository}: {output}")]
    RepositoryCreate { repository: String, output: String },

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a tool failure carrying the tool's own output
    pub fn tool_failed(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ToolFailed {
            command: command.into(),
            output: output.into(),
        }
    }

    /// Create a registry query error
    pub fn query(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RegistryQuery {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create a token exchange error
    pub fn token_exchange(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TokenExchange {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Errors raised while obtaining a registry credential
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::CredentialsNotFound { .. }
                | Self::TokenExchange { .. }
                | Self::GcpNotAuthenticated
                | Self::GcpCredential(_)
                | Self::AzureNotAuthenticated
                | Self::AzureCredential(_)
                | Self::AwsNotConfigured
                | Self::InvalidScope(_)
        )
    }

    /// Errors that only mean "could not tell whether the tag exists"
    pub fn is_query_error(&self) -> bool {
        matches!(
            self,
            Self::RegistryQuery { .. } | Self::Http { .. } | Self::Json(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::GcpNotAuthenticated => Some("Run: gcloud auth login"),
            Self::AzureNotAuthenticated => Some("Run: az login"),
            Self::AwsNotConfigured => Some("Run: aws configure"),
            Self::CredentialsNotFound { .. } => Some("Run: docker login <registry>"),
            Self::MissingInput { .. } => Some("Pass the flag or set the matching environment variable"),
            _ => None,
        }
    }
}
