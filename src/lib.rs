//! Kiln - content-addressed image builds
//!
//! Fingerprints a Docker build context, tags the image with that
//! fingerprint, and only builds when the registry does not already hold it.

pub mod builder;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod registry;
pub mod tag;
pub mod ui;

pub use error::{KilnError, KilnResult};
