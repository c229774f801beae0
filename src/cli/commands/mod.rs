//! CLI command implementations

pub mod config;
pub mod image;

pub use config::execute as config;
pub use image::execute as image;
