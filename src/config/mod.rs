//! Configuration loading and engine assembly.
//!
//! Global settings live in a YAML file (`recon.yaml`); command-line flags
//! override them.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::EngineBuilder;
pub use error::ConfigError;
pub use types::{ReconConfig, StorageConfig, ToolPaths};
pub use yaml::YamlLoader;
