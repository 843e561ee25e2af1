//! Configuration management for shjob
//!
//! Hierarchical configuration with discovery and precedence:
//! CLI > environment > file > defaults. The file is TOML with `[runner]`,
//! `[capture]`, `[shell]` and `[status]` sections.

mod cli_args;
mod discovery;
mod error;
mod model;
mod sources;
mod validation;

pub use cli_args::CliArgs;
pub use discovery::{CONFIG_DIR, CONFIG_ENV_VAR, CONFIG_FILE};
pub use error::ConfigError;
pub use model::*;
