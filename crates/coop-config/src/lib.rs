//! Configuration for the co-op session coordinator.
//!
//! Settings persist to disk as `config.ron` and can be overridden from the
//! command line. The session reads the configuration once at startup; it is
//! not re-applied to a running session.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, NetworkConfig, PlayerConfig, Role, SessionConfig, TransportKind,
    default_config_dir,
};
pub use error::ConfigError;
