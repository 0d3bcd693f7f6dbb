//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, Role, TransportKind};

/// Co-op session command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "coop-host", about = "Headless co-op session coordinator")]
pub struct CliArgs {
    /// Run as host or client.
    #[arg(long, value_enum)]
    pub role: Option<Role>,

    /// Host address to connect to (clients).
    #[arg(long)]
    pub host: Option<String>,

    /// UDP port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Shared connection key.
    #[arg(long)]
    pub key: Option<String>,

    /// Transport implementation.
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Retry the host connection after it drops.
    #[arg(long)]
    pub auto_reconnect: Option<bool>,

    /// Character id to publish.
    #[arg(long)]
    pub character_id: Option<i32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(role) = args.role {
            self.network.role = role;
        }
        if let Some(ref host) = args.host {
            self.network.host_address = host.clone();
        }
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(ref key) = args.key {
            self.network.shared_key = key.clone();
        }
        if let Some(transport) = args.transport {
            self.network.transport = transport;
        }
        if let Some(reconnect) = args.auto_reconnect {
            self.network.auto_reconnect = reconnect;
        }
        if let Some(id) = args.character_id {
            self.player.character_id = id;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            role: Some(Role::Client),
            host: Some("192.168.1.1".to_string()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.role, Role::Client);
        assert_eq!(config.network.host_address, "192.168.1.1");
        // Non-overridden fields retain defaults
        assert_eq!(config.network.port, 28960);
        assert_eq!(config.network.transport, TransportKind::Udp);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_value_enums() {
        let args = CliArgs::parse_from([
            "coop-host",
            "--role",
            "client",
            "--transport",
            "loopback",
            "--port",
            "4000",
        ]);
        assert_eq!(args.role, Some(Role::Client));
        assert_eq!(args.transport, Some(TransportKind::Loopback));
        assert_eq!(args.port, Some(4000));
    }
}
