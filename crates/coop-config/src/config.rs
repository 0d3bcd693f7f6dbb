//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory name under the platform config root.
const APP_DIR_NAME: &str = "coop-session";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Transport and connection settings.
    pub network: NetworkConfig,
    /// Session flow settings.
    pub session: SessionConfig,
    /// Appearance published by the local player.
    pub player: PlayerConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Which side of the session this process plays.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum,
)]
pub enum Role {
    /// Accepts connections and owns the run seed.
    #[default]
    Host,
    /// Connects to a host.
    Client,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Client => "client",
        }
    }
}

/// Transport implementation to instantiate.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum,
)]
pub enum TransportKind {
    /// UDP datagrams with a reliable-ordered channel.
    #[default]
    Udp,
    /// In-process hub, for tests and demos.
    Loopback,
}

impl TransportKind {
    /// Short lowercase name shown in status output.
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::Udp => "udp",
            TransportKind::Loopback => "loopback",
        }
    }
}

/// Transport and connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host or client. Default: `Host`.
    pub role: Role,
    /// Address clients connect to. Default: `127.0.0.1`.
    pub host_address: String,
    /// UDP port. Default: 28960.
    pub port: u16,
    /// Shared secret compared on connect. Default: `coop_session`.
    pub shared_key: String,
    /// Optional host identity hint for transports that address hosts by id.
    pub host_identity_hint: String,
    /// Retry the host connection after it drops (clients only). Default: false.
    pub auto_reconnect: bool,
    /// Transport implementation. Default: `Udp`.
    pub transport: TransportKind,
    /// Maximum connected peers on the host. Default: 8.
    pub max_peers: usize,
    /// Silence after which a connection is dropped, in ms. Default: 15000.
    pub disconnect_timeout_ms: u64,
    /// Keepalive ping interval, in ms. Default: 2000.
    pub ping_interval_ms: u64,
}

/// Session flow configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Scene treated as the front-end menu; loading it does not spawn avatars.
    pub menu_scene: String,
    /// Scene requested when the host starts a run. Default: `Level1`.
    pub start_scene: String,
    /// Pose broadcast rate in Hz. Default: 20.
    pub pose_rate_hz: f32,
    /// Session tick rate of the headless driver in Hz. Default: 60.
    pub tick_rate_hz: u32,
    /// Start the run as soon as the readiness gate opens (host only).
    pub auto_start: bool,
}

/// Appearance the local player publishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Character class name.
    pub character_class: String,
    /// Character id; negative means no character chosen yet.
    pub character_id: i32,
    /// Skin name.
    pub skin_name: String,
    /// Mesh name.
    pub mesh_name: String,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log every packet at debug level instead of trace.
    pub verbose_network: bool,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            role: Role::Host,
            host_address: "127.0.0.1".to_string(),
            port: 28960,
            shared_key: "coop_session".to_string(),
            host_identity_hint: String::new(),
            auto_reconnect: false,
            transport: TransportKind::Udp,
            max_peers: 8,
            disconnect_timeout_ms: 15_000,
            ping_interval_ms: 2_000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            menu_scene: "MainMenu".to_string(),
            start_scene: "Level1".to_string(),
            pose_rate_hz: 20.0,
            tick_rate_hz: 60,
            auto_start: true,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            character_class: "Knight".to_string(),
            character_id: 0,
            skin_name: "Default".to_string(),
            mesh_name: "Body".to_string(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            verbose_network: false,
        }
    }
}

/// Platform config directory for this application.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

// --- Load / Save / Reload ---

const CONFIG_FILE_NAME: &str = "config.ron";

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ron::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Config {
    /// Read `config.ron` from `config_dir`, writing the defaults there first
    /// when the file does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Wrote default session config to {}", path.display());
            return Ok(config);
        }
        let config = read_config(&path)?;
        log::info!(
            "Session config loaded from {} (role {})",
            path.display(),
            config.network.role.name()
        );
        Ok(config)
    }

    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        let write_err = |source| ConfigError::Write {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(config_dir).map_err(write_err)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .enumerate_arrays(false);
        let text = ron::ser::to_string_pretty(self, pretty)?;
        std::fs::write(&path, text).map_err(write_err)
    }

    /// Re-read the file; returns `Some(new_config)` if it differs from `self`.
    ///
    /// A running session never picks the new values up. Callers use this to
    /// warn that a restart is needed.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let on_disk = read_config(&config_dir.join(CONFIG_FILE_NAME))?;
        if on_disk == *self {
            return Ok(None);
        }
        log::info!("Session config changed on disk, restart to apply");
        Ok(Some(on_disk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("port: 28960"));
        assert!(ron_str.contains("role: Host"));
        assert!(ron_str.contains("menu_scene: \"MainMenu\""));
    }

    #[test]
    fn test_defaults_match_session_constants() {
        let config = Config::default();
        assert_eq!(config.network.host_address, "127.0.0.1");
        assert_eq!(config.network.max_peers, 8);
        assert_eq!(config.network.disconnect_timeout_ms, 15_000);
        assert_eq!(config.network.ping_interval_ms, 2_000);
        assert!(!config.network.auto_reconnect);
        assert_eq!(config.session.pose_rate_hz, 20.0);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(network: (role: Client, port: 4000))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.network.role, Role::Client);
        assert_eq!(config.network.port, 4000);
        assert_eq!(config.network.shared_key, "coop_session");
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.network.role = Role::Client;
        config.network.transport = TransportKind::Loopback;
        config.player.character_id = 7;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.network.port = 30000;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().network.port, 30000);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.ron"), "{{not valid}}").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_transport_names() {
        assert_eq!(TransportKind::Udp.name(), "udp");
        assert_eq!(TransportKind::Loopback.name(), "loopback");
    }
}
