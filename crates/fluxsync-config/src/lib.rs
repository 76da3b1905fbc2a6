//! Configuration for fluxsync.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to `fluxsync_api::ConnectionConfig` and
//! `fluxsync_core::SyncConfig`. Library crates never read files; the
//! binary resolves a profile here and hands the result in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use fluxsync_api::{ConnectionConfig, ReconnectConfig};
use fluxsync_core::SyncConfig;

const KEYRING_SERVICE: &str = "fluxsync";
const ENV_PREFIX: &str = "FLUXSYNC_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

/// Settings applied to every profile unless the profile overrides them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// How long an idle subscription lingers before closing.
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,

    /// How long to wait for the server to acknowledge a subscription.
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            linger_ms: default_linger_ms(),
            open_timeout_secs: default_open_timeout_secs(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

fn default_output() -> String {
    "plain".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_linger_ms() -> u64 {
    100
}
fn default_open_timeout_secs() -> u64 {
    10
}

/// Reconnect policy in TOML-friendly units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Omit (or set to 0) to retry forever.
    #[serde(default = "default_max_retries")]
    pub max_retries: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
#[allow(clippy::unnecessary_wraps)]
fn default_max_retries() -> Option<u32> {
    Some(10)
}

impl From<ReconnectSettings> for ReconnectConfig {
    fn from(settings: ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_retries: settings.max_retries.filter(|n| *n > 0),
        }
    }
}

/// A named server profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Streaming endpoint (e.g., "ws://localhost:9090/api/v1/frame/stream").
    pub server: String,

    pub username: Option<String>,

    /// Password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Override `defaults.linger_ms`.
    pub linger_ms: Option<u64>,

    /// Override `defaults.open_timeout_secs`.
    pub open_timeout_secs: Option<u64>,

    /// Override `defaults.reconnect`.
    pub reconnect: Option<ReconnectSettings>,
}

impl Profile {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            username: None,
            password: None,
            password_env: None,
            linger_ms: None,
            open_timeout_secs: None,
            reconnect: None,
        }
    }

    /// Copy with any plaintext password masked, for display.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        if out.password.is_some() {
            out.password = Some("********".into());
        }
        out
    }
}

impl Config {
    /// Look up a profile by name, falling back to the default profile.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());

        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile)),
            None => {
                let mut available: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
                available.sort_unstable();
                Err(ConfigError::ProfileNotFound {
                    name,
                    available: if available.is_empty() {
                        "none".into()
                    } else {
                        available.join(", ")
                    },
                })
            }
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "fluxsync", "fluxsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fluxsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load config from `path` layered over defaults and under `FLUXSYNC_`
/// environment overrides (`FLUXSYNC_DEFAULTS__LINGER_MS=250`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    Ok(figment.extract()?)
}

/// Load config from the canonical path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the username: profile first, then `FLUXSYNC_USERNAME`.
pub fn resolve_username(profile: &Profile) -> Option<String> {
    profile
        .username
        .clone()
        .or_else(|| std::env::var(format!("{ENV_PREFIX}USERNAME")).ok())
}

/// Resolve the password from the credential chain.
///
/// Order: the profile's `password_env` variable, `FLUXSYNC_PASSWORD`, the
/// system keyring (`fluxsync` / `<profile>/password`), plaintext. A server
/// without authentication needs none of them, so absence is not an error.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. Global env var
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}PASSWORD")) {
        return Some(SecretString::from(val));
    }

    // 3. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password")) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 4. Plaintext in config
    profile.password.clone().map(SecretString::from)
}

// ── Translation ─────────────────────────────────────────────────────

/// Everything needed to start synchronizing against one profile.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub connection: ConnectionConfig,
    pub sync: SyncConfig,
}

/// Build a `ConnectionConfig` from a profile, resolving credentials.
pub fn profile_to_connection_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ConnectionConfig, ConfigError> {
    let url = parse_server(&profile.server)?;

    let mut connection = ConnectionConfig::new(url);
    connection.username = resolve_username(profile);
    if connection.username.is_some() {
        connection.password = resolve_password(profile, profile_name);
    }
    connection.open_timeout =
        Duration::from_secs(profile.open_timeout_secs.unwrap_or(defaults.open_timeout_secs));
    Ok(connection)
}

/// Build a `SyncConfig` from defaults plus a profile's overrides.
pub fn profile_to_sync_config(profile: &Profile, defaults: &Defaults) -> SyncConfig {
    let reconnect = profile.reconnect.unwrap_or(defaults.reconnect);
    SyncConfig::default()
        .with_reconnect(reconnect.into())
        .with_linger(Duration::from_millis(
            profile.linger_ms.unwrap_or(defaults.linger_ms),
        ))
}

/// Resolve a named (or the default) profile into runtime configuration.
pub fn resolve_profile(cfg: &Config, name: Option<&str>) -> Result<ResolvedProfile, ConfigError> {
    let (name, profile) = cfg.profile(name)?;
    let connection = profile_to_connection_config(profile, &name, &cfg.defaults)?;
    let sync = profile_to_sync_config(profile, &cfg.defaults);
    Ok(ResolvedProfile {
        name,
        connection,
        sync,
    })
}

/// Parse a server address, accepting only WebSocket schemes.
pub fn parse_server(server: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = server.parse().map_err(|e| ConfigError::Validation {
        field: "server".into(),
        reason: format!("invalid URL '{server}': {e}"),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::Validation {
            field: "server".into(),
            reason: format!("expected a ws:// or wss:// URL, got scheme '{other}'"),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reconnect_settings_convert() {
        let cfg: ReconnectConfig = ReconnectSettings {
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
            max_retries: Some(0),
        }
        .into();
        assert_eq!(cfg.initial_delay, Duration::from_millis(250));
        assert_eq!(cfg.max_delay, Duration::from_secs(5));
        assert_eq!(cfg.max_retries, None);
    }

    #[test]
    fn parse_server_requires_websocket_scheme() {
        assert!(parse_server("ws://localhost:9090/stream").is_ok());
        assert!(parse_server("wss://core.example.com").is_ok());
        assert!(matches!(
            parse_server("http://localhost:9090"),
            Err(ConfigError::Validation { field, .. }) if field == "server"
        ));
        assert!(parse_server("not a url").is_err());
    }

    #[test]
    fn missing_profile_lists_available() {
        let mut cfg = Config::default();
        cfg.profiles.insert("lab".into(), Profile::new("ws://lab:9090"));
        cfg.profiles.insert("bench".into(), Profile::new("ws://bench:9090"));

        let err = cfg.profile(None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "profile 'default' not found (available: bench, lab)"
        );
        let (name, profile) = cfg.profile(Some("lab")).unwrap();
        assert_eq!(name, "lab");
        assert_eq!(profile.server, "ws://lab:9090");
    }

    #[test]
    fn profile_overrides_defaults() {
        let defaults = Defaults::default();
        let mut profile = Profile::new("ws://localhost:9090");
        assert_eq!(
            profile_to_sync_config(&profile, &defaults).linger,
            Duration::from_millis(100)
        );

        profile.linger_ms = Some(5);
        profile.reconnect = Some(ReconnectSettings {
            max_retries: None,
            ..ReconnectSettings::default()
        });
        let sync = profile_to_sync_config(&profile, &defaults);
        assert_eq!(sync.linger, Duration::from_millis(5));
        assert_eq!(sync.reconnect.max_retries, None);
    }

    #[test]
    fn redacted_masks_password() {
        let mut profile = Profile::new("ws://localhost:9090");
        assert_eq!(profile.redacted().password, None);
        profile.password = Some("hunter2".into());
        assert_eq!(profile.redacted().password.as_deref(), Some("********"));
    }
}
