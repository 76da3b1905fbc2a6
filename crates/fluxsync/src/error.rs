//! CLI error types with miette diagnostics.
//!
//! Maps configuration and synchronization failures into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use fluxsync_config::ConfigError;
use fluxsync_core::SyncError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not stay connected to {url}")]
    #[diagnostic(
        code(fluxsync::connection_failed),
        help(
            "Check that the server is running and reachable.\n\
             Last error: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed for profile '{profile}'")]
    #[diagnostic(
        code(fluxsync::auth_failed),
        help(
            "Verify the username and password.\n\
             Set FLUXSYNC_PASSWORD or store the password in the system keyring\n\
             under service 'fluxsync', entry '{profile}/password'."
        )
    )]
    AuthFailed { profile: String },

    // ── Synchronization ──────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(fluxsync::sync))]
    Sync(SyncError),

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(fluxsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(fluxsync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Or pass --server to connect without a profile."
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No configuration file and no --server given")]
    #[diagnostic(
        code(fluxsync::no_config),
        help(
            "Pass --server ws://host:port/path, or create a profile.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("{0}")]
    #[diagnostic(code(fluxsync::config))]
    Config(String),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(fluxsync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Sync(err) if err.is_transport() => exit_code::CONNECTION,
            _ => exit_code::GENERAL,
        }
    }

    /// Classify a terminal transport failure for `profile` at `url`.
    pub fn from_transport(last: Option<&SyncError>, url: &str, profile: &str) -> Self {
        match last {
            Some(err) if err.is_auth_failure() => Self::AuthFailed {
                profile: profile.to_owned(),
            },
            Some(err) => Self::ConnectionFailed {
                url: url.to_owned(),
                reason: err.to_string(),
            },
            None => Self::ConnectionFailed {
                url: url.to_owned(),
                reason: "gave up reconnecting".into(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::ProfileNotFound { name, available } => {
                Self::ProfileNotFound { name, available }
            }
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<SyncError> for CliError {
    fn from(err: SyncError) -> Self {
        Self::Sync(err)
    }
}
