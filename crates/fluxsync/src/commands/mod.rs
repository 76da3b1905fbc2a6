//! Command handlers and the shared connection setup they use.

pub mod config_cmd;
pub mod control;
pub mod watch;

use std::io;
use std::sync::Arc;

use tokio::sync::{broadcast, watch as tokio_watch};
use tracing::{debug, warn};

use fluxsync_api::WebSocketTransport;
use fluxsync_config::{self as config, Config, Profile, ResolvedProfile};
use fluxsync_core::{ConnectionState, Multiplexer, SyncError};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Connection setup ────────────────────────────────────────────────

/// A running multiplexer plus what error reports need to name.
pub struct Session {
    pub mux: Multiplexer,
    pub profile: String,
    pub url: String,
    state: tokio_watch::Receiver<ConnectionState>,
    errors: broadcast::Receiver<Arc<SyncError>>,
    last_error: Option<Arc<SyncError>>,
}

/// Resolve the active profile, applying `--server` / `--username` overrides.
///
/// Without a matching profile, `--server` alone is enough: the config
/// file's `[defaults]` still apply.
pub fn resolve(global: &GlobalOpts) -> Result<ResolvedProfile, CliError> {
    let cfg = config::load_config()?;
    resolve_from(&cfg, global)
}

fn resolve_from(cfg: &Config, global: &GlobalOpts) -> Result<ResolvedProfile, CliError> {
    let (name, mut profile) = match cfg.profile(global.profile.as_deref()) {
        Ok((name, profile)) => (name, profile.clone()),
        Err(err) => {
            let Some(ref server) = global.server else {
                return Err(if global.profile.is_some() || !cfg.profiles.is_empty() {
                    err.into()
                } else {
                    CliError::NoConfig {
                        path: config::config_path().display().to_string(),
                    }
                });
            };
            let name = global.profile.clone().unwrap_or_else(|| "default".into());
            (name, Profile::new(server.clone()))
        }
    };

    if let Some(ref server) = global.server {
        profile.server.clone_from(server);
    }
    if let Some(ref username) = global.username {
        profile.username = Some(username.clone());
    }

    let connection = config::profile_to_connection_config(&profile, &name, &cfg.defaults)?;
    let sync = config::profile_to_sync_config(&profile, &cfg.defaults);
    Ok(ResolvedProfile {
        name,
        connection,
        sync,
    })
}

/// Start a multiplexer over a WebSocket transport for the active profile.
pub fn connect(global: &GlobalOpts) -> Result<Session, CliError> {
    let resolved = resolve(global)?;
    let url = resolved.connection.url.to_string();
    debug!(profile = %resolved.name, url = %url, "starting multiplexer");

    let transport = Arc::new(WebSocketTransport::new(resolved.connection));
    let mux = Multiplexer::new(transport, resolved.sync);
    Ok(Session {
        state: mux.connection_state(),
        errors: mux.errors(),
        mux,
        profile: resolved.name,
        url,
        last_error: None,
    })
}

impl Session {
    /// Resolve once the multiplexer gives up reconnecting, logging errors
    /// from the side-channel meanwhile. Safe to drop and call again.
    ///
    /// The returned error names the last transport failure seen.
    pub async fn failed(&mut self) -> CliError {
        loop {
            if *self.state.borrow_and_update() == ConnectionState::Failed {
                break;
            }
            tokio::select! {
                changed = self.state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                err = self.errors.recv() => match err {
                    Ok(err) if err.is_transport() => {
                        warn!(error = %err, "transport error");
                        self.last_error = Some(err);
                    }
                    Ok(err) => warn!(error = %err, "synchronization error"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "error channel lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        let last = self.last_error.take().or_else(|| self.mux.outage());
        CliError::from_transport(last.as_deref(), &self.url, &self.profile)
    }

    /// Shut the multiplexer down, closing the shared subscription.
    pub async fn close(self) {
        self.mux.shutdown().await;
    }
}

/// Treat a closed stdout pipe as a normal end of output.
pub fn ended(result: io::Result<()>) -> Result<bool, CliError> {
    match result {
        Ok(()) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(true),
        Err(e) => Err(e.into()),
    }
}
