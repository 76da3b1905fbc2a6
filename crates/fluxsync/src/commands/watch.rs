//! `fluxsync watch`: print every sample written to a set of channels.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use fluxsync_core::{Channel, RawJson, SyncError, observer};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output::{self, Printer};

use super::{Session, ended};

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut session = super::connect(global)?;
    let printer = Printer::new(global.output, global.color);

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Value)>();
    let mut subscriptions = Vec::with_capacity(args.channels.len());
    for name in dedup(args.channels) {
        let channel = Channel::named(name.clone(), RawJson);
        let tx = tx.clone();
        let label = name.clone();
        let sub = session.mux.register(
            &channel,
            observer(
                move |value: &Value| {
                    // The receiver only goes away once the command is exiting.
                    let _ = tx.send((label.clone(), value.clone()));
                },
                move |err: &SyncError| {
                    if !err.is_terminal() {
                        info!(channel = %name, error = %err, "subscription interrupted, reconnecting");
                    }
                },
            ),
        )?;
        subscriptions.push(sub);
    }
    drop(tx);

    let result = pump(&mut session, &printer, &mut rx, args.count).await;
    drop(subscriptions);
    session.close().await;
    result
}

async fn pump(
    session: &mut Session,
    printer: &Printer,
    rx: &mut mpsc::UnboundedReceiver<(String, Value)>,
    count: Option<u64>,
) -> Result<(), CliError> {
    let mut printed = 0u64;
    if count == Some(0) {
        return Ok(());
    }
    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            err = session.failed() => return Err(err),
            sample = rx.recv() => {
                let Some((channel, value)) = sample else {
                    warn!("all subscriptions ended");
                    return Ok(());
                };
                let line = printer.sample(&channel, &value)?;
                if ended(output::print_line(&line))? {
                    return Ok(());
                }
                printed += 1;
                if count.is_some_and(|n| printed >= n) {
                    return Ok(());
                }
            }
        }
    }
}

/// Keep the first occurrence of each channel name.
fn dedup(channels: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    channels
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
