//! `fluxsync control`: follow who controls which resource.

use tokio::sync::mpsc;
use tracing::{info, warn};

use fluxsync_core::{CONTROL_STATE, ControlUpdate, StateTracker, TrackerStatus};

use crate::cli::{ControlArgs, GlobalOpts};
use crate::error::CliError;
use crate::output::{self, Printer};

use super::{Session, ended};

pub async fn handle(args: ControlArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut session = super::connect(global)?;
    let printer = Printer::new(global.output, global.color);

    // The tracker and the printer share one subscription on the control channel.
    let tracker = StateTracker::open(&session.mux)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<ControlUpdate>();
    let printing = session.mux.register(&CONTROL_STATE, move |update: &ControlUpdate| {
        let _ = tx.send(update.clone());
    })?;

    let result = if args.once {
        snapshot(&mut session, &tracker, &printer).await
    } else {
        follow(&mut session, &tracker, &printer, &mut rx).await
    };

    printing.unsubscribe();
    tracker.close().await;
    session.close().await;
    result
}

/// Print transfers until interrupted or the connection is abandoned.
async fn follow(
    session: &mut Session,
    tracker: &StateTracker,
    printer: &Printer,
    rx: &mut mpsc::UnboundedReceiver<ControlUpdate>,
) -> Result<(), CliError> {
    let mut status = tracker.watch_status();
    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            err = session.failed() => return Err(err),
            changed = status.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                if let TrackerStatus::Disconnected { reason } = &*status.borrow_and_update() {
                    warn!(%reason, "control state may be stale until the next update");
                }
            }
            update = rx.recv() => {
                let Some(update) = update else { return Ok(()) };
                for transfer in &update.transfers {
                    if ended(output::print_line(&printer.transfer(transfer)?))? {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Wait for the first update, then print every held resource.
async fn snapshot(
    session: &mut Session,
    tracker: &StateTracker,
    printer: &Printer,
) -> Result<(), CliError> {
    let mut status = tracker.watch_status();
    tokio::select! {
        biased;

        _ = tokio::signal::ctrl_c() => return Ok(()),
        err = session.failed() => return Err(err),
        live = status.wait_for(|s| *s == TrackerStatus::Live) => {
            if live.is_err() {
                return Ok(());
            }
        }
    }

    let states = tracker.states();
    let mut resources: Vec<_> = states.values().collect();
    resources.sort_by_key(|state| state.resource);
    for state in resources {
        if ended(output::print_line(&printer.held(state)?))? {
            break;
        }
    }
    Ok(())
}
