//! The `run` loop: one cycle per tick until Ctrl-C or SIGTERM.

use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::device::ProgramWriter;
use crate::worker::{CycleOutcome, Worker};

pub async fn run<W: ProgramWriter>(mut worker: Worker<W>, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    tracing::info!(interval_secs = interval.as_secs(), "maxd running");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                break;
            }
            _ = ticker.tick() => {
                match worker.run_cycle(Utc::now()).await {
                    Ok(CycleOutcome::Applied { rooms }) => tracing::debug!(rooms, "cycle applied"),
                    Ok(CycleOutcome::Unchanged) => {}
                    Err(err) => tracing::error!("cycle failed, retrying next tick: {err:#}"),
                }
            }
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!("cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
