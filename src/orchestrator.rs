//! Daemon lifecycle.
//!
//! Wires the sampler, the policy engine and the console together:
//!
//! ```text
//! ConnectionSampler ──SamplerEvent──► PolicyEngine::run ──┐
//!                                                          ├─EngineToUi─► console
//!          console ──UiToEngine────► PolicyEngine::serve ──┘
//! ```
//!
//! Shutdown is ordered: stop input, stop the sampler (bounded join), let the
//! engine loops drain, then close the audit session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::control::channel::DEFAULT_CHANNEL_SIZE;
use crate::control::{UiChannels, create_channel_pair, render, run_console};
use crate::monitor::SamplerHandle;

/// Run the daemon until Ctrl-C, or until the console closes.
///
/// The caller holds the policy store lock for as long as this runs.
pub async fn run_daemon(ctx: &AppContext, console: bool) -> Result<()> {
    let (engine_side, ui_side) = create_channel_pair();
    let engine = Arc::new(
        ctx.engine()
            .context("Failed to start rule store worker")?
            .with_ui(engine_side.tx),
    );

    if ctx.is_dry_run() {
        warn!("Dry run: rules are kept in memory and decisions are not saved");
    }
    ctx.audit_session_start();

    // The UI must be reading before reconciliation starts producing events.
    let mut ui_task = spawn_ui(ui_side, console);

    let monitor = &ctx.config().monitor;
    let sampler = ctx.sampler();
    let evaluated = engine
        .reconcile_startup(Arc::clone(&sampler), monitor.tick_timeout())
        .await;
    info!("Reconciled {} pre-existing applications", evaluated);

    let (events_tx, events_rx) = mpsc::channel(DEFAULT_CHANNEL_SIZE);
    let sampler = SamplerHandle::start(
        sampler,
        engine.interval_receiver(),
        monitor.tick_timeout(),
        events_tx,
    );
    let pump = tokio::spawn(Arc::clone(&engine).run(events_rx));
    let actor = tokio::spawn(Arc::clone(&engine).serve(engine_side.rx));
    info!("Monitoring connections");

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Interrupted, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        },
        _ = &mut ui_task => info!("Console closed, shutting down"),
    }
    ui_task.abort();

    let stop_timeout = monitor.stop_timeout();
    sampler.stop(stop_timeout).await;
    join("engine event pump", pump, stop_timeout).await;
    join("engine command actor", actor, stop_timeout).await;

    ctx.audit_session_end();
    Ok(())
}

fn spawn_ui(ui: UiChannels, console: bool) -> JoinHandle<()> {
    if console {
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = run_console(ui, stdin, tokio::io::stdout()).await {
                error!("Console error: {}", e);
            }
        })
    } else {
        tokio::spawn(log_events(ui))
    }
}

/// Headless sink: engine events go to the log instead of a terminal.
async fn log_events(mut ui: UiChannels) {
    while let Some(event) = ui.recv().await {
        info!("{}", render(&event).trim_end());
    }
}

async fn join(name: &str, handle: JoinHandle<()>, limit: Duration) {
    match timeout(limit, handle).await {
        Ok(Ok(())) => debug!("{} stopped", name),
        Ok(Err(e)) => error!("{} panicked: {}", name, e),
        Err(_) => warn!("{} did not stop within {:?}", name, limit),
    }
}
