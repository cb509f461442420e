//! Bridge daemon: connects the chat workspace to assistant sessions in tmux.
//!
//! Takes no arguments; configuration comes from the JSON config file. Exit
//! code 0 on clean shutdown, 1 on startup failure (missing config, another
//! live bridge on the same token).

mod bootstrap_helpers;
mod instance_lock;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use tether_core::config::{BridgeConfig, Timing};
use tether_core::instance_digest;
use tether_muxer::TmuxMuxer;
use tether_registry::RegistryStore;
use tether_runtime::{BridgeRuntime, BridgeRuntimeConfig};

use crate::bootstrap_helpers::init_tracing;
use crate::instance_lock::InstanceLock;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

fn main() {
    init_tracing();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start async runtime: {error}");
            std::process::exit(1);
        }
    };
    if let Err(error) = runtime.block_on(run()) {
        error!(%error, "bridge exited with error");
        eprintln!("tether-bridge: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config_path = BridgeConfig::default_path()?;
    let config = BridgeConfig::load(&config_path)
        .with_context(|| format!("cannot start without {}", config_path.display()))?;

    let digest = instance_digest(&config.bot_token);
    let lock = InstanceLock::acquire(&digest)?;
    info!(lock = %lock.path().display(), "instance lock acquired");

    let registry = RegistryStore::for_instance(&digest);
    let muxer = Arc::new(TmuxMuxer::default());
    let runtime = BridgeRuntime::new(
        BridgeRuntimeConfig {
            config,
            timing: Timing::default(),
            registry,
            reconnect_delay: RECONNECT_DELAY,
        },
        muxer,
    )
    .await?;

    runtime.spawn_sweeps();

    let outcome = tokio::select! {
        result = runtime.run() => result,
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    lock.release();
    outcome
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}
