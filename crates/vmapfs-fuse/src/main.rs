#![warn(missing_docs)]
//! vmapfs mount daemon

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vmapfs_fuse::cli::Cli;
use vmapfs_fuse::filesystem::VmapFs;
use vmapfs_fuse::mount;
use vmapfs_state::StateManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    let default_level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("vmapfs starting");
    let run = config.validate()?;
    info!(
        mount = %run.mount.display(),
        source = %run.source.display(),
        state = %run.state.display(),
        uid = run.identity.uid,
        gid = run.identity.gid,
        "configuration loaded"
    );

    let manager = StateManager::new(&run.state)
        .with_context(|| format!("opening state file {}", run.state.display()))?;
    let state = manager.load().context("loading state")?;
    let fs = VmapFs::new(&run.source, state, manager, run.identity)
        .with_context(|| format!("opening source {}", run.source.display()))?;

    let session = mount::mount(fs, &run.mount, &run.options, run.attr_ttl)?;
    info!(mountpoint = %run.mount.display(), "mounted, waiting for SIGINT or SIGTERM");

    wait_for_shutdown().await?;
    info!("shutting down");
    drop(session);
    info!("unmounted cleanly");
    Ok(())
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
