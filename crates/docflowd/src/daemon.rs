//! Wires the daemon's components together and serves until cancelled.

use std::sync::Arc;

use docflow_core::ThemeKind;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bridge::CommandExecutionBridge;
use crate::bus::StateEventBus;
use crate::config::DaemonConfig;
use crate::runlog::spawn_run_log;
use crate::server::{DaemonServer, ServerContext, ServerError};
use crate::state::{
    spawn_state_refresher, watch::REFRESH_DEBOUNCE, ProjectSnapshot, ProjectStateManager,
    WatchError,
};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Runs the daemon for `config` until `cancel` fires.
///
/// `theme` carries the host theme; every change is re-emitted on the bus
/// as THEME_CHANGED.
pub async fn serve(
    config: DaemonConfig,
    theme: watch::Receiver<ThemeKind>,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    let root = config.resolved_root();
    let bus = StateEventBus::new();
    let theme_task = bus.attach_theme_signal(theme.clone());

    let manager = ProjectStateManager::new(&root).with_poll_interval(config.init.poll_interval());
    let snapshot = Arc::new(ProjectSnapshot::new(manager));
    let refresher = spawn_state_refresher(Arc::clone(&snapshot), bus.clone(), REFRESH_DEBOUNCE)?;

    let run_log = spawn_run_log(bus.clone());
    let bridge = Arc::new(CommandExecutionBridge::new(
        config.bridge_config(),
        config.launcher(),
        config.completion_detector(),
        run_log.clone(),
        bus.clone(),
    ));

    info!(
        root = %root.display(),
        launcher = ?config.bridge.launcher,
        completion = ?config.bridge.completion,
        "Daemon components started"
    );

    let context = ServerContext {
        bus,
        snapshot,
        run_log,
        bridge: Arc::clone(&bridge),
        theme,
        init_timeout: config.init.timeout(),
    };
    let server = DaemonServer::new(&config.socket_path, context, cancel.clone());
    let result = server.run().await;

    // Commands still running were cancelled through child tokens.
    bridge.shutdown().await;
    refresher.stop();
    theme_task.abort();

    result.map_err(DaemonError::from)
}
