//! Unix socket server for the docflow daemon.
//!
//! The server:
//! - Listens on a Unix socket for rendering surfaces
//! - Spawns a ConnectionHandler for each client
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   DaemonServer  │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐  requests  ┌──────────────────────────────────┐
//! │ConnectionHandler│───────────▶│ bridge / run log / snapshot / bus│
//! │   (per client)  │◀───────────│      StateEventBus::subscribe    │
//! └─────────────────┘   events   └──────────────────────────────────┘
//!         │ newline-delimited JSON notifications
//!         ▼
//!   rendering surface
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the listener keeps running

mod connection;

pub use connection::{
    init_progress_notification, route_event, ConnectionError, ConnectionHandler, EventRoute,
    BAD_REQUEST, INCOMPATIBLE_VERSION, INIT_FAILED, NO_RUNNING_COMMAND,
};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docflow_core::ThemeKind;
use docflow_protocol::Notification;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::CommandExecutionBridge;
use crate::bus::StateEventBus;
use crate::runlog::RunLogHandle;
use crate::state::ProjectSnapshot;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/docflow.sock";

/// Maximum number of concurrent clients
pub const MAX_CLIENTS: usize = 10;

/// Everything a connection needs to serve requests. Cheap to clone.
#[derive(Clone)]
pub struct ServerContext {
    pub bus: StateEventBus,
    pub snapshot: Arc<ProjectSnapshot>,
    pub run_log: RunLogHandle,
    pub bridge: Arc<CommandExecutionBridge>,
    /// Current host theme, sent to each client on connect.
    pub theme: watch::Receiver<ThemeKind>,
    /// How long an init command's progress is watched.
    pub init_timeout: Duration,
}

/// Unix socket server for the docflow daemon.
pub struct DaemonServer {
    socket_path: PathBuf,
    context: ServerContext,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
    active_connections: Arc<AtomicUsize>,
}

impl DaemonServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        context: ServerContext,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            context,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Binds the socket and serves clients until the cancellation token
    /// fires.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        info!(socket = %self.socket_path.display(), "Daemon server listening");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    fn bind(&self) -> Result<UnixListener, ServerError> {
        let setup_err = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        // A stale socket from a crashed daemon blocks the bind.
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_err)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_err)?;
            }
        }
        UnixListener::bind(&self.socket_path).map_err(setup_err)
    }

    fn handle_connection(&self, stream: tokio::net::UnixStream, connection_number: u64) {
        let active = Arc::clone(&self.active_connections);
        if active.fetch_add(1, Ordering::SeqCst) >= MAX_CLIENTS {
            active.fetch_sub(1, Ordering::SeqCst);
            warn!(connection = connection_number, max = MAX_CLIENTS, "Too many clients, rejecting");
            tokio::spawn(reject(stream));
            return;
        }

        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.context.clone(),
            self.cancel_token.clone(),
            connection_number,
        );
        tokio::spawn(async move {
            handler.run().await;
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }
        info!("Server cleanup complete");
    }
}

/// Tells an over-limit client why it is being dropped.
async fn reject(mut stream: tokio::net::UnixStream) {
    let msg = Notification::error(
        ServerError::TooManyClients { max: MAX_CLIENTS }.to_string(),
    );
    if let Ok(json) = serde_json::to_string(&msg) {
        let _ = stream.write_all(json.as_bytes()).await;
        let _ = stream.write_all(b"\n").await;
    }
    debug!("Rejected client disconnected");
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Too many clients (max: {max})")]
    TooManyClients { max: usize },
}
