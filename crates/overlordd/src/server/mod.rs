//! Unix socket server for push channels.
//!
//! The server:
//! - Listens on a Unix socket for channel connections
//! - Spawns a ConnectionHandler for each channel
//! - Supports graceful shutdown via the context's CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   PushServer    │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐  register/unregister  ┌────────────────────┐
//! │ConnectionHandler│──────────────────────▶│ ConnectionRegistry │
//! │  (per channel)  │                       └─────────┬──────────┘
//! └───────┬─────────┘                                 │ snapshot
//!         │ publish / heartbeat                       ▼
//!         └──────────────────────────────────▶┌────────────────────┐
//!                                             │  BroadcastEngine   │
//!                                             └────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the server keeps running

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::context::Overlord;
use crate::transport::SocketTransport;

/// Unix socket server feeding the connection registry.
pub struct PushServer {
    socket_path: PathBuf,
    overlord: Overlord,
    connection_counter: AtomicU64,
}

impl PushServer {
    pub fn new(socket_path: impl Into<PathBuf>, overlord: Overlord) -> Self {
        Self {
            socket_path: socket_path.into(),
            overlord,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Creates a server on the context's configured socket path.
    pub fn from_config(overlord: Overlord) -> Self {
        let path = overlord.config().socket_path.clone();
        Self::new(path, overlord)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server until the context's cancellation token fires.
    ///
    /// A stale socket file from a previous run is replaced. The socket file
    /// is removed again on the way out.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;

        info!(socket = %self.socket_path.display(), "Push server listening");

        let cancel = self.overlord.cancel_token().clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
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

        self.cleanup().await;
        Ok(())
    }

    fn bind(&self) -> Result<UnixListener, ServerError> {
        let setup_error = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_error)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_error)?;
            }
        }

        UnixListener::bind(&self.socket_path).map_err(setup_error)
    }

    /// Spawns a handler task for a freshly accepted stream.
    fn handle_connection(&self, stream: UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let write_timeout = self.overlord.config().delivery.write_timeout();
        let transport = Arc::new(SocketTransport::new(writer, write_timeout));
        let overlord = self.overlord.clone();

        tokio::spawn(async move {
            let handler = ConnectionHandler::new(reader, transport, overlord, connection_number);
            if let Some(id) = handler.run().await {
                debug!(subscriber_id = %id, "Handler finished");
            }
        });
    }

    /// Closes every channel and removes the socket file.
    async fn cleanup(&self) {
        let closed = self.overlord.registry().clear().await;
        debug!(closed, "Closed remaining channels");

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

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}
