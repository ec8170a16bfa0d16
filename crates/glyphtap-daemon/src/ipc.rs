//! IPC server for daemon communication
//!
//! Provides a Unix domain socket for the CLI to query status and flip the
//! daemon's switches. Each connection carries one JSON line each way. Requests
//! are handed to the daemon loop, which owns all state, and answered from
//! there.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use glyphtap_config::ipc::{IpcRequest, IpcResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A request waiting for the daemon loop's answer.
#[derive(Debug)]
pub struct ControlRequest {
    pub request: IpcRequest,
    pub reply: oneshot::Sender<IpcResponse>,
}

// ============================================================================
// IPC Server
// ============================================================================

/// IPC server bound to a Unix domain socket.
///
/// The socket file is automatically removed when the server is dropped.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind the socket, replacing a stale socket file left by a previous run.
    pub fn bind(socket_path: impl Into<PathBuf>) -> Result<Self> {
        let socket_path = socket_path.into();

        if socket_path.exists() {
            tracing::debug!("Removing stale socket file: {}", socket_path.display());
            std::fs::remove_file(&socket_path).with_context(|| {
                format!(
                    "Failed to remove stale socket file: {}",
                    socket_path.display()
                )
            })?;
        }

        let listener = UnixListener::bind(&socket_path).with_context(|| {
            format!("Failed to create IPC socket at {}", socket_path.display())
        })?;

        tracing::info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept IPC connection")?;

        tracing::debug!("Accepted IPC connection");

        Ok(stream)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until the daemon loop goes away, forwarding each
    /// request to it.
    pub async fn serve(self, requests: mpsc::Sender<ControlRequest>) {
        loop {
            let stream = match self.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("{:#}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            if requests.is_closed() {
                break;
            }

            let requests = requests.clone();
            tokio::spawn(async move {
                let result =
                    handle_ipc_connection(stream, |request| forward(requests, request)).await;
                if let Err(e) = result {
                    tracing::warn!("IPC connection failed: {:#}", e);
                }
            });
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove IPC socket file on shutdown: {}", e);
            } else {
                tracing::debug!("Removed IPC socket file: {}", self.socket_path.display());
            }
        }
    }
}

async fn forward(requests: mpsc::Sender<ControlRequest>, request: IpcRequest) -> IpcResponse {
    let (reply, answer) = oneshot::channel();
    if requests.send(ControlRequest { request, reply }).await.is_err() {
        return IpcResponse::Error {
            message: "Daemon is shutting down".to_string(),
        };
    }
    answer.await.unwrap_or_else(|_| IpcResponse::Error {
        message: "Request dropped".to_string(),
    })
}

// ============================================================================
// IPC Connection Handler
// ============================================================================

/// Read one JSON request line, answer it with `handler`, write one JSON line.
///
/// Malformed requests get an error response without reaching the handler.
pub async fn handle_ipc_connection<F, Fut>(mut stream: UnixStream, handler: F) -> Result<()>
where
    F: FnOnce(IpcRequest) -> Fut,
    Fut: Future<Output = IpcResponse>,
{
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC request")?;

    if bytes_read == 0 {
        tracing::debug!("IPC connection closed without data");
        return Ok(());
    }

    let line = line.trim();
    tracing::debug!("Received IPC request: {}", line);

    let response = match serde_json::from_str::<IpcRequest>(line) {
        Ok(request) => handler(request).await,
        Err(e) => {
            tracing::warn!("Failed to parse IPC request: {}", e);
            IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            }
        }
    };

    let response_json =
        serde_json::to_string(&response).context("Failed to serialize IPC response")?;

    tracing::debug!("Sending IPC response: {}", response_json);

    writer
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write IPC response")?;
    writer
        .write_all(b"\n")
        .await
        .context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush IPC response")?;

    Ok(())
}
