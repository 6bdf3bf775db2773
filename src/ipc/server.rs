// IPC Server - Listens for client connections and handles requests

use crate::error::{CorralError, Result};
use crate::ipc::{Command, Request, Response, ResponseData};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Requests larger than this are rejected
const MAX_REQUEST_SIZE: u64 = 1024 * 1024;

/// IPC server for handling client connections
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

impl IpcServer {
    /// Bind the Unix socket, replacing a stale socket file
    pub fn bind<P: AsRef<Path>>(path: P) -> Result<Self> {
        let socket_path = path.as_ref().to_path_buf();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(|e| {
                CorralError::IpcError(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| CorralError::IpcError(format!("Failed to bind to socket: {}", e)))?;

        // Owner only
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&socket_path, permissions).map_err(|e| {
                CorralError::IpcError(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        tracing::info!("IPC server listening on {}", socket_path.display());
        Ok(Self {
            socket_path,
            listener,
        })
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Each connection carries one request and one response and is handled
    /// in its own tracked task.
    pub async fn run<F, Fut>(
        self,
        handler: F,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) -> Result<()>
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponseData>> + Send,
    {
        let handler = Arc::new(handler);

        loop {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let handler = Arc::clone(&handler);
            tracker.spawn(async move {
                if let Err(e) = Self::serve(stream, handler.as_ref()).await {
                    tracing::debug!("IPC connection ended with error: {}", e);
                }
            });
        }

        tracing::debug!("IPC server on {} stopped", self.socket_path.display());
        Ok(())
    }

    async fn serve<F, Fut>(mut stream: UnixStream, handler: &F) -> Result<()>
    where
        F: Fn(Command) -> Fut,
        Fut: Future<Output = Result<ResponseData>>,
    {
        let Some(request) = Self::read_request(&mut stream).await? else {
            return Ok(());
        };

        let response = match handler(request.command).await {
            Ok(data) => Response::success(request.id, data),
            Err(e) => Response::error(request.id, e.to_string()),
        };

        Self::write_response(&mut stream, &response).await
    }

    /// Read one newline-terminated request; `None` if the client hung up
    async fn read_request(stream: &mut UnixStream) -> Result<Option<Request>> {
        let mut reader = BufReader::new(stream.take(MAX_REQUEST_SIZE));
        let mut line = String::new();

        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| CorralError::IpcError(format!("Failed to read request: {}", e)))?;
        if read == 0 {
            return Ok(None);
        }

        serde_json::from_str(line.trim())
            .map(Some)
            .map_err(|e| CorralError::ProtocolError(format!("Invalid request: {}", e)))
    }

    async fn write_response(stream: &mut UnixStream, response: &Response) -> Result<()> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        stream
            .write_all(json.as_bytes())
            .await
            .map_err(|e| CorralError::IpcError(format!("Failed to write response: {}", e)))?;
        stream
            .flush()
            .await
            .map_err(|e| CorralError::IpcError(format!("Failed to flush stream: {}", e)))?;
        Ok(())
    }

    /// Get the socket path being used
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove socket file: {}", e);
            }
        }
    }
}
