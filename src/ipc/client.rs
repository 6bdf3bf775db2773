// IPC Client - Communicates with the daemon via Unix socket

use crate::error::{CorralError, Result};
use crate::ipc::{Command, Request, Response, ResponseData};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Maximum number of connection retry attempts
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on waiting for a response; stop-all can take a while
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(600);

/// IPC client for communicating with the daemon
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Send a command and return the daemon's answer, turning a daemon-side
    /// error into `Err`
    pub fn request(&self, command: Command) -> Result<ResponseData> {
        self.send_command(command)?
            .result
            .map_err(CorralError::IpcError)
    }

    /// Send a command to the daemon and wait for a response
    pub fn send_command(&self, command: Command) -> Result<Response> {
        let request_id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(request_id, command);

        // Only connecting is retried; a request that reached the daemon is not resent
        let mut last_error = None;
        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            match self.connect() {
                Ok(stream) => {
                    let response = Self::exchange(stream, &request)?;
                    if response.id != request_id {
                        return Err(CorralError::ProtocolError(format!(
                            "Response ID mismatch: expected {}, got {}",
                            request_id, response.id
                        )));
                    }
                    return Ok(response);
                }
                Err(CorralError::DaemonNotRunning) => return Err(CorralError::DaemonNotRunning),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRY_ATTEMPTS {
                        std::thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CorralError::ConnectionError("Failed to connect after retries".to_string())
        }))
    }

    fn exchange(mut stream: UnixStream, request: &Request) -> Result<Response> {
        stream.set_read_timeout(Some(RESPONSE_TIMEOUT))?;

        let request_json = serde_json::to_string(request)?;
        writeln!(stream, "{}", request_json)
            .map_err(|e| CorralError::IpcError(format!("Failed to write request: {}", e)))?;
        stream
            .flush()
            .map_err(|e| CorralError::IpcError(format!("Failed to flush stream: {}", e)))?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        let read = reader
            .read_line(&mut response_line)
            .map_err(|e| CorralError::IpcError(format!("Failed to read response: {}", e)))?;
        if read == 0 {
            return Err(CorralError::ConnectionError(
                "Daemon closed the connection without answering".to_string(),
            ));
        }

        serde_json::from_str(response_line.trim())
            .map_err(|e| CorralError::ProtocolError(format!("Invalid response: {}", e)))
    }

    /// Establish a connection to the daemon's Unix socket
    fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(CorralError::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused
                || e.kind() == std::io::ErrorKind::NotFound
            {
                CorralError::DaemonNotRunning
            } else {
                CorralError::ConnectionError(format!("Failed to connect to daemon: {}", e))
            }
        })
    }

    /// Whether a daemon answers on the socket
    pub fn is_daemon_running(&self) -> bool {
        self.connect().is_ok()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_not_running_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let client = IpcClient::with_socket_path(temp_dir.path().join("corrald.sock"));

        let result = client.send_command(Command::Status { service: None });
        assert!(matches!(result, Err(CorralError::DaemonNotRunning)));
        assert!(!client.is_daemon_running());
    }

    #[test]
    fn test_stale_socket_file_is_not_running() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("corrald.sock");
        {
            let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        }
        assert!(path.exists());

        let client = IpcClient::with_socket_path(&path);
        assert!(matches!(
            client.send_command(Command::Discover),
            Err(CorralError::DaemonNotRunning)
        ));
    }
}
