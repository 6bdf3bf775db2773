// Daemon lifecycle management from the CLI side

use super::pid::PidFile;
use crate::error::{CorralError, Result};
use crate::ipc::IpcClient;
use crate::process::signals;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `start` waits for the socket to answer
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Starts, stops and inspects a corrald instance
pub struct DaemonManager {
    pid_file: PidFile,
    socket_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub pid_file: PathBuf,
    pub socket: PathBuf,
    /// Whether the IPC socket answers
    pub responsive: bool,
}

impl DaemonManager {
    pub fn new<P: AsRef<Path>, S: AsRef<Path>>(pid_path: P, socket_path: S) -> Self {
        Self {
            pid_file: PidFile::with_path(pid_path),
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid_file.running_pid().is_some()
    }

    pub fn get_pid(&self) -> Option<u32> {
        self.pid_file.running_pid()
    }

    /// Launch `corrald --daemonize` and wait until its socket answers.
    ///
    /// # Arguments
    /// * `binary` - Path to the corrald executable
    /// * `config` - Config file passed through to the daemon
    pub fn start(&self, binary: &Path, config: Option<&Path>) -> Result<u32> {
        if let Some(pid) = self.get_pid() {
            return Err(CorralError::DaemonAlreadyRunning(pid));
        }

        let mut command = Command::new(binary);
        command.arg("--daemonize");
        if let Some(config) = config {
            command.arg("--config").arg(config);
        }

        let status = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                CorralError::ConnectionError(format!(
                    "Failed to launch {}: {}",
                    binary.display(),
                    e
                ))
            })?;
        if !status.success() {
            return Err(CorralError::ConnectionError(format!(
                "{} exited with {}",
                binary.display(),
                status
            )));
        }

        let client = IpcClient::with_socket_path(&self.socket_path);
        let deadline = Instant::now() + READY_TIMEOUT;
        while Instant::now() < deadline {
            if client.is_daemon_running() {
                if let Some(pid) = self.get_pid() {
                    return Ok(pid);
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        Err(CorralError::ConnectionError(format!(
            "Daemon did not answer on {} within {:?}",
            self.socket_path.display(),
            READY_TIMEOUT
        )))
    }

    /// Stop the daemon with SIGTERM, escalating to SIGKILL after `timeout`
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        let pid = self.get_pid().ok_or(CorralError::DaemonNotRunning)?;
        let target = Pid::from_raw(pid as i32);

        kill(target, Signal::SIGTERM)
            .map_err(|e| CorralError::SignalError(format!("Failed to send SIGTERM: {}", e)))?;

        if wait_gone(pid, timeout) {
            return self.pid_file.remove();
        }

        tracing::warn!("Daemon {} did not stop within {:?}, sending SIGKILL", pid, timeout);
        kill(target, Signal::SIGKILL)
            .map_err(|e| CorralError::SignalError(format!("Failed to send SIGKILL: {}", e)))?;

        if wait_gone(pid, Duration::from_secs(2)) {
            // A killed daemon leaves its files behind
            self.pid_file.remove()?;
            if self.socket_path.exists() {
                std::fs::remove_file(&self.socket_path)?;
            }
            return Ok(());
        }

        Err(CorralError::SignalError(format!(
            "Daemon {} survived SIGKILL",
            pid
        )))
    }

    pub fn get_status(&self) -> DaemonStatus {
        let pid = self.get_pid();
        DaemonStatus {
            running: pid.is_some(),
            pid,
            pid_file: self.pid_file.path().to_path_buf(),
            socket: self.socket_path.clone(),
            responsive: IpcClient::with_socket_path(&self.socket_path).is_daemon_running(),
        }
    }
}

fn wait_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !signals::pid_alive(pid) {
            return true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    !signals::pid_alive(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_status_without_daemon() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DaemonManager::new(
            temp_dir.path().join("corrald.pid"),
            temp_dir.path().join("corrald.sock"),
        );

        let status = manager.get_status();
        assert!(!status.running);
        assert!(!status.responsive);
        assert_eq!(status.pid, None);
    }

    #[test]
    fn test_stop_without_daemon() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DaemonManager::new(
            temp_dir.path().join("corrald.pid"),
            temp_dir.path().join("corrald.sock"),
        );

        assert!(matches!(
            manager.stop(Duration::from_secs(1)),
            Err(CorralError::DaemonNotRunning)
        ));
    }

    #[test]
    fn test_stop_terminates_recorded_process() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("corrald.pid");
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&pid_path, child.id().to_string()).unwrap();

        // Reap in the background so the PID disappears once it dies
        let pid = child.id();
        let reaper = std::thread::spawn(move || child.wait());

        let manager = DaemonManager::new(&pid_path, temp_dir.path().join("corrald.sock"));
        assert_eq!(manager.get_pid(), Some(pid));
        manager.stop(Duration::from_secs(5)).unwrap();

        assert!(!pid_path.exists());
        reaper.join().unwrap().unwrap();
    }
}
