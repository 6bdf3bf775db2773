// PID file management for the daemon process

use crate::error::{CorralError, Result};
use crate::process::signals;
use std::fs;
use std::path::{Path, PathBuf};

/// Manages the daemon PID file
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write the current process PID to the file
    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, std::process::id().to_string()).map_err(|e| {
            CorralError::PersistenceError(format!("Failed to write PID file: {}", e))
        })
    }

    /// Read the PID from the file
    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            CorralError::PersistenceError(format!("Failed to read PID file: {}", e))
        })?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| CorralError::PersistenceError(format!("Invalid PID in file: {}", e)))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the PID file
    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                CorralError::PersistenceError(format!("Failed to remove PID file: {}", e))
            })?;
        }
        Ok(())
    }

    /// PID of a live process recorded in the file, if any
    pub fn running_pid(&self) -> Option<u32> {
        if !self.exists() {
            return None;
        }
        self.read().ok().filter(|&pid| signals::pid_alive(pid))
    }

    /// Claim the file for this process.
    ///
    /// A file naming a live process means another daemon owns the state
    /// directory; a file naming a dead one is stale and replaced.
    pub fn acquire(self) -> Result<PidGuard> {
        if let Some(pid) = self.running_pid() {
            if pid != std::process::id() {
                return Err(CorralError::DaemonAlreadyRunning(pid));
            }
        }

        if self.exists() {
            tracing::debug!("Removing stale PID file {}", self.path.display());
            self.remove()?;
        }

        self.write()?;
        Ok(PidGuard { file: self })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Removes the PID file when dropped
#[derive(Debug)]
pub struct PidGuard {
    file: PidFile,
}

impl PidGuard {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.remove() {
            tracing::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_pid() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::with_path(temp_dir.path().join("corrald.pid"));

        pid_file.write().unwrap();
        assert_eq!(pid_file.read().unwrap(), std::process::id());
        assert_eq!(pid_file.running_pid(), Some(std::process::id()));
    }

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("corrald.pid");

        let guard = PidFile::with_path(&path).acquire().unwrap();
        assert!(path.exists());
        assert_eq!(guard.path(), path.as_path());

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_acquire_replaces_stale_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrald.pid");

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        fs::write(&path, dead_pid.to_string()).unwrap();

        let _guard = PidFile::with_path(&path).acquire().unwrap();
        assert_eq!(PidFile::with_path(&path).read().unwrap(), std::process::id());
    }

    #[test]
    fn test_acquire_refuses_live_owner() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrald.pid");

        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        fs::write(&path, child.id().to_string()).unwrap();

        let result = PidFile::with_path(&path).acquire();
        assert!(matches!(result, Err(CorralError::DaemonAlreadyRunning(pid)) if pid == child.id()));

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn test_garbage_file_is_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrald.pid");
        fs::write(&path, "not a pid").unwrap();

        let pid_file = PidFile::with_path(&path);
        assert!(pid_file.read().is_err());
        assert_eq!(pid_file.running_pid(), None);
    }
}
