use crate::error::{CorralError, Result};
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::OpenOptions;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

/// Default rotation threshold (10MB)
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Subdirectory of the log dir holding compressed overflow
pub const ARCHIVE_DIR: &str = "archive";

/// Rotation limits applied to every service log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Size in bytes at which the active file is rotated
    pub max_size: u64,
    /// Rotated files kept next to the active one
    pub backup_count: usize,
    /// Gzip overflow into the archive instead of deleting it
    pub compress: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_LOG_SIZE,
            backup_count: 5,
            compress: true,
        }
    }
}

/// Active log file of one service, rotated by size.
///
/// Writes are whole chunks (the capture tasks hand over complete lines), and
/// rotation runs inside the same `&mut self` call as the write that crossed
/// the limit, so holding the writer's lock covers both.
pub struct RotatingLog {
    service: String,
    dir: PathBuf,
    path: PathBuf,
    file: TokioFile,
    size: u64,
    policy: RotationPolicy,
}

impl RotatingLog {
    /// Open (or create) `<dir>/<service>.log` in append mode
    ///
    /// # Arguments
    /// * `dir` - Log directory, created if missing
    /// * `service` - Service name used for the file name
    /// * `policy` - Rotation limits
    pub async fn open(dir: &Path, service: &str, policy: RotationPolicy) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CorralError::LogError(format!("Failed to create log directory: {}", e)))?;

        let path = active_path(dir, service);
        let (file, size) = open_append(&path)?;

        Ok(Self {
            service: service.to_string(),
            dir: dir.to_path_buf(),
            path,
            file,
            size,
            policy,
        })
    }

    /// Append `data`, rotating afterwards if the file grew past its limit.
    ///
    /// # Returns
    /// * `Ok(true)` - Data written and the file was rotated
    /// * `Ok(false)` - Data written, no rotation needed
    /// * `Err(CorralError)` - Write failed; a failed rotation after a
    ///   successful write is logged and retried on the next write
    pub async fn write(&mut self, data: &[u8]) -> Result<bool> {
        self.file
            .write_all(data)
            .await
            .map_err(|e| CorralError::LogError(format!("Failed to write to log: {}", e)))?;
        self.size += data.len() as u64;

        if self.size <= self.policy.max_size {
            return Ok(false);
        }

        match self.rotate().await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!("Log rotation for {} failed: {}", self.service, e);
                Ok(false)
            }
        }
    }

    /// Rotate the active file now.
    ///
    /// Rotated files shift up by one (`.1` becomes `.2`, ...), the file that
    /// falls off the end is archived, and the active file becomes `.1`. The
    /// fresh handle is swapped in only after the rename succeeded; on any
    /// failure the current handle stays in place.
    pub async fn rotate(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| CorralError::LogRotationError(format!("Failed to flush log: {}", e)))?;

        let backups = self.policy.backup_count;
        if backups == 0 {
            archive_file(&self.path, &self.dir, &self.service, self.policy.compress).await?;
        } else {
            let oldest = rotated_path(&self.dir, &self.service, backups);
            if oldest.exists() {
                archive_file(&oldest, &self.dir, &self.service, self.policy.compress).await?;
            }

            for index in (1..backups).rev() {
                let from = rotated_path(&self.dir, &self.service, index);
                if from.exists() {
                    let to = rotated_path(&self.dir, &self.service, index + 1);
                    rename(&from, &to).await?;
                }
            }

            rename(&self.path, &rotated_path(&self.dir, &self.service, 1)).await?;
        }

        let (file, size) = open_append(&self.path)?;
        self.file = file;
        self.size = size;

        tracing::debug!("Rotated log for {}", self.service);
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| CorralError::LogError(format!("Failed to flush log: {}", e)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// `<dir>/<service>.log`
pub fn active_path(dir: &Path, service: &str) -> PathBuf {
    dir.join(format!("{}.log", service))
}

/// `<dir>/<service>.log.<index>`
pub fn rotated_path(dir: &Path, service: &str, index: usize) -> PathBuf {
    dir.join(format!("{}.log.{}", service, index))
}

fn open_append(path: &Path) -> Result<(TokioFile, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CorralError::LogError(format!("Failed to open {}: {}", path.display(), e)))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((TokioFile::from_std(file), size))
}

async fn rename(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::rename(from, to).await.map_err(|e| {
        CorralError::LogRotationError(format!(
            "Failed to rename {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })
}

/// Move `src` out of the rotation window: gzip it into the archive
/// directory, or delete it when compression is off.
async fn archive_file(src: &Path, dir: &Path, service: &str, compress: bool) -> Result<()> {
    if !compress {
        return tokio::fs::remove_file(src).await.map_err(|e| {
            CorralError::LogRotationError(format!("Failed to delete {}: {}", src.display(), e))
        });
    }

    let archive_dir = dir.join(ARCHIVE_DIR);
    let dest = unique_archive_path(&archive_dir, service)?;
    let src = src.to_path_buf();

    tokio::task::spawn_blocking(move || -> io::Result<()> {
        std::fs::create_dir_all(&archive_dir)?;
        let mut input = BufReader::new(std::fs::File::open(&src)?);
        let output = BufWriter::new(std::fs::File::create(&dest)?);
        let mut encoder = GzEncoder::new(output, Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()?;
        std::fs::remove_file(&src)
    })
    .await
    .map_err(|e| CorralError::LogRotationError(format!("Archive task failed: {}", e)))?
    .map_err(|e| CorralError::LogRotationError(format!("Failed to archive log: {}", e)))
}

fn unique_archive_path(archive_dir: &Path, service: &str) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6f").to_string();
    for attempt in 0..1000 {
        let name = if attempt == 0 {
            format!("{}.log.{}.gz", service, stamp)
        } else {
            format!("{}.log.{}-{}.gz", service, stamp, attempt)
        };
        let candidate = archive_dir.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(CorralError::LogRotationError(format!(
        "No free archive name for {}",
        service
    )))
}
