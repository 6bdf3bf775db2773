use crate::config::LogsConfig;
use crate::error::{CorralError, Result};
use crate::logs::reader::tail_service;
use crate::logs::writer::{active_path, RotatingLog, RotationPolicy, ARCHIVE_DIR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;

/// Writer shared between a service's stdout and stderr capture tasks
pub type SharedLog = Arc<tokio::sync::Mutex<RotatingLog>>;

/// Kind of file found in the log tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFileKind {
    Active,
    Rotated,
    Archived,
}

/// One file in the log tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFileInfo {
    pub path: PathBuf,
    pub service: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub kind: LogFileKind,
}

/// Result of a retention sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    pub retained: usize,
}

/// Per-service log capture, rotation and retention.
///
/// Cheap to clone; all clones share the same writers.
#[derive(Clone)]
pub struct LogManager {
    inner: Arc<LogManagerInner>,
}

struct LogManagerInner {
    dir: PathBuf,
    policy: RotationPolicy,
    retention: Duration,
    writers: Mutex<HashMap<String, SharedLog>>,
}

impl LogManager {
    /// Create a log manager from configuration, creating the log directory
    pub async fn new(config: &LogsConfig) -> Result<Self> {
        let policy = RotationPolicy {
            max_size: config.max_size_bytes()?,
            backup_count: config.backup_count,
            compress: config.compress,
        };
        Self::with_policy(&config.dir, policy, config.retention_days).await
    }

    pub async fn with_policy(dir: &Path, policy: RotationPolicy, retention_days: u64) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CorralError::LogError(format!("Failed to create log directory: {}", e)))?;

        Ok(Self {
            inner: Arc::new(LogManagerInner {
                dir: dir.to_path_buf(),
                policy,
                retention: Duration::from_secs(retention_days * 24 * 60 * 60),
                writers: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Path of a service's active log file
    pub fn log_path(&self, service: &str) -> PathBuf {
        active_path(&self.inner.dir, service)
    }

    /// Get the writer for a service, opening its log file on first use
    pub async fn writer(&self, service: &str) -> Result<SharedLog> {
        if let Some(existing) = self.lock_writers()?.get(service) {
            return Ok(existing.clone());
        }

        let log = RotatingLog::open(&self.inner.dir, service, self.inner.policy).await?;
        let shared = Arc::new(tokio::sync::Mutex::new(log));

        // Another task may have opened it meanwhile; keep the first one
        let mut writers = self.lock_writers()?;
        Ok(writers
            .entry(service.to_string())
            .or_insert(shared)
            .clone())
    }

    /// Route a child's stdout and stderr into its service log.
    ///
    /// One background task per stream copies complete lines into the shared
    /// writer until the stream closes.
    pub async fn attach(&self, service: &str, child: &mut Child) -> Result<()> {
        let log = self.writer(service).await?;

        if let Some(stdout) = child.stdout.take() {
            spawn_capture(service.to_string(), stdout, log.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_capture(service.to_string(), stderr, log);
        }

        Ok(())
    }

    /// Last `lines` lines of a service's log, across rotated files
    pub async fn tail(&self, service: &str, lines: usize) -> Result<Vec<String>> {
        let open = self.lock_writers()?.get(service).cloned();
        if let Some(log) = open {
            log.lock().await.flush().await?;
        }
        tail_service(&self.inner.dir, service, lines, self.inner.policy.backup_count).await
    }

    /// Flush every open writer
    pub async fn flush_all(&self) {
        let writers: Vec<(String, SharedLog)> = match self.lock_writers() {
            Ok(writers) => writers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Err(_) => return,
        };

        for (service, log) in writers {
            if let Err(e) = log.lock().await.flush().await {
                tracing::warn!("Failed to flush log for {}: {}", service, e);
            }
        }
    }

    /// Delete rotated and archived files older than the retention window
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(SystemTime::now()).await
    }

    /// Sweep as if the current time were `now`. Active files are never touched.
    pub async fn sweep_at(&self, now: SystemTime) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for info in self.stats()? {
            if info.kind == LogFileKind::Active {
                continue;
            }

            let modified: SystemTime = info.modified.into();
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.inner.retention {
                report.retained += 1;
                continue;
            }

            match tokio::fs::remove_file(&info.path).await {
                Ok(()) => {
                    tracing::info!("Removed expired log file {}", info.path.display());
                    report.deleted.push(info.path);
                }
                Err(e) => {
                    tracing::warn!("Failed to remove {}: {}", info.path.display(), e);
                }
            }
        }

        Ok(report)
    }

    /// Every file in the log tree, active, rotated and archived
    pub fn stats(&self) -> Result<Vec<LogFileInfo>> {
        let mut files = Vec::new();
        collect_files(&self.inner.dir, false, &mut files)?;

        let archive = self.inner.dir.join(ARCHIVE_DIR);
        if archive.is_dir() {
            collect_files(&archive, true, &mut files)?;
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn lock_writers(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, SharedLog>>> {
        self.inner
            .writers
            .lock()
            .map_err(|_| CorralError::LogError("Log writer registry poisoned".to_string()))
    }
}

fn spawn_capture<R>(service: String, stream: R, log: SharedLog)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let mut log = log.lock().await;
                    if let Err(e) = log.write(&buf).await {
                        tracing::warn!("Dropping output of {}: {}", service, e);
                    }
                }
                Err(e) => {
                    tracing::debug!("Output stream of {} closed: {}", service, e);
                    break;
                }
            }
        }

        let _ = log.lock().await.flush().await;
    });
}

fn collect_files(dir: &Path, archived: bool, out: &mut Vec<LogFileInfo>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CorralError::LogError(format!("Failed to read {}: {}", dir.display(), e)))?;

    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some((service, kind)) = classify(&file_name, archived) else {
            continue;
        };

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        out.push(LogFileInfo {
            path: entry.path(),
            service,
            size: metadata.len(),
            modified: modified.into(),
            kind,
        });
    }

    Ok(())
}

/// Split a log file name into its service and kind.
///
/// `api.log` is active, `api.log.3` or the daemon's dated `corrald.log.2024-01-31`
/// are rotated, `api.log.<stamp>.gz` under the archive is archived. Service
/// names may contain dots, so the split is on the last `.log`.
fn classify(file_name: &str, archived: bool) -> Option<(String, LogFileKind)> {
    if archived {
        let (service, stamp) = split_at_log(file_name.strip_suffix(".gz")?)?;
        let valid = !stamp.is_empty()
            && stamp
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, 'T' | '.' | '-'));
        return valid.then(|| (service.to_string(), LogFileKind::Archived));
    }

    if let Some(service) = file_name.strip_suffix(".log") {
        return (!service.is_empty()).then(|| (service.to_string(), LogFileKind::Active));
    }

    let (service, index) = split_at_log(file_name)?;
    let valid = !index.is_empty() && index.chars().all(|c| c.is_ascii_digit() || c == '-');
    valid.then(|| (service.to_string(), LogFileKind::Rotated))
}

/// `name.log.rest` into `(name, rest)`
fn split_at_log(file_name: &str) -> Option<(&str, &str)> {
    let idx = file_name.rfind(".log.")?;
    let service = &file_name[..idx];
    (!service.is_empty()).then(|| (service, &file_name[idx + ".log.".len()..]))
}
