use super::Alert;
use crate::error::{CorralError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::task::TaskTracker;

/// Destination for emitted alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<()>;

    /// Short name used in log messages
    fn name(&self) -> &str;
}

/// Posts each alert as JSON to a webhook URL
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CorralError::AlertSinkError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| CorralError::AlertSinkError(format!("POST {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CorralError::AlertSinkError(format!(
                "POST {} returned {}",
                self.url, status
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Size past which the alert log is rolled over to its single backup
pub const DEFAULT_ALERT_LOG_MAX_SIZE: u64 = 1024 * 1024;

/// JSON-lines file of emitted alerts.
///
/// Once the file grows past `max_size` it is renamed to `<path>.1`,
/// replacing the previous backup, so at most two files are kept.
#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
    max_size: u64,
}

impl AlertLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_max_size(path, DEFAULT_ALERT_LOG_MAX_SIZE)
    }

    pub fn with_max_size<P: AsRef<Path>>(path: P, max_size: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the rolled-over backup
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    pub async fn append(&self, alert: &Alert) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(alert)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        let size = file.metadata().await?.len();
        drop(file);
        if size > self.max_size {
            if let Err(e) = tokio::fs::rename(&self.path, self.backup_path()).await {
                tracing::warn!("Failed to roll over {}: {}", self.path.display(), e);
            }
        }
        Ok(())
    }

    /// The newest `limit` alerts, oldest first. Malformed lines are skipped.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Alert>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut window = VecDeque::with_capacity(limit.min(1024));
        self.scan(|alert| {
            if window.len() == limit {
                window.pop_front();
            }
            window.push_back(alert);
        })
        .await?;

        Ok(window.into_iter().collect())
    }

    /// Every kept alert raised at or after `cutoff`, oldest first
    pub async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Alert>> {
        let mut alerts = Vec::new();
        self.scan(|alert| {
            if alert.timestamp >= cutoff {
                alerts.push(alert);
            }
        })
        .await?;
        Ok(alerts)
    }

    /// Feed the backup and then the current file to `visit`, in file order
    async fn scan<F: FnMut(Alert)>(&self, mut visit: F) -> Result<()> {
        for path in [self.backup_path(), self.path.clone()] {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let mut lines = BufReader::new(file).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Alert>(&line) {
                    Ok(alert) => visit(alert),
                    Err(e) => tracing::debug!("Skipping malformed alert line: {}", e),
                }
            }
        }
        Ok(())
    }
}

/// Records alerts durably and fans them out to the sinks.
///
/// Sink deliveries run as tracked background tasks bounded by a timeout, so
/// a slow webhook never holds up evaluation.
pub struct AlertDispatcher {
    log: AlertLog,
    sinks: Vec<Arc<dyn AlertSink>>,
    timeout: Duration,
    tracker: TaskTracker,
}

impl AlertDispatcher {
    pub fn new(log: AlertLog, timeout: Duration, tracker: TaskTracker) -> Self {
        Self {
            log,
            sinks: Vec::new(),
            timeout,
            tracker,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn log(&self) -> &AlertLog {
        &self.log
    }

    pub async fn dispatch(&self, alerts: Vec<Alert>) {
        for alert in alerts {
            tracing::warn!(
                service = %alert.service,
                rule = %alert.rule,
                severity = %alert.severity,
                "{}",
                alert.message
            );

            if let Err(e) = self.log.append(&alert).await {
                tracing::error!(
                    "Failed to append alert to {}: {}",
                    self.log.path().display(),
                    e
                );
            }

            let alert = Arc::new(alert);
            for sink in &self.sinks {
                let sink = sink.clone();
                let alert = alert.clone();
                let limit = self.timeout;
                self.tracker.spawn(async move {
                    match tokio::time::timeout(limit, sink.deliver(&alert)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!("Alert sink {}: {}", sink.name(), e),
                        Err(_) => {
                            let error = CorralError::AlertSinkError(format!(
                                "{} delivery timed out after {:?}",
                                sink.name(),
                                limit
                            ));
                            tracing::warn!("{}", error);
                        }
                    }
                });
            }
        }
    }
}
