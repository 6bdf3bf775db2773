//! Metrics collector
//!
//! Keeps a bounded history of resource samples per service and flushes it to
//! one snapshot file per service.

mod report;

pub use report::{build_report, load_snapshots, ServiceReport, REPORT_RECENT_ALERTS};

use crate::config::MetricsConfig;
use crate::error::{CorralError, Result};
use crate::health::{HealthReport, HealthStatus};
use crate::process::{ResourceMonitor, RunningService};
use crate::state::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// One observation of a running service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    pub health: HealthStatus,
}

impl MetricSample {
    pub fn new(cpu_percent: f32, memory_percent: f32) -> Self {
        Self {
            timestamp: Utc::now(),
            cpu_percent,
            memory_percent,
            response_time_ms: None,
            health: HealthStatus::Unknown,
        }
    }
}

/// Fixed-capacity sample history; the oldest sample is evicted first
#[derive(Debug, Clone)]
pub struct MetricHistory {
    samples: VecDeque<MetricSample>,
    capacity: usize,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: MetricSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// The newest `limit` samples, oldest first
    pub fn recent(&self, limit: usize) -> Vec<MetricSample> {
        let skip = self.samples.len().saturating_sub(limit);
        self.samples.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// On-disk form of one service's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub service: String,
    pub capacity: usize,
    pub updated_at: DateTime<Utc>,
    pub samples: Vec<MetricSample>,
}

/// Samples running services and owns their histories.
///
/// The collector has its own [`ResourceMonitor`] so its CPU figures cover
/// exactly one sampling interval.
pub struct MetricsCollector {
    capacity: usize,
    histories: BTreeMap<String, MetricHistory>,
    monitor: ResourceMonitor,
    latest_health: HashMap<String, (HealthStatus, Option<u64>)>,
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Self {
        Self::with_capacity(config.capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            histories: BTreeMap::new(),
            monitor: ResourceMonitor::new(),
            latest_health: HashMap::new(),
        }
    }

    /// Remember the most recent probe result, paired with the next sample
    pub fn record_health(&mut self, report: &HealthReport) {
        self.latest_health.insert(
            report.service.clone(),
            (report.status, report.response_time_ms),
        );
    }

    /// Sample every running service once.
    ///
    /// Services whose process vanished since the targets were taken are
    /// skipped; crash detection handles them.
    pub async fn collect(&mut self, running: &[RunningService]) -> Vec<(String, MetricSample)> {
        let pids: Vec<u32> = running.iter().map(|r| r.pid).collect();
        let snapshots = self.monitor.sample_settled(&pids).await;
        self.monitor.retain(&pids);

        let mut collected = Vec::new();
        for service in running {
            let Some(snapshot) = snapshots.get(&service.pid) else {
                tracing::debug!("No resource sample for {} (pid {})", service.name, service.pid);
                continue;
            };

            let (health, response_time_ms) = self
                .latest_health
                .get(&service.name)
                .copied()
                .unwrap_or((HealthStatus::Unknown, None));

            let sample = MetricSample {
                timestamp: Utc::now(),
                cpu_percent: snapshot.cpu_percent,
                memory_percent: snapshot.memory_percent,
                response_time_ms,
                health,
            };
            self.push(&service.name, sample.clone());
            collected.push((service.name.clone(), sample));
        }
        collected
    }

    pub fn push(&mut self, service: &str, sample: MetricSample) {
        let capacity = self.capacity;
        self.histories
            .entry(service.to_string())
            .or_insert_with(|| MetricHistory::new(capacity))
            .push(sample);
    }

    /// The newest `limit` samples of a service, oldest first
    pub fn history(&self, service: &str, limit: usize) -> Vec<MetricSample> {
        self.histories
            .get(service)
            .map(|h| h.recent(limit))
            .unwrap_or_default()
    }

    pub fn latest(&self, service: &str) -> Option<&MetricSample> {
        self.histories.get(service).and_then(|h| h.latest())
    }

    pub fn services(&self) -> impl Iterator<Item = &String> {
        self.histories.keys()
    }

    /// Write every service's history to `<dir>/<service>_metrics.json`.
    ///
    /// A failure for one service is logged and does not stop the others.
    ///
    /// # Returns
    /// Number of snapshot files written
    pub fn flush(&self, dir: &Path) -> usize {
        let mut written = 0;
        for (service, history) in &self.histories {
            let snapshot = MetricSnapshot {
                service: service.clone(),
                capacity: history.capacity(),
                updated_at: Utc::now(),
                samples: history.recent(history.len()),
            };
            match write_json_atomic(&snapshot_path(dir, service), &snapshot) {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!("Failed to flush metrics for {}: {}", service, e),
            }
        }
        tracing::debug!("Flushed {} metrics snapshot(s) to {}", written, dir.display());
        written
    }
}

pub fn snapshot_path(dir: &Path, service: &str) -> PathBuf {
    dir.join(format!("{}_metrics.json", service))
}

/// Read a service's snapshot file back
pub fn load_snapshot(dir: &Path, service: &str) -> Result<MetricSnapshot> {
    let path = snapshot_path(dir, service);
    if !path.exists() {
        return Err(CorralError::PersistenceError(format!(
            "No metrics snapshot for {} at {}",
            service,
            path.display()
        )));
    }
    read_json(&path)
}
