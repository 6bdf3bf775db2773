//! Per-service summaries over a time window, built from the snapshot files
//! and the alert log so they are available without a running daemon.

use super::{load_snapshot, MetricSample, MetricSnapshot};
use crate::alerts::Alert;
use crate::error::Result;
use crate::health::HealthStatus;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

/// Alerts listed per service in a report
pub const REPORT_RECENT_ALERTS: usize = 5;

/// Suffix of the per-service snapshot files
const SNAPSHOT_SUFFIX: &str = "_metrics.json";

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceReport {
    pub service: String,
    /// Samples inside the window
    pub samples: usize,
    /// Share of samples taken while the service was answering, `None` without samples
    pub uptime_percent: Option<f64>,
    pub avg_cpu: Option<f64>,
    pub max_cpu: Option<f64>,
    pub avg_memory: Option<f64>,
    pub max_memory: Option<f64>,
    pub alert_count: usize,
    /// Newest alerts first
    pub recent_alerts: Vec<Alert>,
}

/// Load every `<service>_metrics.json` in `dir`.
///
/// Unreadable snapshots are logged and skipped; a missing directory yields
/// no snapshots.
pub fn load_snapshots(dir: &Path) -> Result<Vec<MetricSnapshot>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let file_name = entry?.file_name();
        let Some(service) = file_name
            .to_str()
            .and_then(|name| name.strip_suffix(SNAPSHOT_SUFFIX))
        else {
            continue;
        };
        if service.is_empty() {
            continue;
        }

        match load_snapshot(dir, service) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => tracing::warn!("Skipping metrics snapshot for {}: {}", service, e),
        }
    }
    Ok(snapshots)
}

/// Summarise each service's samples and alerts raised at or after `since`.
///
/// Services that only appear in the alert log are reported with no samples.
pub fn build_report(
    snapshots: &[MetricSnapshot],
    alerts: &[Alert],
    since: DateTime<Utc>,
) -> Vec<ServiceReport> {
    let mut reports: BTreeMap<String, ServiceReport> = BTreeMap::new();

    for snapshot in snapshots {
        let window: Vec<&MetricSample> = snapshot
            .samples
            .iter()
            .filter(|s| s.timestamp >= since)
            .collect();
        reports.insert(snapshot.service.clone(), summarise(&snapshot.service, &window));
    }

    let mut in_window: Vec<&Alert> = alerts.iter().filter(|a| a.timestamp >= since).collect();
    in_window.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    for alert in in_window {
        let report = reports
            .entry(alert.service.clone())
            .or_insert_with(|| summarise(&alert.service, &[]));
        report.alert_count += 1;
        if report.recent_alerts.len() < REPORT_RECENT_ALERTS {
            report.recent_alerts.push(alert.clone());
        }
    }

    reports.into_values().collect()
}

fn summarise(service: &str, samples: &[&MetricSample]) -> ServiceReport {
    let count = samples.len();
    let mean = |total: f64| (count > 0).then(|| total / count as f64);

    let up = samples.iter().filter(|s| is_up(s.health)).count();

    ServiceReport {
        service: service.to_string(),
        samples: count,
        uptime_percent: mean(up as f64 * 100.0),
        avg_cpu: mean(samples.iter().map(|s| s.cpu_percent as f64).sum()),
        max_cpu: peak(samples.iter().map(|s| s.cpu_percent as f64)),
        avg_memory: mean(samples.iter().map(|s| s.memory_percent as f64).sum()),
        max_memory: peak(samples.iter().map(|s| s.memory_percent as f64)),
        alert_count: 0,
        recent_alerts: Vec::new(),
    }
}

fn peak(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.reduce(f64::max)
}

/// Samples exist only while the process runs; a failed health check on top
/// of that counts the sample as down.
fn is_up(health: HealthStatus) -> bool {
    !matches!(
        health,
        HealthStatus::Unhealthy | HealthStatus::Unreachable | HealthStatus::Down
    )
}
