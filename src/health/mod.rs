//! Health prober
//!
//! Periodic liveness/readiness checks of running services: a TCP connect to
//! the assigned port, optionally followed by an HTTP GET of a health path.
//! Every check runs in its own task under its own timeout, so one hung
//! service cannot delay the others.

use crate::config::HealthConfig;
use crate::error::{CorralError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Classification of one health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No check has completed yet
    Unknown,
    Healthy,
    /// Reachable, but the health endpoint reported a problem
    Unhealthy,
    /// Port closed, connection refused or check timed out
    Unreachable,
    /// Unreachable for too many consecutive cycles
    Down,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
            HealthStatus::Down => write!(f, "down"),
        }
    }
}

/// A running service to check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub service: String,
    /// Process the check is about; results for an older PID are stale
    pub pid: u32,
    pub host: String,
    pub port: u16,
}

/// Raw result of a single check, before failure counting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub response_time_ms: Option<u64>,
    pub message: Option<String>,
}

impl ProbeOutcome {
    fn healthy(elapsed: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(elapsed.as_millis() as u64),
            message: None,
        }
    }

    fn failed(status: HealthStatus, elapsed: Option<Duration>, message: impl Into<String>) -> Self {
        Self {
            status,
            response_time_ms: elapsed.map(|e| e.as_millis() as u64),
            message: Some(message.into()),
        }
    }
}

/// Health of one service after a probe cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub service: String,
    /// Process that was checked; `None` for reports not tied to a cycle
    #[serde(default)]
    pub pid: Option<u32>,
    pub status: HealthStatus,
    pub response_time_ms: Option<u64>,
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub checked_at: DateTime<Utc>,
}

/// Performs individual checks. Cheap to clone into check tasks.
#[derive(Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    path: Option<String>,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(path: Option<String>, check_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(check_timeout)
            .build()
            .map_err(|e| CorralError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            path,
            timeout: check_timeout,
        })
    }

    /// Check one service: TCP connect, then the HTTP path if configured.
    /// The whole check is bounded by the checker's timeout.
    pub async fn check(&self, target: &ProbeTarget) -> ProbeOutcome {
        let started = Instant::now();
        let host = probe_host(&target.host);

        match timeout(self.timeout, TcpStream::connect((host, target.port))).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return ProbeOutcome::failed(
                    HealthStatus::Unreachable,
                    None,
                    format!("connection failed: {}", e),
                )
            }
            Err(_) => {
                return ProbeOutcome::failed(
                    HealthStatus::Unreachable,
                    Some(started.elapsed()),
                    "connect timed out",
                )
            }
        }

        let Some(path) = &self.path else {
            return ProbeOutcome::healthy(started.elapsed());
        };

        let url = health_url(host, target.port, path);
        let remaining = self.timeout.saturating_sub(started.elapsed());

        match timeout(remaining, self.client.get(&url).send()).await {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    debug!("Health check passed: {} returned {}", url, status);
                    ProbeOutcome::healthy(started.elapsed())
                } else {
                    warn!("Health check failed: {} returned {}", url, status);
                    ProbeOutcome::failed(
                        HealthStatus::Unhealthy,
                        Some(started.elapsed()),
                        format!("unexpected status: {}", status.as_u16()),
                    )
                }
            }
            Ok(Err(e)) if e.is_connect() || e.is_timeout() => ProbeOutcome::failed(
                HealthStatus::Unreachable,
                Some(started.elapsed()),
                format!("request failed: {}", e),
            ),
            Ok(Err(e)) => ProbeOutcome::failed(
                HealthStatus::Unhealthy,
                Some(started.elapsed()),
                format!("request failed: {}", e),
            ),
            Err(_) => ProbeOutcome::failed(
                HealthStatus::Unreachable,
                Some(started.elapsed()),
                "health check timed out",
            ),
        }
    }
}

/// Runs probe cycles and tracks consecutive failures per service
pub struct HealthProber {
    checker: HealthChecker,
    down_after: u32,
    permits: Arc<Semaphore>,
    /// Consecutive failures per service, counted for one PID at a time
    failures: HashMap<String, (u32, u32)>,
    latest: HashMap<String, HealthReport>,
}

impl HealthProber {
    pub fn new(config: &HealthConfig) -> Result<Self> {
        Ok(Self {
            checker: HealthChecker::new(config.path.clone(), config.timeout())?,
            down_after: config.down_after.max(1),
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            failures: HashMap::new(),
            latest: HashMap::new(),
        })
    }

    /// Checker for on-demand checks that do not touch failure counters
    pub fn checker(&self) -> HealthChecker {
        self.checker.clone()
    }

    /// Check every target concurrently, at most `max_concurrency` at once.
    ///
    /// A check task that fails to produce a result counts as one unhealthy
    /// sample for its service.
    pub async fn probe_all(&mut self, targets: Vec<ProbeTarget>) -> Vec<HealthReport> {
        let mut pending: HashMap<String, u32> =
            targets.iter().map(|t| (t.service.clone(), t.pid)).collect();
        let mut set = JoinSet::new();
        // Backstop in case a check ignores its own timeout
        let ceiling = self.checker.timeout + Duration::from_secs(1);

        for target in targets {
            let checker = self.checker.clone();
            let permits = self.permits.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let outcome = match timeout(ceiling, checker.check(&target)).await {
                    Ok(outcome) => outcome,
                    Err(_) => ProbeOutcome::failed(
                        HealthStatus::Unreachable,
                        Some(ceiling),
                        "health check exceeded its deadline",
                    ),
                };
                (target.service, target.pid, outcome)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((service, pid, outcome)) => {
                    pending.remove(&service);
                    reports.push(self.record(&service, pid, outcome));
                }
                Err(e) => warn!("Health check task failed: {}", e),
            }
        }

        for (service, pid) in pending {
            let error = CorralError::ProbeError(service.clone(), "check task did not complete".to_string());
            warn!("{}", error);
            let outcome = ProbeOutcome::failed(HealthStatus::Unhealthy, None, error.to_string());
            reports.push(self.record(&service, pid, outcome));
        }

        reports.sort_by(|a, b| a.service.cmp(&b.service));
        reports
    }

    /// Fold one outcome into the service's failure count.
    ///
    /// Unreachable results accumulate; reaching `down_after` in a row reports
    /// the service as down. Any other result resets the count, and so does a
    /// new PID.
    pub fn record(&mut self, service: &str, pid: u32, outcome: ProbeOutcome) -> HealthReport {
        let entry = self.failures.entry(service.to_string()).or_insert((pid, 0));
        if entry.0 != pid {
            *entry = (pid, 0);
        }
        let failures = &mut entry.1;

        let status = match outcome.status {
            HealthStatus::Unreachable | HealthStatus::Down => {
                *failures += 1;
                if *failures >= self.down_after {
                    HealthStatus::Down
                } else {
                    HealthStatus::Unreachable
                }
            }
            other => {
                *failures = 0;
                other
            }
        };

        let report = HealthReport {
            service: service.to_string(),
            pid: Some(pid),
            status,
            response_time_ms: outcome.response_time_ms,
            message: outcome.message,
            consecutive_failures: *failures,
            checked_at: Utc::now(),
        };

        if status == HealthStatus::Down {
            warn!(
                "Service {} is down after {} unreachable checks",
                service, report.consecutive_failures
            );
        }

        self.latest.insert(service.to_string(), report.clone());
        report
    }

    pub fn latest(&self, service: &str) -> Option<&HealthReport> {
        self.latest.get(service)
    }

    /// Latest report of every probed service, ordered by name
    pub fn reports(&self) -> Vec<HealthReport> {
        let mut reports: Vec<HealthReport> = self.latest.values().cloned().collect();
        reports.sort_by(|a, b| a.service.cmp(&b.service));
        reports
    }

    /// Reset a service's history, e.g. after it was restarted
    pub fn forget(&mut self, service: &str) {
        self.failures.remove(service);
        self.latest.remove(service);
    }
}

/// Whether `host:port` accepts TCP connections within `limit`
pub async fn port_open(host: &str, port: u16, limit: Duration) -> bool {
    matches!(
        timeout(limit, TcpStream::connect((probe_host(host), port))).await,
        Ok(Ok(_))
    )
}

/// Address to connect to for a service bound to `host`; wildcard binds are
/// probed over loopback
pub fn probe_host(host: &str) -> &str {
    match host {
        "" | "0.0.0.0" => "127.0.0.1",
        "::" | "[::]" => "::1",
        other => other,
    }
}

fn health_url(host: &str, port: u16, path: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{}]:{}{}", host, port, path)
    } else {
        format!("http://{}:{}{}", host, port, path)
    }
}
