use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::process::Child;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ProcessStatus {
    /// Whether a process is expected to exist for this status
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Stopping
        )
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Stopping => write!(f, "stopping"),
            ProcessStatus::Crashed => write!(f, "crashed"),
        }
    }
}

/// The supervisor's authoritative view of one service's runtime state.
/// This is the shape persisted in the PID table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub service: String,
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub status: ProcessStatus,
    #[serde(default)]
    pub last_exit_code: Option<i32>,
    #[serde(default)]
    pub restarts: usize,
}

impl ProcessRecord {
    pub fn new(service: String, pid: u32, port: u16) -> Self {
        Self {
            service,
            pid,
            port,
            started_at: Utc::now(),
            status: ProcessStatus::Starting,
            last_exit_code: None,
            restarts: 0,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        if !self.status.is_active() {
            return 0;
        }
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

/// A record together with the OS handle the supervisor holds for it
#[derive(Debug)]
pub struct ManagedProcess {
    pub record: ProcessRecord,
    /// `None` for processes adopted from the PID table after a daemon restart
    pub child: Option<Child>,
    /// Set while a crashed record waits for its scheduled restart
    pub restart_due: Option<Instant>,
}

impl ManagedProcess {
    pub fn adopted(record: ProcessRecord) -> Self {
        Self {
            record,
            child: None,
            restart_due: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.record.pid
    }

    pub fn mark_running(&mut self) {
        self.record.status = ProcessStatus::Running;
    }

    pub fn mark_stopping(&mut self) {
        self.record.status = ProcessStatus::Stopping;
    }

    pub fn mark_crashed(&mut self, exit_code: Option<i32>) {
        self.record.status = ProcessStatus::Crashed;
        self.record.last_exit_code = exit_code;
        self.child = None;
    }
}

/// One row of a status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub port: u16,
    pub uptime_secs: u64,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub restarts: usize,
    pub last_exit_code: Option<i32>,
    pub enabled: bool,
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopOutcome {
    Stopped { exit_code: Option<i32> },
    AlreadyStopped,
}

/// A running service found dead by a probe cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub service: String,
    pub pid: u32,
    pub exit_code: Option<i32>,
    /// Whether a restart was scheduled under the restart policy
    pub restart_scheduled: bool,
}

/// Per-service result of a bulk operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkResult {
    pub service: String,
    pub ok: bool,
    pub message: String,
}
