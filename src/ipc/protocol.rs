// IPC Protocol definitions for client-daemon communication

use crate::alerts::Alert;
use crate::health::HealthReport;
use crate::logs::LogFileInfo;
use crate::metrics::MetricSample;
use crate::process::{BulkResult, ProcessRecord, ServiceStatus, StopOutcome};
use serde::{Deserialize, Serialize};

/// Default number of log lines returned by `logs`
pub const DEFAULT_LOG_LINES: usize = 100;

/// All available commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Start { service: String },
    /// `graceful = false` sends SIGKILL straight away
    Stop { service: String, graceful: bool },
    Restart { service: String, graceful: bool },
    /// One service, or every known service
    Status { service: Option<String> },
    /// Latest probe results, or a fresh on-demand check of one service
    Health { service: Option<String>, check_now: bool },
    Metrics { service: String, limit: usize },
    Alerts { limit: usize },
    Logs { service: String, lines: usize },
    /// Files in the log tree, optionally for one service
    LogFiles { service: Option<String> },
    StartAll,
    StopAll { graceful: bool },
    RestartAll { graceful: bool },
    Discover,
    Shutdown,
}

impl Command {
    /// Whether the command changes process state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::Start { .. }
                | Command::Stop { .. }
                | Command::Restart { .. }
                | Command::StartAll
                | Command::StopAll { .. }
                | Command::RestartAll { .. }
                | Command::Discover
                | Command::Shutdown
        )
    }
}

/// A directory skipped during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedService {
    pub name: String,
    pub reason: String,
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    Started(ProcessRecord),
    Stopped { service: String, outcome: StopOutcome },
    Restarted(ProcessRecord),
    Status(Vec<ServiceStatus>),
    Health(Vec<HealthReport>),
    Metrics { service: String, samples: Vec<MetricSample> },
    Alerts(Vec<Alert>),
    Logs { service: String, lines: Vec<String> },
    LogFiles(Vec<LogFileInfo>),
    /// Per-service results of a bulk operation
    Bulk(Vec<BulkResult>),
    Discovered {
        services: Vec<String>,
        skipped: Vec<SkippedService>,
    },
    /// Generic success message
    Success(String),
}

/// Request message from client to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_one_json_line() {
        let request = Request::new(
            7,
            Command::Stop {
                service: "web".to_string(),
                graceful: true,
            },
        );
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains('\n'));

        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_error_response() {
        let response = Response::error(3, "Service not found: ghost".to_string());
        let json = serde_json::to_string(&response).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, 3);
        assert_eq!(parsed.result, Err("Service not found: ghost".to_string()));
    }

    #[test]
    fn test_mutating_commands() {
        assert!(Command::StartAll.is_mutating());
        assert!(!Command::Status { service: None }.is_mutating());
        assert!(!Command::Alerts { limit: 10 }.is_mutating());
    }
}
