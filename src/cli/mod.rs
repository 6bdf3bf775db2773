// CLI module - User-facing command-line interface

mod output;

use crate::alerts::AlertLog;
use crate::config::{CorralConfig, DEFAULT_CONFIG_FILE};
use crate::daemon::DaemonManager;
use crate::error::{CorralError, Result};
use crate::ipc::{Command, IpcClient, ResponseData, DEFAULT_LOG_LINES};
use crate::metrics;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of metric samples shown
const DEFAULT_METRIC_SAMPLES: usize = 20;

/// Default number of alerts shown
const DEFAULT_ALERTS: usize = 20;

/// Default report window in hours
const DEFAULT_REPORT_HOURS: u32 = 24;

/// Name of the daemon executable looked up next to the CLI
const DAEMON_BINARY: &str = "corrald";

/// Corral - supervise a directory of local services
#[derive(Parser)]
#[command(name = "corral")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "CORRAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a service
    Start {
        /// Service name (its directory under the services root)
        service: String,
    },

    /// Stop a running service
    Stop {
        service: String,

        /// Kill the process group immediately (SIGKILL)
        #[arg(short, long)]
        force: bool,
    },

    /// Restart a service on a new process
    Restart {
        service: String,

        /// Kill the old process immediately (SIGKILL)
        #[arg(short, long)]
        force: bool,
    },

    /// Show service status
    Status {
        /// Show a single service in detail
        service: Option<String>,
    },

    /// Show health probe results
    Health {
        service: Option<String>,

        /// Run a fresh check instead of reporting the last probe cycle
        #[arg(long)]
        now: bool,
    },

    /// Show recent resource samples for a service
    Metrics {
        service: String,

        /// Number of samples to display
        #[arg(short, long, default_value_t = DEFAULT_METRIC_SAMPLES)]
        limit: usize,
    },

    /// Show recent alerts
    Alerts {
        #[arg(short, long, default_value_t = DEFAULT_ALERTS)]
        limit: usize,
    },

    /// Summarise uptime, resource usage and alerts per service
    Report {
        /// Window to summarise, in hours back from now
        #[arg(long, default_value_t = DEFAULT_REPORT_HOURS)]
        hours: u32,
    },

    /// View service logs
    Logs {
        service: String,

        /// Number of lines to display
        #[arg(short = 'n', long, default_value_t = DEFAULT_LOG_LINES)]
        lines: usize,
    },

    /// List log files
    LogFiles { service: Option<String> },

    /// Start every enabled service
    StartAll,

    /// Stop every running service
    StopAll {
        #[arg(short, long)]
        force: bool,
    },

    /// Restart every running service
    RestartAll {
        #[arg(short, long)]
        force: bool,
    },

    /// Rescan the services root
    Discover,

    /// Ask the daemon to shut down
    Shutdown,

    /// Manage the daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon in the background
    Start,
    /// Stop the daemon
    Stop,
    /// Check daemon status
    Status,
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    /// Execute the parsed command
    fn execute(&self) -> Result<()> {
        let config = self.load_config().inspect_err(|e| output::print_error(&e.to_string()))?;

        match &self.command {
            Commands::Daemon { command } => return self.execute_daemon(command, &config),
            Commands::Report { hours } => {
                return print_report(&config, *hours)
                    .inspect_err(|e| output::print_error(&e.to_string()))
            }
            _ => {}
        }

        let command = self.build_command();
        let client = IpcClient::with_socket_path(config.socket_path());

        let spinner = command
            .is_mutating()
            .then(|| output::create_progress_bar("Waiting for daemon..."));
        let result = client.request(command);
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }

        match result {
            Ok(data) => {
                output::print_success(&data);
                Ok(())
            }
            Err(CorralError::DaemonNotRunning) => {
                // Metrics snapshots on disk remain readable without a daemon
                if let Commands::Metrics { service, limit } = &self.command {
                    return print_snapshot(&config.metrics_dir(), service, *limit)
                        .inspect_err(|e| output::print_error(&e.to_string()));
                }
                output::print_error("Daemon is not running. Start it with `corral daemon start`");
                Err(CorralError::DaemonNotRunning)
            }
            Err(e) => {
                output::print_error(&e.to_string());
                Err(e)
            }
        }
    }

    fn load_config(&self) -> Result<CorralConfig> {
        match &self.config {
            Some(path) => CorralConfig::load(path, true),
            None => CorralConfig::load(Path::new(DEFAULT_CONFIG_FILE), false),
        }
    }

    /// Build an IPC command from the CLI arguments
    fn build_command(&self) -> Command {
        match &self.command {
            Commands::Start { service } => Command::Start {
                service: service.clone(),
            },

            Commands::Stop { service, force } => Command::Stop {
                service: service.clone(),
                graceful: !force,
            },

            Commands::Restart { service, force } => Command::Restart {
                service: service.clone(),
                graceful: !force,
            },

            Commands::Status { service } => Command::Status {
                service: service.clone(),
            },

            Commands::Health { service, now } => Command::Health {
                service: service.clone(),
                check_now: *now,
            },

            Commands::Metrics { service, limit } => Command::Metrics {
                service: service.clone(),
                limit: *limit,
            },

            Commands::Alerts { limit } => Command::Alerts { limit: *limit },

            Commands::Logs { service, lines } => Command::Logs {
                service: service.clone(),
                lines: *lines,
            },

            Commands::LogFiles { service } => Command::LogFiles {
                service: service.clone(),
            },

            Commands::StartAll => Command::StartAll,
            Commands::StopAll { force } => Command::StopAll { graceful: !force },
            Commands::RestartAll { force } => Command::RestartAll { graceful: !force },
            Commands::Discover => Command::Discover,
            Commands::Shutdown => Command::Shutdown,

            // Handled locally before any request is built
            Commands::Daemon { .. } | Commands::Report { .. } => Command::Status { service: None },
        }
    }

    fn execute_daemon(&self, command: &DaemonCommands, config: &CorralConfig) -> Result<()> {
        let manager = DaemonManager::new(config.daemon_pid_path(), config.socket_path());

        match command {
            DaemonCommands::Start => {
                let binary = daemon_binary()?;
                let pb = output::create_progress_bar("Starting daemon...");
                match manager.start(&binary, self.config.as_deref()) {
                    Ok(pid) => {
                        output::finish_progress_success(
                            pb,
                            &format!("Daemon started (PID {})", pid),
                        );
                        Ok(())
                    }
                    Err(e) => {
                        output::finish_progress_error(pb, &e.to_string());
                        Err(e)
                    }
                }
            }

            DaemonCommands::Stop => {
                let timeout = config.supervisor.shutdown_ceiling() + Duration::from_secs(5);
                let pb = output::create_progress_bar("Stopping daemon...");
                match manager.stop(timeout) {
                    Ok(()) => {
                        output::finish_progress_success(pb, "Daemon stopped");
                        Ok(())
                    }
                    Err(e) => {
                        output::finish_progress_error(pb, &e.to_string());
                        Err(e)
                    }
                }
            }

            DaemonCommands::Status => {
                output::print_daemon_status(&manager.get_status());
                Ok(())
            }
        }
    }
}

/// corrald is expected next to the corral executable, falling back to PATH
fn daemon_binary() -> Result<PathBuf> {
    let sibling = std::env::current_exe()?.with_file_name(DAEMON_BINARY);
    if sibling.exists() {
        Ok(sibling)
    } else {
        Ok(PathBuf::from(DAEMON_BINARY))
    }
}

fn print_snapshot(dir: &Path, service: &str, limit: usize) -> Result<()> {
    let snapshot = metrics::load_snapshot(dir, service)?;
    output::print_info(&format!(
        "Daemon is not running; showing snapshot from {}",
        snapshot.updated_at.format("%Y-%m-%d %H:%M:%S")
    ));

    let skip = snapshot.samples.len().saturating_sub(limit);
    let samples = snapshot.samples.into_iter().skip(skip).collect();
    output::print_success(&ResponseData::Metrics {
        service: snapshot.service,
        samples,
    });
    Ok(())
}

/// Start of a window reaching `hours` back from `now`
fn report_window_start(now: DateTime<Utc>, hours: u32) -> DateTime<Utc> {
    now.checked_sub_signed(chrono::Duration::hours(i64::from(hours)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Build the report from files on disk; the daemon need not be running
fn print_report(config: &CorralConfig, hours: u32) -> Result<()> {
    let since = report_window_start(Utc::now(), hours);
    let snapshots = metrics::load_snapshots(&config.metrics_dir())?;

    let log = AlertLog::with_max_size(config.alert_log_path(), config.logs.max_size_bytes()?);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let alerts = runtime.block_on(log.since(since))?;

    output::print_report(hours, &metrics::build_report(&snapshots, &alerts, since));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_force_disables_graceful_stop() {
        let cli = parse(&["corral", "stop", "web", "--force"]);
        assert_eq!(
            cli.build_command(),
            Command::Stop {
                service: "web".to_string(),
                graceful: false
            }
        );

        let cli = parse(&["corral", "stop-all"]);
        assert_eq!(cli.build_command(), Command::StopAll { graceful: true });
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["corral", "logs", "api"]);
        assert_eq!(
            cli.build_command(),
            Command::Logs {
                service: "api".to_string(),
                lines: DEFAULT_LOG_LINES
            }
        );

        let cli = parse(&["corral", "health", "--now", "api"]);
        assert_eq!(
            cli.build_command(),
            Command::Health {
                service: Some("api".to_string()),
                check_now: true
            }
        );
    }

    #[test]
    fn test_global_config_flag() {
        let cli = parse(&["corral", "status", "--config", "/etc/corral.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/corral.toml")));
        assert_eq!(cli.build_command(), Command::Status { service: None });
    }

    #[test]
    fn test_report_hours() {
        let cli = parse(&["corral", "report"]);
        assert!(matches!(cli.command, Commands::Report { hours: DEFAULT_REPORT_HOURS }));

        let cli = parse(&["corral", "report", "--hours", "6"]);
        assert!(matches!(cli.command, Commands::Report { hours: 6 }));
        assert!(Cli::try_parse_from(["corral", "report", "--hours", "-1"]).is_err());

        let now = Utc::now();
        assert_eq!(now - report_window_start(now, 6), chrono::Duration::hours(6));
        // Windows reaching past the representable range start at the earliest instant
        assert_eq!(report_window_start(now, u32::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_report_reads_state_without_daemon() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = CorralConfig::default();
        config.supervisor.state_dir = temp_dir.path().to_path_buf();

        let mut collector = metrics::MetricsCollector::with_capacity(10);
        collector.push("web", metrics::MetricSample::new(4.0, 8.0));
        assert_eq!(collector.flush(&config.metrics_dir()), 1);

        print_report(&config, 24).unwrap();
    }

    #[test]
    fn test_missing_service_is_rejected() {
        assert!(Cli::try_parse_from(["corral", "start"]).is_err());
    }

    #[test]
    fn test_snapshot_fallback_reads_disk() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut collector = metrics::MetricsCollector::with_capacity(10);
        collector.push("web", metrics::MetricSample::new(1.0, 2.0));
        assert_eq!(collector.flush(temp_dir.path()), 1);

        print_snapshot(temp_dir.path(), "web", 5).unwrap();
        assert!(print_snapshot(temp_dir.path(), "ghost", 5).is_err());
    }
}
