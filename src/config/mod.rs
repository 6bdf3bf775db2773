use crate::error::{CorralError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "corral.toml";

/// Top-level configuration for the supervisor daemon and CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorralConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub logs: LogsConfig,
}

/// Process lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Directory whose subdirectories are candidate services
    #[serde(default = "default_services_root")]
    pub services_root: PathBuf,

    /// Directory for the PID table, metrics snapshots, alert log and socket
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Host the services bind to; also used by the health prober
    #[serde(default = "default_host")]
    pub host: String,

    /// First port handed out by the allocator
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Environment variable carrying the assigned port
    #[serde(default = "default_port_env")]
    pub port_env: String,

    /// Environment variable carrying the bind host
    #[serde(default = "default_host_env")]
    pub host_env: String,

    /// Extra environment passed to every service
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Entrypoint detection rules, tried in order
    #[serde(default = "default_entrypoints")]
    pub entrypoints: Vec<EntrypointRule>,

    /// Services that are discovered but never started by `start_all`
    #[serde(default)]
    pub disabled: Vec<String>,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// How long a fresh process must stay alive before it counts as running
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,

    /// Also require the assigned port to accept connections before running
    #[serde(default)]
    pub wait_for_port: bool,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Stop every tracked service when the daemon exits
    #[serde(default = "default_true")]
    pub shutdown_on_exit: bool,

    /// Hard ceiling on the whole exit-time shutdown
    #[serde(default = "default_shutdown_ceiling")]
    pub shutdown_ceiling_secs: u64,

    /// Start every enabled service once the daemon is up
    #[serde(default)]
    pub start_on_boot: bool,

    #[serde(default)]
    pub restart: RestartConfig,
}

/// One way of recognising a runnable service directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrypointRule {
    /// File name looked up inside the service directory
    pub file: String,

    /// Interpreter used to run the file; `None` runs the file directly
    #[serde(default)]
    pub interpreter: Option<String>,
}

impl EntrypointRule {
    pub fn new(file: &str, interpreter: Option<&str>) -> Self {
        Self {
            file: file.to_string(),
            interpreter: interpreter.map(|s| s.to_string()),
        }
    }
}

/// Automatic restart policy for crashed services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Maximum restarts allowed inside `window_secs`
    #[serde(default = "default_max_restarts")]
    pub max_restarts: usize,

    #[serde(default = "default_restart_window")]
    pub window_secs: u64,

    /// Initial backoff, doubled on every restart up to `max_delay_secs`
    #[serde(default = "default_restart_delay")]
    pub delay_secs: u64,

    #[serde(default = "default_max_restart_delay")]
    pub max_delay_secs: u64,
}

/// Health prober settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,

    /// HTTP path probed after the TCP check; `None` checks the port only
    #[serde(default = "default_health_path")]
    pub path: Option<String>,

    /// Consecutive unreachable results before a service is considered down
    #[serde(default = "default_down_after")]
    pub down_after: u32,

    /// Upper bound on checks in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// Metrics collector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,

    /// Samples kept per service
    #[serde(default = "default_metrics_capacity")]
    pub capacity: usize,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

/// Alert evaluator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,

    #[serde(default = "default_response_time_threshold")]
    pub response_time_threshold_ms: u64,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Webhook receiving every emitted alert as JSON
    #[serde(default)]
    pub sink_url: Option<String>,

    #[serde(default = "default_sink_timeout")]
    pub sink_timeout_secs: u64,
}

/// Log capture, rotation and retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// Rotation threshold, e.g. `10MB`, `512KB` or a plain byte count
    #[serde(default = "default_log_max_size")]
    pub max_size: String,

    #[serde(default = "default_backup_count")]
    pub backup_count: usize,

    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Gzip rotated files that fall off the backup window instead of deleting them
    #[serde(default = "default_true")]
    pub compress: bool,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_hours: u64,
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_services_root() -> PathBuf {
    PathBuf::from("services")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".corral")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_base_port() -> u16 {
    8000
}

fn default_port_env() -> String {
    "PORT".to_string()
}

fn default_host_env() -> String {
    "HOST".to_string()
}

fn default_entrypoints() -> Vec<EntrypointRule> {
    vec![
        EntrypointRule::new("server.py", Some("python3")),
        EntrypointRule::new("main.py", Some("python3")),
        EntrypointRule::new("run.sh", Some("sh")),
        EntrypointRule::new("server", None),
    ]
}

fn default_startup_timeout() -> u64 {
    60
}

fn default_startup_grace() -> u64 {
    300
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_shutdown_ceiling() -> u64 {
    60
}

fn default_max_restarts() -> usize {
    5
}

fn default_restart_window() -> u64 {
    300
}

fn default_restart_delay() -> u64 {
    1
}

fn default_max_restart_delay() -> u64 {
    60
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    5
}

fn default_health_path() -> Option<String> {
    Some("/health".to_string())
}

fn default_down_after() -> u32 {
    3
}

fn default_max_concurrency() -> usize {
    16
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_metrics_capacity() -> usize {
    1000
}

fn default_flush_interval() -> u64 {
    60
}

fn default_cpu_threshold() -> f64 {
    80.0
}

fn default_memory_threshold() -> f64 {
    85.0
}

fn default_response_time_threshold() -> u64 {
    5000
}

fn default_cooldown() -> u64 {
    300
}

fn default_sink_timeout() -> u64 {
    5
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_max_size() -> String {
    "10MB".to_string()
}

fn default_backup_count() -> usize {
    5
}

fn default_retention_days() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    24
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            services_root: default_services_root(),
            state_dir: default_state_dir(),
            host: default_host(),
            base_port: default_base_port(),
            port_env: default_port_env(),
            host_env: default_host_env(),
            env: HashMap::new(),
            entrypoints: default_entrypoints(),
            disabled: Vec::new(),
            startup_timeout_secs: default_startup_timeout(),
            startup_grace_ms: default_startup_grace(),
            wait_for_port: false,
            shutdown_timeout_secs: default_shutdown_timeout(),
            shutdown_on_exit: true,
            shutdown_ceiling_secs: default_shutdown_ceiling(),
            start_on_boot: false,
            restart: RestartConfig::default(),
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_restarts: default_max_restarts(),
            window_secs: default_restart_window(),
            delay_secs: default_restart_delay(),
            max_delay_secs: default_max_restart_delay(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval(),
            timeout_secs: default_health_timeout(),
            path: default_health_path(),
            down_after: default_down_after(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval(),
            capacity: default_metrics_capacity(),
            flush_interval_secs: default_flush_interval(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            response_time_threshold_ms: default_response_time_threshold(),
            cooldown_secs: default_cooldown(),
            sink_url: None,
            sink_timeout_secs: default_sink_timeout(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            max_size: default_log_max_size(),
            backup_count: default_backup_count(),
            retention_days: default_retention_days(),
            compress: true,
            sweep_interval_hours: default_sweep_interval(),
        }
    }
}

impl CorralConfig {
    /// Load configuration from a TOML file, then apply `CORRAL_*` overrides
    /// from the process environment.
    ///
    /// A missing file is not an error when `required` is false; defaults are
    /// used instead.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else if required {
            return Err(CorralError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file without environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CorralError::ConfigError(format!("Failed to read config file: {}", e)))?;
        Self::parse_toml(&contents)
    }

    /// Parse TOML configuration text
    pub fn parse_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| CorralError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    /// Apply `CORRAL_*` overrides from the given variables.
    ///
    /// Unknown `CORRAL_*` keys are ignored; known keys with unparsable values
    /// are rejected.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("CORRAL_") else {
                continue;
            };

            match name {
                "SERVICES_ROOT" => self.supervisor.services_root = PathBuf::from(&value),
                "STATE_DIR" => self.supervisor.state_dir = PathBuf::from(&value),
                "HOST" => self.supervisor.host = value,
                "BASE_PORT" => self.supervisor.base_port = parse_env(&key, &value)?,
                "STARTUP_TIMEOUT" => {
                    self.supervisor.startup_timeout_secs = parse_env(&key, &value)?
                }
                "SHUTDOWN_TIMEOUT" => {
                    self.supervisor.shutdown_timeout_secs = parse_env(&key, &value)?
                }
                "SHUTDOWN_ON_EXIT" => self.supervisor.shutdown_on_exit = parse_bool(&key, &value)?,
                "START_ON_BOOT" => self.supervisor.start_on_boot = parse_bool(&key, &value)?,
                "HEALTH_INTERVAL" => self.health.interval_secs = parse_env(&key, &value)?,
                "HEALTH_TIMEOUT" => self.health.timeout_secs = parse_env(&key, &value)?,
                "HEALTH_PATH" => {
                    self.health.path = if value.is_empty() { None } else { Some(value) }
                }
                "CPU_THRESHOLD" => self.alerts.cpu_threshold = parse_env(&key, &value)?,
                "MEMORY_THRESHOLD" => self.alerts.memory_threshold = parse_env(&key, &value)?,
                "RESPONSE_TIME_THRESHOLD" => {
                    self.alerts.response_time_threshold_ms = parse_env(&key, &value)?
                }
                "ALERT_SINK_URL" => {
                    self.alerts.sink_url = if value.is_empty() { None } else { Some(value) }
                }
                "LOG_DIR" => self.logs.dir = PathBuf::from(&value),
                "LOG_MAX_SIZE" => self.logs.max_size = value,
                "LOG_BACKUP_COUNT" => self.logs.backup_count = parse_env(&key, &value)?,
                "LOG_RETENTION_DAYS" => self.logs.retention_days = parse_env(&key, &value)?,
                _ => {}
            }
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let s = &self.supervisor;

        if s.base_port == 0 {
            return Err(CorralError::ConfigValidationError(
                "base_port must be greater than 0".to_string(),
            ));
        }

        if s.entrypoints.is_empty() {
            return Err(CorralError::ConfigValidationError(
                "at least one entrypoint rule is required".to_string(),
            ));
        }

        for (field, value) in [
            ("startup_timeout_secs", s.startup_timeout_secs),
            ("shutdown_timeout_secs", s.shutdown_timeout_secs),
            ("shutdown_ceiling_secs", s.shutdown_ceiling_secs),
            ("health.interval_secs", self.health.interval_secs),
            ("health.timeout_secs", self.health.timeout_secs),
            ("metrics.interval_secs", self.metrics.interval_secs),
            ("metrics.flush_interval_secs", self.metrics.flush_interval_secs),
            ("logs.sweep_interval_hours", self.logs.sweep_interval_hours),
        ] {
            if value == 0 {
                return Err(CorralError::ConfigValidationError(format!(
                    "{} must be greater than 0",
                    field
                )));
            }
        }

        if self.metrics.capacity == 0 {
            return Err(CorralError::ConfigValidationError(
                "metrics.capacity must be at least 1".to_string(),
            ));
        }

        if self.health.down_after == 0 || self.health.max_concurrency == 0 {
            return Err(CorralError::ConfigValidationError(
                "health.down_after and health.max_concurrency must be at least 1".to_string(),
            ));
        }

        for (field, value) in [
            ("cpu_threshold", self.alerts.cpu_threshold),
            ("memory_threshold", self.alerts.memory_threshold),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(CorralError::ConfigValidationError(format!(
                    "alerts.{} must be in (0, 100], got {}",
                    field, value
                )));
            }
        }

        if let Some(path) = &self.health.path {
            if !path.starts_with('/') {
                return Err(CorralError::ConfigValidationError(format!(
                    "health.path must start with '/': {}",
                    path
                )));
            }
        }

        self.logs.max_size_bytes()?;

        Ok(())
    }

    /// Path of the durable PID table
    pub fn pid_table_path(&self) -> PathBuf {
        self.supervisor.state_dir.join("pids.json")
    }

    /// Directory holding per-service metrics snapshots
    pub fn metrics_dir(&self) -> PathBuf {
        self.supervisor.state_dir.join("metrics")
    }

    /// Path of the JSON-lines alert log
    pub fn alert_log_path(&self) -> PathBuf {
        self.supervisor.state_dir.join("alerts.jsonl")
    }

    /// Path of the daemon's IPC socket
    pub fn socket_path(&self) -> PathBuf {
        self.supervisor.state_dir.join("corrald.sock")
    }

    /// Path of the daemon's own PID file
    pub fn daemon_pid_path(&self) -> PathBuf {
        self.supervisor.state_dir.join("corrald.pid")
    }
}

impl SupervisorConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn shutdown_ceiling(&self) -> Duration {
        Duration::from_secs(self.shutdown_ceiling_secs)
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl MetricsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl AlertsConfig {
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}

impl LogsConfig {
    /// Rotation threshold in bytes
    pub fn max_size_bytes(&self) -> Result<u64> {
        parse_size(&self.max_size)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_hours * 3600)
    }
}

/// Parse a human size such as `10MB`, `512 KB`, `1gb` or `4096`
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim().to_ascii_uppercase();
    let (digits, multiplier) = if let Some(n) = trimmed.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = trimmed.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = trimmed.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = trimmed.strip_suffix('B') {
        (n, 1)
    } else {
        (trimmed.as_str(), 1)
    };

    let value: u64 = digits.trim().parse().map_err(|_| {
        CorralError::ConfigValidationError(format!("Invalid size: {}", input))
    })?;

    if value == 0 {
        return Err(CorralError::ConfigValidationError(format!(
            "Size must be greater than 0: {}",
            input
        )));
    }

    Ok(value * multiplier)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CorralError::ConfigError(format!("Invalid value for {}: {}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CorralError::ConfigError(format!(
            "Invalid boolean for {}: {}",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = CorralConfig::default();
        assert_eq!(config.supervisor.base_port, 8000);
        assert_eq!(config.supervisor.startup_timeout_secs, 60);
        assert_eq!(config.supervisor.shutdown_timeout_secs, 30);
        assert!(config.supervisor.shutdown_on_exit);
        assert_eq!(config.health.interval_secs, 30);
        assert_eq!(config.health.path.as_deref(), Some("/health"));
        assert_eq!(config.metrics.capacity, 1000);
        assert_eq!(config.alerts.cpu_threshold, 80.0);
        assert_eq!(config.alerts.memory_threshold, 85.0);
        assert_eq!(config.alerts.response_time_threshold_ms, 5000);
        assert_eq!(config.logs.backup_count, 5);
        assert_eq!(config.logs.retention_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
[supervisor]
base_port = 9100
disabled = ["legacy"]

[[supervisor.entrypoints]]
file = "start.sh"
interpreter = "bash"

[supervisor.restart]
enabled = true
max_restarts = 2

[health]
path = "/ready"

[logs]
max_size = "1MB"
"#;

        let config = CorralConfig::parse_toml(toml).unwrap();
        assert_eq!(config.supervisor.base_port, 9100);
        assert_eq!(config.supervisor.disabled, vec!["legacy".to_string()]);
        assert_eq!(
            config.supervisor.entrypoints,
            vec![EntrypointRule::new("start.sh", Some("bash"))]
        );
        assert!(config.supervisor.restart.enabled);
        assert_eq!(config.supervisor.restart.max_restarts, 2);
        assert_eq!(config.supervisor.restart.window_secs, 300);
        assert_eq!(config.health.path.as_deref(), Some("/ready"));
        assert_eq!(config.logs.max_size_bytes().unwrap(), 1024 * 1024);
        // Untouched sections keep their defaults
        assert_eq!(config.metrics.interval_secs, 10);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = CorralConfig::parse_toml("[supervisor\nbase_port = ");
        assert!(matches!(result, Err(CorralError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.toml");

        assert!(CorralConfig::load(&path, true).is_err());
        assert!(CorralConfig::load(&path, false).is_ok());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corral.toml");
        fs::write(&path, "[alerts]\ncooldown_secs = 60\n").unwrap();

        let config = CorralConfig::from_file(&path).unwrap();
        assert_eq!(config.alerts.cooldown_secs, 60);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CorralConfig::default();
        config
            .apply_env_overrides(vars(&[
                ("CORRAL_BASE_PORT", "9000"),
                ("CORRAL_CPU_THRESHOLD", "70.5"),
                ("CORRAL_SHUTDOWN_ON_EXIT", "false"),
                ("CORRAL_HEALTH_PATH", ""),
                ("CORRAL_LOG_MAX_SIZE", "2MB"),
                ("CORRAL_UNKNOWN", "ignored"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();

        assert_eq!(config.supervisor.base_port, 9000);
        assert_eq!(config.alerts.cpu_threshold, 70.5);
        assert!(!config.supervisor.shutdown_on_exit);
        assert!(config.health.path.is_none());
        assert_eq!(config.logs.max_size_bytes().unwrap(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_env_override_invalid_value() {
        let mut config = CorralConfig::default();
        let result = config.apply_env_overrides(vars(&[("CORRAL_BASE_PORT", "eighty")]));
        assert!(matches!(result, Err(CorralError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CorralConfig::default();
        config.metrics.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = CorralConfig::default();
        config.alerts.cpu_threshold = 150.0;
        assert!(config.validate().is_err());

        let mut config = CorralConfig::default();
        config.health.path = Some("health".to_string());
        assert!(config.validate().is_err());

        let mut config = CorralConfig::default();
        config.logs.max_size = "lots".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("10MB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("512 kb").unwrap(), 512 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("100B").unwrap(), 100);
        assert!(parse_size("0MB").is_err());
        assert!(parse_size("MB").is_err());
    }

    #[test]
    fn test_state_paths() {
        let mut config = CorralConfig::default();
        config.supervisor.state_dir = PathBuf::from("/var/lib/corral");

        assert_eq!(config.pid_table_path(), PathBuf::from("/var/lib/corral/pids.json"));
        assert_eq!(config.metrics_dir(), PathBuf::from("/var/lib/corral/metrics"));
        assert_eq!(config.socket_path(), PathBuf::from("/var/lib/corral/corrald.sock"));
    }
}
