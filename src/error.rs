use thiserror::Error;

/// Main error type for the corral supervisor
#[derive(Debug, Error)]
pub enum CorralError {
    // Discovery errors
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    // Lifecycle errors
    #[error("Failed to start service {0}: {1}")]
    StartError(String, String),

    #[error("Service {0} is already running")]
    AlreadyRunning(String),

    #[error("Failed to stop service {0}: {1}")]
    StopError(String, String),

    #[error("Port allocation failed: {0}")]
    PortExhausted(String),

    // Observation errors
    #[error("Health probe failed for {0}: {1}")]
    ProbeError(String, String),

    #[error("Alert sink delivery failed: {0}")]
    AlertSinkError(String),

    // Durable state
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    // IPC-related errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Failed to connect to daemon: {0}")]
    ConnectionError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("Daemon is not running")]
    DaemonNotRunning,

    #[error("Daemon already running with PID {0}")]
    DaemonAlreadyRunning(u32),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Log-related errors
    #[error("Log error: {0}")]
    LogError(String),

    #[error("Log rotation failed: {0}")]
    LogRotationError(String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CorralError {
    fn from(err: serde_json::Error) -> Self {
        CorralError::SerializationError(err.to_string())
    }
}

/// Result type alias for corral operations
pub type Result<T> = std::result::Result<T, CorralError>;
