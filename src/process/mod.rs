// Process module - Core process lifecycle management

pub mod monitor;
pub mod ports;
pub mod restart;
pub mod signals;
pub mod spawner;
mod supervisor;
mod types;

pub use monitor::{ResourceMonitor, ResourceSnapshot};
pub use ports::PortAllocator;
pub use restart::{Backoff, RestartPolicy, RestartTracker};
pub use spawner::{spawn_service, SpawnOptions, SpawnedProcess};
pub use supervisor::{DiscoveryReport, ReconcileReport, RunningService, Supervisor};
pub use types::{
    BulkResult, CrashReport, ManagedProcess, ProcessRecord, ProcessStatus, ServiceStatus,
    StopOutcome,
};
