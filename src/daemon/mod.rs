// Daemon module - corrald runtime and its lifecycle

pub mod daemonize;
pub mod manager;
pub mod pid;
mod runtime;

pub use daemonize::daemonize;
pub use manager::{DaemonManager, DaemonStatus};
pub use pid::{PidFile, PidGuard};
pub use runtime::Daemon;
