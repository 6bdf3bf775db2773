// Signal helpers for process groups and liveness checks

use crate::error::{CorralError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Outcome of signalling a process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The group no longer exists
    Gone,
}

/// Send `sig` to every process in the group led by `pgid`
pub fn signal_group(pgid: u32, sig: Signal) -> Result<Delivery> {
    let pgid = to_pid(pgid)?;
    match signal::killpg(pgid, sig) {
        Ok(()) => Ok(Delivery::Delivered),
        Err(Errno::ESRCH) => Ok(Delivery::Gone),
        Err(e) => Err(CorralError::SignalError(format!(
            "Failed to send {} to process group {}: {}",
            sig, pgid, e
        ))),
    }
}

/// Check whether a PID refers to an existing process.
///
/// A process owned by another user still counts as alive.
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = to_pid(pid) else {
        return false;
    };
    match signal::kill(pid, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Check whether any member of a process group is still alive
pub fn group_alive(pgid: u32) -> bool {
    let Ok(pgid) = to_pid(pgid) else {
        return false;
    };
    match signal::killpg(pgid, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn to_pid(raw: u32) -> Result<Pid> {
    // 0 and values past i32::MAX would address other groups or every process
    match i32::try_from(raw) {
        Ok(value) if value > 0 => Ok(Pid::from_raw(value)),
        _ => Err(CorralError::SignalError(format!("Invalid PID: {}", raw))),
    }
}
