// Detach corrald from the terminal

use crate::error::{CorralError, Result};
use nix::unistd::{fork, setsid, ForkResult};
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;

/// Double-fork into the background with stdio on /dev/null.
///
/// Must run before the async runtime starts: only the calling thread
/// survives a fork. The working directory is kept so relative paths in the
/// configuration keep their meaning.
pub fn daemonize() -> Result<()> {
    // SAFETY: called from a single-threaded process before any runtime exists
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(e) => return Err(CorralError::Io(e.into())),
    }

    setsid().map_err(|e| CorralError::Io(e.into()))?;

    // Not a session leader, so no controlling terminal can be acquired
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(e) => return Err(CorralError::Io(e.into())),
    }

    let devnull = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let fd = devnull.as_raw_fd();

    use nix::libc;
    unsafe {
        libc::dup2(fd, libc::STDIN_FILENO);
        libc::dup2(fd, libc::STDOUT_FILENO);
        libc::dup2(fd, libc::STDERR_FILENO);
    }

    Ok(())
}
