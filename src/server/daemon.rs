//! Detaching into the background

use crate::{AesdError, Result};
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;

/// Turn the current process into a daemon.
///
/// Forks, starts a new session, forks again so the daemon can never regain a
/// controlling terminal, and points stdin/stdout/stderr at `/dev/null`. The
/// intermediate parents exit with status 0.
///
/// Call this before any threads exist (in particular before building the
/// tokio runtime): only the calling thread survives a fork.
pub fn daemonize() -> Result<()> {
    fork_and_exit_parent("fork")?;

    // SAFETY: plain syscall, no memory is shared with the caller
    if unsafe { libc::setsid() } < 0 {
        return Err(os_error("setsid"));
    }

    fork_and_exit_parent("second fork")?;
    redirect_stdio()
}

fn fork_and_exit_parent(context: &'static str) -> Result<()> {
    // SAFETY: the process is single-threaded at this point
    match unsafe { libc::fork() } {
        -1 => Err(os_error(context)),
        0 => Ok(()),
        // SAFETY: _exit skips atexit handlers and stdio flushing that belong to the child now
        _ => unsafe { libc::_exit(0) },
    }
}

fn redirect_stdio() -> Result<()> {
    let dev_null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|source| AesdError::Daemon {
            context: "open /dev/null",
            source,
        })?;

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call
        if unsafe { libc::dup2(dev_null.as_raw_fd(), target) } < 0 {
            return Err(os_error("dup2"));
        }
    }
    Ok(())
}

fn os_error(context: &'static str) -> AesdError {
    AesdError::Daemon {
        context,
        source: io::Error::last_os_error(),
    }
}
