//! Termination signal handling

use crate::{AesdError, Result};
use std::io;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// SIGINT and SIGTERM listeners.
///
/// Once installed the handlers stay registered for the life of the process,
/// so a second signal arriving mid-shutdown is absorbed instead of killing
/// the process halfway through teardown.
pub struct TerminationSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl TerminationSignals {
    /// Register both handlers. Must run inside a tokio runtime.
    pub fn install() -> Result<Self> {
        let interrupt = signal(SignalKind::interrupt())
            .map_err(|e| AesdError::Setup(format!("Failed to install SIGINT handler: {}", e)))?;
        let terminate = signal(SignalKind::terminate())
            .map_err(|e| AesdError::Setup(format!("Failed to install SIGTERM handler: {}", e)))?;

        Ok(Self {
            interrupt,
            terminate,
        })
    }

    /// Wait for the next signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Keeps SIGINT and SIGTERM blocked on the calling thread until dropped.
///
/// Taken first thing in `main`, before binding, forking or starting the
/// runtime, so a signal arriving before [`TerminationSignals::install`] stays
/// pending instead of killing the process with the default action. Threads
/// spawned while the guard is held inherit the blocked mask; dropping the
/// guard unblocks the calling thread only, which then receives any pending
/// signal through the installed handlers.
pub struct TerminationSignalMask {
    previous: libc::sigset_t,
}

impl TerminationSignalMask {
    /// Block SIGINT and SIGTERM on the calling thread
    pub fn block() -> Result<Self> {
        // SAFETY: sigset_t is plain data, initialized by sigemptyset before use
        unsafe {
            let mut blocked: libc::sigset_t = std::mem::zeroed();
            let mut previous: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut blocked);
            libc::sigaddset(&mut blocked, libc::SIGINT);
            libc::sigaddset(&mut blocked, libc::SIGTERM);

            let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &blocked, &mut previous);
            if rc != 0 {
                return Err(AesdError::Setup(format!(
                    "Failed to block termination signals: {}",
                    io::Error::from_raw_os_error(rc)
                )));
            }
            Ok(Self { previous })
        }
    }
}

impl Drop for TerminationSignalMask {
    fn drop(&mut self) {
        // SAFETY: restores the mask saved by `block` on this thread
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, std::ptr::null_mut());
        }
    }
}
