// src/install/process.rs

//! Locating and stopping a previously installed server
//!
//! The running server records its PID in `data/server.pid`. Liveness is
//! checked with signal 0; termination sends `SIGTERM`, waits, then falls
//! back to `SIGKILL`.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// PID file of the running server, relative to the install root
pub const SERVER_PID_PATH: &str = "data/server.pid";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A process that may still be running
pub trait ProcessHandle {
    fn pid(&self) -> i32;
    fn is_alive(&self) -> bool;
    /// Stop the process, waiting at most `timeout` for a graceful exit
    fn terminate(&self, timeout: Duration) -> Result<()>;
}

/// Finds the server belonging to an installation
pub trait ProcessLocator {
    /// `Ok(None)` when the installation has no recorded server
    fn locate(&self, install_root: &Path) -> Result<Option<Box<dyn ProcessHandle>>>;
}

/// A POSIX process addressed by PID
#[derive(Debug, Clone, Copy)]
pub struct UnixProcess {
    pid: Pid,
}

impl UnixProcess {
    pub fn new(pid: i32) -> Result<Self> {
        if pid <= 0 {
            return Err(Error::Process(format!("invalid pid {}", pid)));
        }
        Ok(Self {
            pid: Pid::from_raw(pid),
        })
    }

    fn signal(&self, signal: Signal) -> Result<()> {
        match kill(self.pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::Process(format!(
                "cannot send {} to {}: {}",
                signal, self.pid, e
            ))),
        }
    }

    fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_alive() {
                return true;
            }
            thread::sleep(POLL_INTERVAL);
        }
        !self.is_alive()
    }
}

impl ProcessHandle for UnixProcess {
    fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    fn is_alive(&self) -> bool {
        // EPERM means the process exists but belongs to someone else
        matches!(kill(self.pid, None), Ok(()) | Err(Errno::EPERM))
    }

    fn terminate(&self, timeout: Duration) -> Result<()> {
        info!("Stopping server on PID {}", self.pid);
        self.signal(Signal::SIGTERM)?;
        if self.wait_for_exit(timeout) {
            return Ok(());
        }

        info!("Server on PID {} did not stop, killing it", self.pid);
        self.signal(Signal::SIGKILL)?;
        if self.wait_for_exit(timeout) {
            Ok(())
        } else {
            Err(Error::Process(format!("PID {} is still running", self.pid)))
        }
    }
}

/// Reads `data/server.pid` below the install root
#[derive(Debug, Default, Clone, Copy)]
pub struct PidFileLocator;

impl ProcessLocator for PidFileLocator {
    fn locate(&self, install_root: &Path) -> Result<Option<Box<dyn ProcessHandle>>> {
        let path = install_root.join(SERVER_PID_PATH);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No PID file at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Process(format!("cannot read {}: {}", path.display(), e)));
            }
        };

        let pid: i32 = content.trim().parse().map_err(|_| {
            Error::Process(format!("{} does not hold a PID", path.display()))
        })?;
        Ok(Some(Box::new(UnixProcess::new(pid)?)))
    }
}
