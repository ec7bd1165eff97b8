//! Signal delivery and bounded waits for child processes

use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Send SIGTERM (or equivalent) for graceful shutdown
pub(crate) fn terminate(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(child.id() as i32);
        signal::kill(pid, Signal::SIGTERM)
            .map_err(|e| Error::signal_failed(15, e.to_string()))?;
    }

    #[cfg(not(unix))]
    {
        child
            .kill()
            .map_err(|e| Error::signal_failed(-1, e.to_string()))?;
    }

    Ok(())
}

/// Send SIGKILL (or equivalent) to forcefully stop the process
pub(crate) fn kill(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(child.id() as i32);
        signal::kill(pid, Signal::SIGKILL)
            .map_err(|e| Error::signal_failed(9, e.to_string()))?;
    }

    #[cfg(not(unix))]
    {
        child
            .kill()
            .map_err(|e| Error::signal_failed(-1, e.to_string()))?;
    }

    Ok(())
}

/// Send SIGINT to interrupt the process
pub(crate) fn interrupt(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(child.id() as i32);
        signal::kill(pid, Signal::SIGINT)
            .map_err(|e| Error::signal_failed(2, e.to_string()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = child;
        Err(Error::signal_failed(-1, "SIGINT not supported on this platform"))
    }
}

/// Wait for the child to exit, giving up after `timeout`
///
/// Running out of time is `Ok(None)`, not an error.
pub(crate) fn wait_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    wait_timeout_with(|| Ok(child.try_wait()?), timeout)
}

/// [`wait_timeout`] driven by an arbitrary non-blocking status check
pub(crate) fn wait_timeout_with<F>(mut try_wait: F, timeout: Duration) -> Result<Option<ExitStatus>>
where
    F: FnMut() -> Result<Option<ExitStatus>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(WAIT_POLL.min(deadline - now));
    }
}

/// Exit code of a finished child; on Unix a signal death maps to `-signal`
pub fn exit_code(status: &ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|signal| -signal)
    }

    #[cfg(not(unix))]
    {
        None
    }
}
