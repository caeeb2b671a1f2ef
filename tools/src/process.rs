//! Subprocess supervision: session setup, drop guards and the kill policy.

use std::io;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::debug;

/// Grace period between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(200);

/// RAII guard that kills a child process (and its process group on Unix) on drop.
///
/// Wrap a spawned child immediately after `spawn()` so it is cleaned up if the
/// owning future is dropped. Call `disarm()` once the process has been reaped.
pub struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child, armed: true }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        #[cfg(unix)]
        if let Some(pid) = self.child.id()
            && signal_process_group(pid, libc::SIGKILL).is_err()
        {
            let _ = self.child.start_kill();
        }
        #[cfg(windows)]
        {
            let _ = self.child.start_kill();
        }
        let _ = self.child.try_wait();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Signalled,
}

/// Send `signal` to the process group led by `pid`.
///
/// Children are spawned with [`set_new_session`], so the group id equals the
/// child's pid.
#[cfg(unix)]
pub fn signal_process_group(pid: u32, signal: libc::c_int) -> io::Result<KillOutcome> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) with a negative pid targets a process group; no memory is shared.
    if unsafe { libc::kill(-pgid, signal) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(KillOutcome::NotRunning);
        }
        return Err(err);
    }
    Ok(KillOutcome::Signalled)
}

/// Put the child process in its own session (Unix only) so the entire process
/// group can be signalled.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: only async-signal-safe calls run between fork and exec.
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            // Linux-only: the child dies with us instead of lingering as an orphan.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn set_new_session(_cmd: &mut Command) {}

/// Stop a running child and everything it spawned.
///
/// Unix: SIGTERM to the process group (falling back to killing only the
/// direct child if the group cannot be signalled), wait up to `grace`, then
/// SIGKILL the group if the child is still alive.
/// Windows: `taskkill /pid N /f /t`.
pub async fn terminate(
    child: &mut Child,
    grace: Duration,
    on_debug: &mut (dyn FnMut(&str) + Send),
) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };

    #[cfg(unix)]
    {
        match signal_process_group(pid, libc::SIGTERM) {
            Ok(outcome) => on_debug(&format!("SIGTERM sent to process group {pid} ({outcome:?})")),
            Err(e) => {
                on_debug(&format!(
                    "failed to signal process group {pid}: {e}; killing child only"
                ));
                child.start_kill()?;
            }
        }

        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return Ok(());
        }

        on_debug(&format!(
            "process group {pid} still alive after {}ms, sending SIGKILL",
            grace.as_millis()
        ));
        if let Err(e) = signal_process_group(pid, libc::SIGKILL) {
            debug!(pid, "SIGKILL to process group failed: {e}");
            child.start_kill()?;
        }
        Ok(())
    }

    #[cfg(windows)]
    {
        let _ = grace;
        on_debug(&format!("taskkill /pid {pid} /f /t"));
        let status = Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/f", "/t"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => Ok(()),
            _ => child.start_kill(),
        }
    }
}

/// Name of a terminating signal (`SIGTERM`, `SIGKILL`, ...).
#[cfg(unix)]
#[must_use]
pub fn signal_name(signal: i32) -> String {
    let name = match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        _ => return format!("SIG{signal}"),
    };
    name.to_string()
}

/// Terminating signal of an exited process, if any.
#[must_use]
pub fn exit_signal(status: &std::process::ExitStatus) -> Option<String> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(signal_name)
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::{set_new_session, signal_name, terminate};
    use std::process::Stdio;
    use std::time::{Duration, Instant};
    use tokio::process::Command;

    fn sleeper(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script).stdin(Stdio::null());
        set_new_session(&mut cmd);
        cmd
    }

    #[test]
    fn names_common_signals() {
        assert_eq!(signal_name(libc::SIGTERM), "SIGTERM");
        assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
        assert_eq!(signal_name(200), "SIG200");
    }

    #[tokio::test]
    async fn terminate_stops_sleeping_child() {
        let mut child = sleeper("sleep 30").spawn().unwrap();
        let started = Instant::now();
        let mut debug = |_: &str| {};
        terminate(&mut child, Duration::from_millis(200), &mut debug)
            .await
            .unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn terminate_escalates_when_term_ignored() {
        let mut child = sleeper("trap '' TERM; while :; do sleep 0.05; done")
            .spawn()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut messages = Vec::new();
        let mut debug = |msg: &str| messages.push(msg.to_string());
        terminate(&mut child, Duration::from_millis(200), &mut debug)
            .await
            .unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());
        assert!(messages.iter().any(|m| m.contains("SIGKILL")));
    }
}
