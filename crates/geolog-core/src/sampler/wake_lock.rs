//! Keeping the machine awake while continuous tracking runs.

use std::fmt;
use std::io;
use std::process::Stdio;

use tokio::process::Command;

/// Held while sleep is inhibited; released on drop.
pub struct WakeLock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl WakeLock {
    /// A lock that runs `release` exactly once when dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A lock that does nothing.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl fmt::Debug for WakeLock {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WakeLock")
            .field("held", &self.release.is_some())
            .finish()
    }
}

impl Drop for WakeLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Platform hook for preventing idle sleep.
pub trait SleepInhibitor: Send + Sync {
    fn acquire(&self, reason: &str) -> io::Result<WakeLock>;
}

/// Inhibits sleep by holding a `systemd-inhibit` child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemdInhibitor;

impl SleepInhibitor for SystemdInhibitor {
    fn acquire(&self, reason: &str) -> io::Result<WakeLock> {
        let mut child = Command::new("systemd-inhibit")
            .args([
                "--what=sleep:idle",
                "--who=geolog",
                "--mode=block",
            ])
            .arg(format!("--why={reason}"))
            .args(["sleep", "infinity"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        tracing::debug!(pid = child.id(), "Acquired wake lock");
        Ok(WakeLock::new(move || {
            if let Err(error) = child.start_kill() {
                tracing::debug!("Wake lock process already exited: {}", error);
            } else {
                tracing::debug!("Released wake lock");
            }
        }))
    }
}

/// Never inhibits anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInhibitor;

impl SleepInhibitor for NoopInhibitor {
    fn acquire(&self, _reason: &str) -> io::Result<WakeLock> {
        Ok(WakeLock::noop())
    }
}
