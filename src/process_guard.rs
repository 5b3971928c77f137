//! Child process lifecycle.
//!
//! Package managers, initdb and psql run as children of the reconciler. An
//! interrupted run must not leave them mutating the host behind its back, so:
//!
//! - every child gets its own process group and a parent-death signal
//! - every running child is tracked, by pid and program name
//! - on SIGINT/SIGTERM/SIGHUP, or when the [`ProcessGuard`] drops, tracked
//!   groups are asked to stop and killed if they outlive a grace period

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// How long children get after SIGTERM when a run ends normally
pub const DROP_GRACE: Duration = Duration::from_secs(5);
/// How long children get after SIGTERM when the reconciler is signalled
pub const SIGNAL_GRACE: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Running children, keyed by pid (which is also their process group id)
#[derive(Debug, Default)]
pub struct ChildRegistry {
    children: BTreeMap<u32, String>,
    /// Set by the first shutdown; later registrations are stopped at once
    shutting_down: bool,
}

impl ChildRegistry {
    /// The process-wide registry shared with the signal handler thread
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32, program: &str) {
        if self.shutting_down {
            // Spawned while a shutdown was in progress
            tracing::warn!("Stopping {} (pid {}) started during shutdown", program, pid);
            stop_group(pid, Signal::SIGKILL);
            return;
        }
        tracing::debug!("Tracking {} (pid {})", program, pid);
        self.children.insert(pid, program.to_string());
    }

    pub fn unregister(&mut self, pid: u32) {
        if let Some(program) = self.children.remove(&pid) {
            tracing::debug!("{} (pid {}) finished", program, pid);
        }
    }

    pub fn count(&self) -> usize {
        self.children.len()
    }

    /// Stop every tracked child: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Returns the number of children that had to be stopped. Only the
    /// first call does anything.
    pub fn shutdown(&mut self, grace: Duration) -> usize {
        if self.shutting_down {
            return 0;
        }
        self.shutting_down = true;

        let children = std::mem::take(&mut self.children);
        if children.is_empty() {
            return 0;
        }

        for (pid, program) in &children {
            tracing::warn!("Stopping {} (pid {})", program, pid);
            stop_group(*pid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + grace;
        let mut survivors: Vec<(&u32, &String)> = children.iter().collect();
        while !survivors.is_empty() && Instant::now() < deadline {
            std::thread::sleep(POLL_INTERVAL);
            survivors.retain(|(pid, _)| is_running(**pid));
        }

        for (pid, program) in survivors {
            tracing::warn!("{} (pid {}) ignored SIGTERM, killing it", program, pid);
            stop_group(*pid, Signal::SIGKILL);
        }

        children.len()
    }
}

/// Signal a child's whole group, so grandchildren (dpkg under apt-get,
/// postgres under initdb) stop too; fall back to the child alone
fn stop_group(pid: u32, sig: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if signal::kill(Pid::from_raw(-raw), sig).is_err() {
        let _ = signal::kill(Pid::from_raw(raw), sig);
    }
}

/// Whether `pid` exists and is neither a zombie nor dead
fn is_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if signal::kill(Pid::from_raw(raw), None).is_err() {
        return false;
    }

    // /proc/<pid>/stat is "pid (comm) state ..."; comm may contain spaces
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let after_comm = stat.rsplit_once(')')?.1;
            after_comm.split_whitespace().next().map(|s| !matches!(s, "Z" | "X"))
        })
        .unwrap_or(true)
}

/// Stops whatever children are still tracked when dropped.
///
/// `main` holds one for the duration of a run.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            let stopped = registry.shutdown(DROP_GRACE);
            if stopped > 0 {
                tracing::warn!("Stopped {} leftover child process(es)", stopped);
            }
        }
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// The first signal stops tracked children and exits with `128 + signal`.
/// The host is left as the last completed command left it; re-running
/// converges from there.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                tracing::warn!("Received signal {}, abandoning reconciliation", sig);
                if let Ok(mut registry) = ChildRegistry::global().lock() {
                    registry.shutdown(SIGNAL_GRACE);
                }
                std::process::exit(128 + sig);
            }
        })?;

    Ok(())
}

/// Spawn setup for reconciler children
pub trait CommandProcessGroup {
    /// Put the child in a new process group and have it receive SIGTERM if
    /// the reconciler dies
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid and prctl are async-signal-safe
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
