//! Service manager collaborator, backed by `systemctl`.

use crate::command_args::SystemctlArgs;
use crate::error::{ReconcileError, Result};
use crate::host::process::{CommandOutput, CommandSpec, ProcessExecutor, SystemExecutor};

/// Operations a service declares support for.
///
/// Without `restart` a restart is a stop followed by a start. Without
/// `status` the service's running state cannot be probed, so it is always
/// started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSupports {
    pub restart: bool,
    pub status: bool,
    pub reload: bool,
}

impl Default for ServiceSupports {
    fn default() -> Self {
        Self {
            restart: true,
            status: true,
            reload: true,
        }
    }
}

/// Service operations used by the reconciler.
pub trait ServiceManager {
    fn is_enabled(&self, service: &str) -> Result<bool>;
    fn is_active(&self, service: &str) -> Result<bool>;
    fn enable(&self, service: &str) -> Result<()>;
    fn start(&self, service: &str) -> Result<()>;
    fn stop(&self, service: &str) -> Result<()>;
    fn restart(&self, service: &str) -> Result<()>;
    fn reload(&self, service: &str) -> Result<()>;
    /// Re-read unit files after one was written
    fn daemon_reload(&self) -> Result<()>;
}

/// Interpret `systemctl is-enabled` output.
///
/// `static`, `alias` and `indirect` units cannot be enabled further and count
/// as enabled. Unknown or empty output is `None`.
pub fn parse_is_enabled(stdout: &str) -> Option<bool> {
    match stdout.trim() {
        "enabled" | "enabled-runtime" | "static" | "alias" | "indirect" | "generated" => Some(true),
        "disabled" | "masked" | "masked-runtime" | "linked" | "linked-runtime" => Some(false),
        "not-found" => Some(false),
        _ => None,
    }
}

/// Interpret `systemctl is-active` output
pub fn parse_is_active(stdout: &str) -> Option<bool> {
    match stdout.trim() {
        "active" | "reloading" | "activating" => Some(true),
        "inactive" | "failed" | "deactivating" | "unknown" => Some(false),
        _ => None,
    }
}

/// Decide a status query from its full output.
///
/// is-enabled/is-active exit non-zero for "disabled"/"inactive", so the exit
/// code alone is not an error. Output that parses to neither answer is a
/// probe error carrying stderr, e.g. when systemctl cannot reach the bus.
pub fn interpret_query(
    probe: String,
    output: &CommandOutput,
    parse: fn(&str) -> Option<bool>,
) -> Result<bool> {
    parse(&output.stdout).ok_or_else(|| {
        let reason = match (output.stderr.trim(), output.stdout.trim()) {
            ("", "") => format!("no output (exit code {:?})", output.exit_code),
            ("", stdout) => stdout.to_string(),
            (stderr, _) => stderr.to_string(),
        };
        ReconcileError::probe(probe, reason)
    })
}

/// Service manager backed by systemd.
#[derive(Debug, Default, Clone)]
pub struct Systemd {
    exec: SystemExecutor,
}

impl Systemd {
    pub fn new() -> Self {
        Self {
            exec: SystemExecutor::new(),
        }
    }

    fn query(
        &self,
        verb: &'static str,
        service: &str,
        parse: fn(&str) -> Option<bool>,
    ) -> Result<bool> {
        let spec = CommandSpec::from_args(&SystemctlArgs::unit(verb, service));
        let output = self.exec.run(&spec)?;
        interpret_query(format!("{}({})", verb, service), &output, parse)
    }

    fn act(&self, verb: &'static str, service: Option<&str>) -> Result<()> {
        let spec = CommandSpec::from_args(&SystemctlArgs {
            verb,
            unit: service.map(str::to_string),
        });
        self.exec.run(&spec)?.ensure_success(&spec.display())
    }
}

impl ServiceManager for Systemd {
    fn is_enabled(&self, service: &str) -> Result<bool> {
        self.query("is-enabled", service, parse_is_enabled)
    }

    fn is_active(&self, service: &str) -> Result<bool> {
        self.query("is-active", service, parse_is_active)
    }

    fn enable(&self, service: &str) -> Result<()> {
        self.act("enable", Some(service))
    }

    fn start(&self, service: &str) -> Result<()> {
        self.act("start", Some(service))
    }

    fn stop(&self, service: &str) -> Result<()> {
        self.act("stop", Some(service))
    }

    fn restart(&self, service: &str) -> Result<()> {
        self.act("restart", Some(service))
    }

    fn reload(&self, service: &str) -> Result<()> {
        self.act("reload", Some(service))
    }

    fn daemon_reload(&self) -> Result<()> {
        self.act("daemon-reload", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_enabled() {
        assert_eq!(parse_is_enabled("enabled\n"), Some(true));
        assert_eq!(parse_is_enabled("static"), Some(true));
        assert_eq!(parse_is_enabled("disabled\n"), Some(false));
        assert_eq!(parse_is_enabled("not-found\n"), Some(false));
        assert_eq!(parse_is_enabled(""), None);
        assert_eq!(parse_is_enabled("Failed to connect to bus"), None);
    }

    #[test]
    fn test_parse_is_active() {
        assert_eq!(parse_is_active("active\n"), Some(true));
        assert_eq!(parse_is_active("inactive\n"), Some(false));
        assert_eq!(parse_is_active("failed"), Some(false));
        assert_eq!(parse_is_active("System has not been booted with systemd"), None);
        assert_eq!(parse_is_active(""), None);
    }

    #[test]
    fn test_unreachable_systemd_is_a_probe_error() {
        let output =
            CommandOutput::failed(1, "Failed to connect to bus: No such file or directory\n");

        let err = interpret_query("is-active(postgresql)".to_string(), &output, parse_is_active)
            .unwrap_err();
        assert!(err.is_probe());
        assert!(err.to_string().contains("Failed to connect to bus"));

        let err = interpret_query("is-enabled(postgresql)".to_string(), &output, parse_is_enabled)
            .unwrap_err();
        assert!(err.is_probe());
    }

    #[test]
    fn test_inactive_exit_code_is_an_answer() {
        let output = CommandOutput {
            stdout: "inactive\n".to_string(),
            stderr: String::new(),
            exit_code: Some(3),
            success: false,
        };
        let active =
            interpret_query("is-active(postgresql)".to_string(), &output, parse_is_active).unwrap();
        assert!(!active);
    }

    #[test]
    fn test_default_supports_everything() {
        let supports = ServiceSupports::default();
        assert!(supports.restart && supports.status && supports.reload);
    }
}
