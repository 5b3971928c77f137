//! Process execution.
//!
//! All external programs go through a [`ProcessExecutor`]. The system
//! implementation spawns each child in its own process group, registers it
//! with the [`ChildRegistry`] so signal handlers can clean it up, and runs it
//! as another account through `runuser` when asked to.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::command_args::CommandArgs;
use crate::error::{ReconcileError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::secret::Secret;

/// A fully described command invocation.
///
/// `Debug` is safe to log: the stdin payload is a [`Secret`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Account to run as; `None` runs as the current user
    pub run_as: Option<String>,
    /// Data written to the child's standard input
    pub stdin: Option<Secret>,
}

impl CommandSpec {
    /// Build a spec from typed arguments
    pub fn from_args<T: CommandArgs>(args: &T) -> Self {
        Self {
            program: args.program(),
            args: args.to_cli_args(),
            env: args.get_env_vars(),
            run_as: None,
            stdin: None,
        }
    }

    pub fn run_as(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    pub fn with_stdin(mut self, input: Secret) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Program and arguments joined for messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Program name without its directory
    pub fn program_name(&self) -> &str {
        self.program.rsplit('/').next().unwrap_or(&self.program)
    }
}

/// Output from a command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the command exited successfully (exit code 0).
    pub success: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
        }
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Check if the command succeeded and return an execution error if not.
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(ReconcileError::execution(context, self.exit_code, self.combined()))
        }
    }
}

/// Runs external programs.
pub trait ProcessExecutor {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is not an error here; callers decide with
    /// [`CommandOutput::ensure_success`]. Failing to spawn is.
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;
}

/// Executes commands on the local system.
#[derive(Debug, Default, Clone)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Name of the effective user, used to skip `runuser` when it is not needed
    fn current_user() -> Option<String> {
        nix::unistd::User::from_uid(nix::unistd::geteuid())
            .ok()
            .flatten()
            .map(|u| u.name)
    }

    fn build(command: &CommandSpec) -> Command {
        let switch_user = command
            .run_as
            .as_deref()
            .filter(|user| Self::current_user().as_deref() != Some(*user));

        let mut cmd = match switch_user {
            Some(user) => {
                let mut cmd = Command::new("runuser");
                cmd.args(["-u", user, "--"]).arg(&command.program);
                cmd
            }
            None => Command::new(&command.program),
        };

        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .in_new_process_group();
        cmd
    }
}

impl ProcessExecutor for SystemExecutor {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        info!(
            "run: {} args={:?} run_as={:?} stdin={}",
            command.program,
            command.args,
            command.run_as,
            command.stdin.is_some()
        );

        let mut child = Self::build(command).spawn().map_err(|e| {
            ReconcileError::execution(
                format!("spawn {}", command.program_name()),
                None,
                e.to_string(),
            )
        })?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid, command.program_name());
        }

        // The pipe is dropped at the end of the match, closing stdin
        let written = match (command.stdin.as_ref(), child.stdin.take()) {
            (Some(input), Some(mut pipe)) => pipe.write_all(input.expose().as_bytes()),
            _ => Ok(()),
        };

        let output = child.wait_with_output();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }

        let output = output?;
        written?;
        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };

        debug!(
            "{} exited with {:?}",
            command.program_name(),
            result.exit_code
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_args::SystemctlArgs;

    #[test]
    fn test_spec_from_args() {
        let spec = CommandSpec::from_args(&SystemctlArgs::unit("enable", "postgresql"))
            .run_as("root");
        assert_eq!(spec.program, "systemctl");
        assert_eq!(spec.display(), "systemctl enable postgresql");
        assert_eq!(spec.run_as.as_deref(), Some("root"));
        assert!(spec.stdin.is_none());
    }

    #[test]
    fn test_spec_debug_hides_stdin() {
        let spec = CommandSpec {
            program: "/usr/bin/psql".to_string(),
            args: vec![],
            env: vec![],
            run_as: None,
            stdin: None,
        }
        .with_stdin(Secret::new("ALTER ROLE postgres PASSWORD 'x1y2'".to_string()));

        assert!(!format!("{:?}", spec).contains("x1y2"));
        assert_eq!(spec.program_name(), "psql");
    }

    #[test]
    fn test_output_ensure_success() {
        assert!(CommandOutput::ok("done").ensure_success("noop").is_ok());

        let err = CommandOutput::failed(100, "E: Unable to locate package\n")
            .ensure_success("apt-get install")
            .unwrap_err();
        assert_eq!(err.captured_output(), Some("E: Unable to locate package\n"));
    }

    #[test]
    fn test_output_combined() {
        let output = CommandOutput {
            stdout: "line one\n".to_string(),
            stderr: "warning\n".to_string(),
            exit_code: Some(1),
            success: false,
        };
        assert_eq!(output.combined(), "line one\nwarning\n");
    }

    #[test]
    fn test_system_executor_runs_true_and_false() {
        let exec = SystemExecutor::new();

        let ok = exec
            .run(&CommandSpec {
                program: "true".to_string(),
                args: vec![],
                env: vec![],
                run_as: None,
                stdin: None,
            })
            .unwrap();
        assert!(ok.success);

        let failed = exec
            .run(&CommandSpec {
                program: "false".to_string(),
                args: vec![],
                env: vec![],
                run_as: None,
                stdin: None,
            })
            .unwrap();
        assert!(!failed.success);
        assert_eq!(failed.exit_code, Some(1));
    }

    #[test]
    fn test_system_executor_feeds_stdin() {
        let exec = SystemExecutor::new();
        let output = exec
            .run(
                &CommandSpec {
                    program: "cat".to_string(),
                    args: vec![],
                    env: vec![],
                    run_as: None,
                    stdin: None,
                }
                .with_stdin(Secret::new("piped".to_string())),
            )
            .unwrap();
        assert_eq!(output.stdout, "piped");
    }

    #[test]
    fn test_system_executor_missing_program() {
        let exec = SystemExecutor::new();
        let err = exec
            .run(&CommandSpec {
                program: "this_binary_definitely_does_not_exist_12345".to_string(),
                args: vec![],
                env: vec![],
                run_as: None,
                stdin: None,
            })
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Execution { .. }));
    }
}
