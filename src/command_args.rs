//! Type-safe command argument contracts.
//!
//! Every external program pgreconcile runs is described by a struct that
//! implements [`CommandArgs`]. The struct definition is the contract: the
//! compiler catches flag mismatches, and tests can assert on the exact
//! argument vector without spawning anything.

use std::path::PathBuf;

/// Trait for typed command arguments.
///
/// # Contract
///
/// - `program()`: the executable, absolute or resolved through `PATH`.
/// - `to_cli_args()`: arguments exactly as the program expects them.
/// - `get_env_vars()`: extra environment for the child.
///
/// # Invariants
///
/// - Arguments are passed directly to `execve`, never through a shell, so no
///   quoting is applied or needed.
/// - Secrets never appear here; they travel on standard input.
pub trait CommandArgs {
    /// The program to execute.
    fn program(&self) -> String;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Get required environment variables.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }
}

/// Environment pinning a child's messages to the C locale.
///
/// Probe output is matched against untranslated strings. Not used for
/// initdb, where the locale picks the cluster's default.
pub fn c_locale() -> (String, String) {
    ("LC_ALL".to_string(), "C".to_string())
}

// ============================================================================
// initdb
// ============================================================================

/// Arguments for `initdb`.
///
/// | Rust Field | CLI Flag   | Notes |
/// |------------|------------|-------|
/// | `binary`   | (program)  | `/usr/pgsql-{v}/bin/initdb` on rhel-like hosts |
/// | `locale`   | `--locale` | Optional |
/// | `data_dir` | `-D`       | Must be empty or absent |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitDbArgs {
    pub binary: PathBuf,
    pub data_dir: PathBuf,
    pub locale: Option<String>,
}

impl CommandArgs for InitDbArgs {
    fn program(&self) -> String {
        self.binary.display().to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref locale) = self.locale {
            args.push("--locale".to_string());
            args.push(locale.clone());
        }
        args.push("-D".to_string());
        args.push(self.data_dir.display().to_string());
        args
    }
}

// ============================================================================
// psql
// ============================================================================

/// Default psql location on every supported family
pub const PSQL_BINARY: &str = "/usr/bin/psql";

/// Connection arguments for `psql`.
///
/// With `command` set the statement is passed with `-c` and the result is
/// printed as bare, unaligned tuples (probes only). Without it psql reads
/// SQL from standard input, which is how statements carrying secrets are
/// sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsqlArgs {
    pub user: Option<String>,
    pub database: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub command: Option<String>,
}

impl PsqlArgs {
    /// Same connection, with a `-c` statement
    pub fn with_command(&self, sql: impl Into<String>) -> Self {
        Self {
            command: Some(sql.into()),
            ..self.clone()
        }
    }
}

impl CommandArgs for PsqlArgs {
    fn program(&self) -> String {
        PSQL_BINARY.to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-psqlrc".to_string(),
            "-v".to_string(),
            "ON_ERROR_STOP=1".to_string(),
        ];
        if let Some(ref sql) = self.command {
            args.push("-tA".to_string());
            args.push("-c".to_string());
            args.push(sql.clone());
        }
        if let Some(ref db) = self.database {
            args.push("-d".to_string());
            args.push(db.clone());
        }
        if let Some(ref user) = self.user {
            args.push("-U".to_string());
            args.push(user.clone());
        }
        if let Some(ref host) = self.host {
            args.push("--host".to_string());
            args.push(host.clone());
        }
        args.push("--port".to_string());
        args.push(self.port.to_string());
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![c_locale()]
    }
}

// ============================================================================
// curl
// ============================================================================

/// Arguments for downloading a file with `curl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurlArgs {
    pub url: String,
    pub output: PathBuf,
}

impl CommandArgs for CurlArgs {
    fn program(&self) -> String {
        "curl".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-fsSL".to_string(),
            self.url.clone(),
            "-o".to_string(),
            self.output.display().to_string(),
        ]
    }
}

// ============================================================================
// systemctl
// ============================================================================

/// Arguments for `systemctl <verb> [unit]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemctlArgs {
    pub verb: &'static str,
    pub unit: Option<String>,
}

impl SystemctlArgs {
    pub fn unit(verb: &'static str, unit: &str) -> Self {
        Self {
            verb,
            unit: Some(unit.to_string()),
        }
    }
}

impl CommandArgs for SystemctlArgs {
    fn program(&self) -> String {
        "systemctl".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![self.verb.to_string()];
        if let Some(ref unit) = self.unit {
            args.push(unit.clone());
        }
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![("SYSTEMD_PAGER".to_string(), String::new()), c_locale()]
    }
}

// ============================================================================
// Tests
// ============================================================================
