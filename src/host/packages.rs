//! Package manager collaborator.
//!
//! Wraps the host's native tooling instead of reimplementing it:
//! `dpkg-query`/`apt-get` on Debian-family hosts, `rpm` plus `dnf` (or `yum`)
//! on rhel-like hosts. Failures are returned as-is; retries are the package
//! manager's business.

use std::path::{Path, PathBuf};

use crate::command_args::{c_locale, CommandArgs, CurlArgs};
use crate::error::{ReconcileError, Result};
use crate::host::fs::{FileSpec, Filesystem, LocalFilesystem};
use crate::host::process::{CommandSpec, ProcessExecutor, SystemExecutor};
use crate::types::PlatformFamily;

/// A signing key downloaded next to a repository definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub url: String,
    pub path: PathBuf,
}

/// A package repository definition file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDefinition {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
    pub key: Option<SigningKey>,
}

impl RepositoryDefinition {
    /// Ownership and mode of the definition file
    pub fn file_spec(&self) -> FileSpec {
        FileSpec {
            path: self.path.clone(),
            owner: "root".to_string(),
            group: "root".to_string(),
            mode: 0o644,
        }
    }
}

/// Package operations used by the reconciler.
pub trait PackageManager {
    /// Whether the package is installed
    fn is_installed(&self, name: &str) -> Result<bool>;

    /// Install the package
    fn install(&self, name: &str) -> Result<()>;

    /// Whether the repository definition (and its key) is in place
    fn repository_configured(&self, repo: &RepositoryDefinition) -> Result<bool>;

    /// Write the repository definition, fetch its key and refresh metadata
    fn configure_repository(&self, repo: &RepositoryDefinition) -> Result<()>;
}

// ============================================================================
// Native tool arguments
// ============================================================================

/// Native package tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageTool {
    Apt,
    Dnf,
    Yum,
}

impl PackageTool {
    /// Pick the tool for a family, preferring dnf over yum when both exist
    pub fn for_family(family: PlatformFamily) -> Self {
        if !family.is_rhel_like() {
            Self::Apt
        } else if Path::new("/usr/bin/dnf").exists() {
            Self::Dnf
        } else {
            Self::Yum
        }
    }

    /// Binaries this tool needs on the host
    pub fn required_binaries(self) -> &'static [&'static str] {
        match self {
            Self::Apt => &["dpkg-query", "apt-get"],
            Self::Dnf => &["rpm", "dnf"],
            Self::Yum => &["rpm", "yum"],
        }
    }
}

/// Package operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOp {
    Query(String),
    Install(String),
    Refresh,
}

/// Type-safe arguments for the native package tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArgs {
    pub tool: PackageTool,
    pub op: PackageOp,
}

impl CommandArgs for PackageArgs {
    fn program(&self) -> String {
        match (self.tool, &self.op) {
            (PackageTool::Apt, PackageOp::Query(_)) => "dpkg-query",
            (PackageTool::Apt, _) => "apt-get",
            (_, PackageOp::Query(_)) => "rpm",
            (PackageTool::Dnf, _) => "dnf",
            (PackageTool::Yum, _) => "yum",
        }
        .to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let args: Vec<&str> = match (self.tool, &self.op) {
            (PackageTool::Apt, PackageOp::Query(name)) => vec!["-W", "-f=${Status}", name.as_str()],
            (_, PackageOp::Query(name)) => vec!["-q", name.as_str()],
            (PackageTool::Apt, PackageOp::Refresh) => vec!["update", "-q"],
            (_, PackageOp::Refresh) => vec!["makecache", "-q"],
            (_, PackageOp::Install(name)) => vec!["install", "-y", "-q", name.as_str()],
        };
        args.into_iter().map(String::from).collect()
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        // "not installed" is recognized by its untranslated message
        let mut env = vec![c_locale()];
        if self.tool == PackageTool::Apt {
            env.push(("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()));
        }
        env
    }
}

/// Interpret the output of a package query.
///
/// Returns `None` when the output is neither "installed" nor a clean
/// "not installed", which callers treat as a probe failure.
pub fn parse_query_result(tool: PackageTool, success: bool, stdout: &str, stderr: &str) -> Option<bool> {
    match tool {
        PackageTool::Apt => {
            if success {
                Some(stdout.contains("install ok installed"))
            } else if stderr.contains("no packages found") {
                Some(false)
            } else {
                None
            }
        }
        PackageTool::Dnf | PackageTool::Yum => {
            if success {
                Some(true)
            } else if stdout.contains("is not installed") {
                Some(false)
            } else {
                None
            }
        }
    }
}

// ============================================================================
// System implementation
// ============================================================================

/// Package manager backed by the host's native tools.
#[derive(Debug, Clone)]
pub struct SystemPackages {
    tool: PackageTool,
    exec: SystemExecutor,
    fs: LocalFilesystem,
}

impl SystemPackages {
    pub fn new(tool: PackageTool) -> Self {
        Self {
            tool,
            exec: SystemExecutor::new(),
            fs: LocalFilesystem::new(),
        }
    }

    fn args(&self, op: PackageOp) -> PackageArgs {
        PackageArgs { tool: self.tool, op }
    }

    fn refresh(&self) -> Result<()> {
        let spec = CommandSpec::from_args(&self.args(PackageOp::Refresh));
        self.exec.run(&spec)?.ensure_success(&spec.display())
    }
}

impl PackageManager for SystemPackages {
    fn is_installed(&self, name: &str) -> Result<bool> {
        let spec = CommandSpec::from_args(&self.args(PackageOp::Query(name.to_string())));
        let output = self.exec.run(&spec)?;

        parse_query_result(self.tool, output.success, &output.stdout, &output.stderr).ok_or_else(
            || ReconcileError::probe(format!("installed({})", name), output.combined()),
        )
    }

    fn install(&self, name: &str) -> Result<()> {
        let spec = CommandSpec::from_args(&self.args(PackageOp::Install(name.to_string())));
        tracing::info!("Installing package {}", name);
        self.exec.run(&spec)?.ensure_success(&spec.display())
    }

    fn repository_configured(&self, repo: &RepositoryDefinition) -> Result<bool> {
        let current = self.fs.read_file(&repo.path)?;
        if current.as_deref() != Some(repo.content.as_str()) {
            return Ok(false);
        }
        match &repo.key {
            Some(key) => self.fs.exists(&key.path),
            None => Ok(true),
        }
    }

    fn configure_repository(&self, repo: &RepositoryDefinition) -> Result<()> {
        if let Some(key) = &repo.key {
            if !self.fs.exists(&key.path)? {
                let spec = CommandSpec::from_args(&CurlArgs {
                    url: key.url.clone(),
                    output: key.path.clone(),
                });
                self.exec.run(&spec)?.ensure_success(&spec.display())?;
                tracing::info!("Fetched signing key {}", key.path.display());
            }
        }

        let outcome = self.fs.write_file(&repo.file_spec(), &repo.content)?;
        tracing::info!(
            "Repository {} configured at {} (changed: {})",
            repo.name,
            repo.path.display(),
            outcome.changed()
        );

        self.refresh()
    }
}
