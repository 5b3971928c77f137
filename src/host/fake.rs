//! In-memory host used by tests and by the integration suite.
//!
//! One shared [`FakeState`] backs every collaborator trait, so a package
//! installed through [`PackageManager`] or a file written through
//! [`Filesystem`] is visible to later probes in the same run, and across
//! runs when the same `FakeHost` is reused.
//!
//! The executor understands just enough of the programs the reconciler runs:
//! `initdb` writes `PG_VERSION` into its data directory, and `psql` answers
//! the password probe and applies `ALTER ROLE` read from standard input.
//! `psql` refuses to connect while no service is active.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{ReconcileError, Result};
use crate::host::fs::{DirectorySpec, FileSpec, Filesystem, PathInfo, WriteOutcome};
use crate::host::packages::{PackageManager, RepositoryDefinition};
use crate::host::process::{CommandOutput, CommandSpec, ProcessExecutor};
use crate::host::services::ServiceManager;

/// Everything the fake host knows
#[derive(Debug, Default)]
pub struct FakeState {
    pub installed: BTreeSet<String>,
    pub enabled: BTreeSet<String>,
    pub active: BTreeSet<String>,
    pub directories: BTreeMap<PathBuf, PathInfo>,
    pub files: BTreeMap<PathBuf, (String, PathInfo)>,
    pub role_has_password: bool,
    /// Every command handed to the executor, probes included
    pub commands: Vec<CommandSpec>,
    /// Every mutating operation, in order
    pub operations: Vec<String>,
    /// Operation or command labels that fail when they contain one of these
    pub failures: Vec<String>,
    /// Probe labels that fail when they contain one of these
    pub probe_failures: Vec<String>,
}

/// Cheaply clonable handle to a shared [`FakeState`].
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    state: Rc<RefCell<FakeState>>,
}

fn root_info(is_dir: bool, mode: u32) -> PathInfo {
    PathInfo {
        is_dir,
        owner: "root".to_string(),
        group: "root".to_string(),
        mode,
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation whose label contains `pattern` fail
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.state.borrow_mut().failures.push(pattern.into());
    }

    /// Make every probe whose label contains `pattern` fail
    pub fn fail_probe(&self, pattern: impl Into<String>) {
        self.state.borrow_mut().probe_failures.push(pattern.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.borrow_mut();
        state.failures.clear();
        state.probe_failures.clear();
    }

    /// Mutating operations recorded so far
    pub fn operations(&self) -> Vec<String> {
        self.state.borrow().operations.clone()
    }

    /// Commands executed so far
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.state.borrow().commands.clone()
    }

    /// Forget recorded operations and commands, keeping host state
    pub fn clear_log(&self) {
        let mut state = self.state.borrow_mut();
        state.operations.clear();
        state.commands.clear();
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.state.borrow().installed.contains(name)
    }

    pub fn service_running(&self, name: &str) -> bool {
        self.state.borrow().active.contains(name)
    }

    pub fn service_enabled(&self, name: &str) -> bool {
        self.state.borrow().enabled.contains(name)
    }

    pub fn role_has_password(&self) -> bool {
        self.state.borrow().role_has_password
    }

    pub fn directory(&self, path: impl AsRef<Path>) -> Option<PathInfo> {
        self.state.borrow().directories.get(path.as_ref()).cloned()
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state
            .borrow()
            .files
            .get(path.as_ref())
            .map(|(content, _)| content.clone())
    }

    /// Seed an installed package
    pub fn install_package(&self, name: &str) {
        self.state.borrow_mut().installed.insert(name.to_string());
    }

    /// Seed a directory
    pub fn add_directory(&self, path: impl Into<PathBuf>, info: PathInfo) {
        self.state.borrow_mut().directories.insert(path.into(), info);
    }

    /// Seed a file owned by root
    pub fn add_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.state
            .borrow_mut()
            .files
            .insert(path.into(), (content.into(), root_info(false, 0o644)));
    }

    /// Seed a running or stopped service
    pub fn set_service(&self, name: &str, enabled: bool, active: bool) {
        let mut state = self.state.borrow_mut();
        if enabled {
            state.enabled.insert(name.to_string());
        } else {
            state.enabled.remove(name);
        }
        if active {
            state.active.insert(name.to_string());
        } else {
            state.active.remove(name);
        }
    }

    pub fn set_role_has_password(&self, value: bool) {
        self.state.borrow_mut().role_has_password = value;
    }

    /// Record a mutating operation, failing it when injected
    fn operate(&self, label: String) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.failures.iter().any(|f| label.contains(f.as_str())) {
            return Err(ReconcileError::execution(label, Some(1), "injected failure\n"));
        }
        state.operations.push(label);
        Ok(())
    }

    fn probe(&self, label: String) -> Result<()> {
        let state = self.state.borrow();
        if state.probe_failures.iter().any(|f| label.contains(f.as_str())) {
            return Err(ReconcileError::probe(label, "injected probe failure"));
        }
        Ok(())
    }

    fn path_exists(state: &FakeState, path: &Path) -> bool {
        path == Path::new("/") || state.directories.contains_key(path) || state.files.contains_key(path)
    }

    fn run_initdb(&self, command: &CommandSpec) -> CommandOutput {
        let data_dir = command
            .args
            .windows(2)
            .find(|w| w[0] == "-D")
            .map(|w| PathBuf::from(&w[1]));
        let Some(data_dir) = data_dir else {
            return CommandOutput::failed(1, "initdb: no data directory specified\n");
        };

        let mut state = self.state.borrow_mut();
        if !state.directories.contains_key(&data_dir) {
            return CommandOutput::failed(1, "initdb: could not access directory\n");
        }
        let marker = data_dir.join("PG_VERSION");
        if state.files.contains_key(&marker) {
            return CommandOutput::failed(
                1,
                "initdb: directory exists but is not empty\n",
            );
        }
        let owner = command.run_as.clone().unwrap_or_else(|| "root".to_string());
        state.files.insert(
            marker,
            (
                "initialized\n".to_string(),
                PathInfo {
                    is_dir: false,
                    owner: owner.clone(),
                    group: owner,
                    mode: 0o600,
                },
            ),
        );
        CommandOutput::ok("Success. You can now start the database server.\n")
    }

    fn run_psql(&self, command: &CommandSpec) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        if state.active.is_empty() {
            return CommandOutput::failed(
                2,
                "psql: could not connect to server: No such file or directory\n",
            );
        }

        let sql = command
            .args
            .windows(2)
            .find(|w| w[0] == "-c")
            .map(|w| w[1].clone());

        match (sql, command.stdin.as_ref()) {
            (Some(sql), _) if sql.contains("pg_authid") => {
                // Tuples-only output: one bare `1` per matching role
                if state.role_has_password {
                    CommandOutput::ok("1\n")
                } else {
                    CommandOutput::ok("")
                }
            }
            (None, Some(input)) if input.expose().contains("ALTER ROLE") => {
                state.role_has_password = true;
                CommandOutput::ok("ALTER ROLE\n")
            }
            _ => CommandOutput::ok(""),
        }
    }
}

impl PackageManager for FakeHost {
    fn is_installed(&self, name: &str) -> Result<bool> {
        self.probe(format!("is-installed {}", name))?;
        Ok(self.state.borrow().installed.contains(name))
    }

    fn install(&self, name: &str) -> Result<()> {
        self.operate(format!("install {}", name))?;
        self.state.borrow_mut().installed.insert(name.to_string());
        Ok(())
    }

    fn repository_configured(&self, repo: &RepositoryDefinition) -> Result<bool> {
        self.probe(format!("repository {}", repo.name))?;
        let state = self.state.borrow();
        let definition = state
            .files
            .get(&repo.path)
            .is_some_and(|(content, _)| *content == repo.content);
        let key = repo
            .key
            .as_ref()
            .is_none_or(|k| state.files.contains_key(&k.path));
        Ok(definition && key)
    }

    fn configure_repository(&self, repo: &RepositoryDefinition) -> Result<()> {
        self.operate(format!("configure-repository {}", repo.name))?;
        let mut state = self.state.borrow_mut();
        if let Some(key) = &repo.key {
            state
                .files
                .insert(key.path.clone(), (format!("key from {}\n", key.url), root_info(false, 0o644)));
        }
        state
            .files
            .insert(repo.path.clone(), (repo.content.clone(), root_info(false, 0o644)));
        Ok(())
    }
}

impl ServiceManager for FakeHost {
    fn is_enabled(&self, service: &str) -> Result<bool> {
        self.probe(format!("is-enabled {}", service))?;
        Ok(self.state.borrow().enabled.contains(service))
    }

    fn is_active(&self, service: &str) -> Result<bool> {
        self.probe(format!("is-active {}", service))?;
        Ok(self.state.borrow().active.contains(service))
    }

    fn enable(&self, service: &str) -> Result<()> {
        self.operate(format!("enable {}", service))?;
        self.state.borrow_mut().enabled.insert(service.to_string());
        Ok(())
    }

    fn start(&self, service: &str) -> Result<()> {
        self.operate(format!("start {}", service))?;
        self.state.borrow_mut().active.insert(service.to_string());
        Ok(())
    }

    fn stop(&self, service: &str) -> Result<()> {
        self.operate(format!("stop {}", service))?;
        self.state.borrow_mut().active.remove(service);
        Ok(())
    }

    fn restart(&self, service: &str) -> Result<()> {
        self.operate(format!("restart {}", service))?;
        self.state.borrow_mut().active.insert(service.to_string());
        Ok(())
    }

    fn reload(&self, service: &str) -> Result<()> {
        self.operate(format!("reload {}", service))
    }

    fn daemon_reload(&self) -> Result<()> {
        self.operate("daemon-reload".to_string())
    }
}

impl Filesystem for FakeHost {
    fn exists(&self, path: &Path) -> Result<bool> {
        self.probe(format!("exists {}", path.display()))?;
        Ok(Self::path_exists(&self.state.borrow(), path))
    }

    fn inspect_directory(&self, path: &Path) -> Result<Option<PathInfo>> {
        self.probe(format!("inspect {}", path.display()))?;
        let state = self.state.borrow();
        Ok(state
            .directories
            .get(path)
            .or_else(|| state.files.get(path).map(|(_, info)| info))
            .cloned())
    }

    fn ensure_directory(&self, spec: &DirectorySpec) -> Result<bool> {
        let desired = PathInfo {
            is_dir: true,
            owner: spec.owner.clone(),
            group: spec.group.clone(),
            mode: spec.mode,
        };

        {
            let state = self.state.borrow();
            if state.files.contains_key(&spec.path) {
                return Err(ReconcileError::config(format!(
                    "{} exists and is not a directory",
                    spec.path.display()
                )));
            }
            if state.directories.get(&spec.path) == Some(&desired) {
                return Ok(false);
            }
            let parent_missing = spec
                .path
                .parent()
                .is_some_and(|p| !Self::path_exists(&state, p));
            if parent_missing && !spec.recursive {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("parent of {} does not exist", spec.path.display()),
                )
                .into());
            }
        }

        self.operate(format!("ensure-directory {}", spec.path.display()))?;
        let mut state = self.state.borrow_mut();
        for ancestor in spec.path.ancestors().skip(1) {
            if ancestor == Path::new("/") || ancestor.as_os_str().is_empty() {
                break;
            }
            state
                .directories
                .entry(ancestor.to_path_buf())
                .or_insert_with(|| root_info(true, 0o755));
        }
        state.directories.insert(spec.path.clone(), desired);
        Ok(true)
    }

    fn read_file(&self, path: &Path) -> Result<Option<String>> {
        self.probe(format!("read-file {}", path.display()))?;
        Ok(self
            .state
            .borrow()
            .files
            .get(path)
            .map(|(content, _)| content.clone()))
    }

    fn write_file(&self, spec: &FileSpec, content: &str) -> Result<WriteOutcome> {
        let info = PathInfo {
            is_dir: false,
            owner: spec.owner.clone(),
            group: spec.group.clone(),
            mode: spec.mode,
        };
        let outcome = match self.state.borrow().files.get(&spec.path) {
            Some((current, current_info)) => WriteOutcome {
                content_changed: current != content,
                metadata_changed: current == content && *current_info != info,
            },
            None => WriteOutcome {
                content_changed: true,
                metadata_changed: false,
            },
        };

        if outcome.changed() {
            self.operate(format!("write-file {}", spec.path.display()))?;
            self.state
                .borrow_mut()
                .files
                .insert(spec.path.clone(), (content.to_string(), info));
        }
        Ok(outcome)
    }
}

impl ProcessExecutor for FakeHost {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let label = format!("run {}", command.display());
        self.state.borrow_mut().commands.push(command.clone());

        if self
            .state
            .borrow()
            .failures
            .iter()
            .any(|f| label.contains(f.as_str()))
        {
            return Ok(CommandOutput::failed(1, "injected failure\n"));
        }

        let output = match command.program_name() {
            "initdb" => self.run_initdb(command),
            "psql" => self.run_psql(command),
            _ => CommandOutput::ok(""),
        };

        // Probes are not mutations
        let is_probe = command.args.iter().any(|a| a == "-c");
        if output.success && !is_probe {
            self.state.borrow_mut().operations.push(label);
        }
        Ok(output)
    }
}
