//! Reconciliation steps.
//!
//! Every step is split the same way:
//!
//! - `observe` runs read-only probes against the [`Host`]. A probe that
//!   cannot decide fails with a probe error; it never guesses `false`.
//! - `plan` is a pure function from the observation to a list of
//!   [`Action`]s. An empty plan means the step has converged.
//! - [`apply`] executes one action through the host collaborators.
//!
//! The reconciler drives the steps in [`Phase`] order.

pub mod credentials;
pub mod data_dir;
pub mod initdb;
pub mod packages;
pub mod service;

use std::fmt;

use serde::Serialize;
use zeroize::Zeroizing;

use crate::command_args::{InitDbArgs, PsqlArgs};
use crate::error::{ReconcileError, Result};
use crate::host::{CommandSpec, DirectorySpec, FileSpec, Host, RepositoryDefinition};
use crate::platform::PlatformProfile;
use crate::secret::{Secret, GENERATED_PASSWORD_LEN};
use crate::server_spec::ServerSpec;
use crate::state::Phase;
use crate::types::PasswordSetting;

pub use credentials::CredentialSetter;
pub use data_dir::DataDirectoryProvisioner;
pub use initdb::DatabaseInitializer;
pub use packages::PackageInstaller;
pub use service::ServiceReconciler;

/// Account that owns the data directory and runs the server
pub const SERVICE_ACCOUNT: &str = "postgres";

/// Everything a step reads
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub spec: &'a ServerSpec,
    pub profile: &'a PlatformProfile,
    pub host: &'a Host,
}

/// One idempotent reconciliation step
pub trait Step {
    /// Probe results the plan is computed from
    type Observation: fmt::Debug;

    fn phase(&self) -> Phase;

    fn name(&self) -> &'static str;

    /// Whether the step applies at all; a step that does not apply runs no probes
    fn applies(&self, _ctx: &StepContext<'_>) -> bool {
        true
    }

    fn observe(&self, ctx: &StepContext<'_>) -> Result<Self::Observation>;

    fn plan(&self, ctx: &StepContext<'_>, observation: &Self::Observation) -> Vec<Action>;
}

// ============================================================================
// Actions
// ============================================================================

/// A single host mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ConfigureRepository(RepositoryDefinition),
    InstallPackage(String),
    EnsureDirectory(DirectorySpec),
    RunInitDb { args: InitDbArgs, run_as: String },
    WriteUnitFile { file: FileSpec, content: String },
    DaemonReload,
    EnableService(String),
    StartService(String),
    RestartService(String),
    SetPassword { connection: PsqlArgs, password: PasswordSetting },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigureRepository(repo) => {
                write!(f, "configure repository {} ({})", repo.name, repo.path.display())
            }
            Self::InstallPackage(name) => write!(f, "install package {}", name),
            Self::EnsureDirectory(dir) => write!(
                f,
                "ensure directory {} ({}:{} {:o})",
                dir.path.display(),
                dir.owner,
                dir.group,
                dir.mode
            ),
            Self::RunInitDb { args, run_as } => {
                write!(f, "initdb {} as {}", args.data_dir.display(), run_as)
            }
            Self::WriteUnitFile { file, .. } => write!(f, "write unit {}", file.path.display()),
            Self::DaemonReload => write!(f, "systemctl daemon-reload"),
            Self::EnableService(name) => write!(f, "enable service {}", name),
            Self::StartService(name) => write!(f, "start service {}", name),
            Self::RestartService(name) => write!(f, "restart service {}", name),
            Self::SetPassword { password, .. } => {
                write!(f, "set password for role postgres ({})", password)
            }
        }
    }
}

const ALTER_ROLE_PREFIX: &str = "ALTER ROLE postgres ENCRYPTED PASSWORD '";
const ALTER_ROLE_SUFFIX: &str = "';\n";

/// `ALTER ROLE` statement for the administrative role, quotes escaped.
///
/// Built in one buffer sized for the worst case, every character quoted,
/// so the password is never copied into a temporary.
fn alter_role_sql(password: &Secret) -> Zeroizing<String> {
    let capacity = ALTER_ROLE_PREFIX.len() + 2 * password.len() + ALTER_ROLE_SUFFIX.len();
    let mut sql = Zeroizing::new(String::with_capacity(capacity));
    sql.push_str(ALTER_ROLE_PREFIX);
    for c in password.expose().chars() {
        if c == '\'' {
            sql.push('\'');
        }
        sql.push(c);
    }
    sql.push_str(ALTER_ROLE_SUFFIX);
    sql
}

/// Execute one action.
pub fn apply(ctx: &StepContext<'_>, action: &Action) -> Result<()> {
    let host = ctx.host;
    tracing::info!("Applying: {}", action);

    match action {
        Action::ConfigureRepository(repo) => host.packages.configure_repository(repo),
        Action::InstallPackage(name) => host.packages.install(name),
        Action::EnsureDirectory(dir) => host.fs.ensure_directory(dir).map(|_| ()),
        Action::RunInitDb { args, run_as } => {
            let spec = CommandSpec::from_args(args).run_as(run_as.as_str());
            host.exec.run(&spec)?.ensure_success("initdb")
        }
        Action::WriteUnitFile { file, content } => {
            let outcome = host.fs.write_file(file, content)?;
            tracing::debug!("Unit write outcome: {:?}", outcome);
            Ok(())
        }
        Action::DaemonReload => host.services.daemon_reload(),
        Action::EnableService(name) => host.services.enable(name),
        Action::StartService(name) => host.services.start(name),
        Action::RestartService(name) => {
            if ctx.profile.supports.restart {
                host.services.restart(name)
            } else {
                host.services.stop(name)?;
                host.services.start(name)
            }
        }
        Action::SetPassword {
            connection,
            password,
        } => {
            let secret = match password {
                PasswordSetting::Literal(secret) => secret.clone(),
                PasswordSetting::Generate => Secret::generate(GENERATED_PASSWORD_LEN),
                PasswordSetting::Unmanaged => {
                    return Err(ReconcileError::config(
                        "refusing to set an unmanaged password",
                    ));
                }
            };
            let spec = CommandSpec::from_args(connection)
                .run_as(SERVICE_ACCOUNT)
                .with_stdin(Secret::from(alter_role_sql(&secret)));
            host.exec.run(&spec)?.ensure_success("psql ALTER ROLE postgres")
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// What a step did during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepOutcome {
    /// Already converged, nothing to do
    Unchanged,
    /// Actions were applied
    Changed,
    /// Dry run: actions would be applied
    Planned,
    /// Dry run: probes depend on changes planned by an earlier step
    Deferred,
    /// The step does not apply to this configuration or platform
    Skipped,
    /// The step failed; the run stopped here
    Failed,
}

/// Report of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub phase: Phase,
    pub step: &'static str,
    pub outcome: StepOutcome,
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StepReport {
    pub fn new(phase: Phase, step: &'static str, outcome: StepOutcome) -> Self {
        Self {
            phase,
            step,
            outcome,
            actions: Vec::new(),
            note: None,
        }
    }

    pub fn with_actions(mut self, actions: &[Action]) -> Self {
        self.actions = actions.iter().map(ToString::to_string).collect();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Whether the step changed, or in a dry run would change, the host
    pub fn has_changes(&self) -> bool {
        matches!(self.outcome, StepOutcome::Changed | StepOutcome::Planned)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_alter_role_escapes_quotes() {
        let sql = alter_role_sql(&Secret::new("it's".to_string()));
        assert_eq!(sql.as_str(), "ALTER ROLE postgres ENCRYPTED PASSWORD 'it''s';\n");
    }

    #[test]
    fn test_alter_role_never_outgrows_its_buffer() {
        // All quotes is the worst case: every character doubles
        let sql = alter_role_sql(&Secret::new("''''".to_string()));
        let expected = ALTER_ROLE_PREFIX.len() + 8 + ALTER_ROLE_SUFFIX.len();
        assert_eq!(sql.len(), expected);
        assert_eq!(sql.capacity(), expected);

        let sql = alter_role_sql(&Secret::new("plain".to_string()));
        assert!(sql.len() < sql.capacity());
        assert!(sql.ends_with("'plain';\n"));
    }

    #[test]
    fn test_set_password_display_hides_literal() {
        let action = Action::SetPassword {
            connection: PsqlArgs {
                user: None,
                database: None,
                host: None,
                port: 5432,
                command: None,
            },
            password: PasswordSetting::Literal(Secret::new("hunter2".to_string())),
        };
        assert!(!action.to_string().contains("hunter2"));
        assert!(!format!("{:?}", action).contains("hunter2"));
    }

    #[test]
    fn test_action_display() {
        let action = Action::EnsureDirectory(DirectorySpec {
            path: PathBuf::from("/data/pg"),
            owner: "postgres".to_string(),
            group: "postgres".to_string(),
            mode: 0o700,
            recursive: true,
        });
        assert_eq!(action.to_string(), "ensure directory /data/pg (postgres:postgres 700)");
        assert_eq!(
            Action::InstallPackage("postgresql-12".to_string()).to_string(),
            "install package postgresql-12"
        );
    }

    #[test]
    fn test_report_changes() {
        let report = StepReport::new(Phase::InstallingPackages, "packages", StepOutcome::Planned)
            .with_actions(&[Action::InstallPackage("postgresql-12".to_string())]);
        assert!(report.has_changes());
        assert_eq!(report.actions, vec!["install package postgresql-12"]);
        assert!(!StepReport::new(Phase::InstallingPackages, "packages", StepOutcome::Unchanged)
            .has_changes());
    }
}
