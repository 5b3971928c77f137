//! CredentialSetter: give the `postgres` role a password, once.

use super::{Action, Step, StepContext, SERVICE_ACCOUNT};
use crate::command_args::PsqlArgs;
use crate::error::{ReconcileError, Result};
use crate::host::CommandSpec;
use crate::state::Phase;

/// Probe for an existing password on the administrative role
pub const HAS_PASSWORD_SQL: &str =
    "SELECT 1 FROM pg_authid WHERE rolname='postgres' AND rolpassword IS NOT NULL;";

#[derive(Debug, Default, Clone, Copy)]
pub struct CredentialSetter;

impl CredentialSetter {
    /// Connection used for the probe and the update
    pub fn connection(ctx: &StepContext<'_>) -> PsqlArgs {
        PsqlArgs {
            user: Some(ctx.spec.user.clone()),
            database: ctx.spec.database.clone(),
            host: ctx.spec.host.clone(),
            port: ctx.spec.port,
            command: None,
        }
    }
}

/// Interpret the probe's tuples-only output: `1` or nothing.
///
/// Row-count footers are translated by psql and are never looked at.
pub fn has_password(stdout: &str) -> bool {
    stdout.trim() == "1"
}

impl Step for CredentialSetter {
    /// Whether the role already has a password
    type Observation = bool;

    fn phase(&self) -> Phase {
        Phase::SettingCredentials
    }

    fn name(&self) -> &'static str {
        "credentials"
    }

    fn applies(&self, ctx: &StepContext<'_>) -> bool {
        ctx.spec.password.is_managed()
    }

    fn observe(&self, ctx: &StepContext<'_>) -> Result<bool> {
        let probe = CommandSpec::from_args(&Self::connection(ctx).with_command(HAS_PASSWORD_SQL))
            .run_as(SERVICE_ACCOUNT);
        let output = ctx.host.exec.run(&probe)?;

        if !output.success {
            return Err(ReconcileError::probe("user_has_password", output.combined().trim()));
        }
        Ok(has_password(&output.stdout))
    }

    fn plan(&self, ctx: &StepContext<'_>, has_password: &bool) -> Vec<Action> {
        if *has_password || !ctx.spec.password.is_managed() {
            return vec![];
        }
        vec![Action::SetPassword {
            connection: Self::connection(ctx),
            password: ctx.spec.password.clone(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::apply;
    use crate::steps::tests_support::context_fixture;
    use crate::types::PlatformFamily;

    #[test]
    fn test_has_password_parsing() {
        assert!(has_password("1\n"));
        assert!(!has_password(""));
        assert!(!has_password("\n"));
    }

    #[test]
    fn test_has_password_ignores_translated_footers() {
        // Aligned output in a German or French locale never counts
        assert!(!has_password(" ?column? \n----------\n        1\n(1 Zeile)\n"));
        assert!(!has_password(" ?column? \n----------\n        1\n(1 ligne)\n"));
        assert!(!has_password("(0 Zeilen)\n"));
    }

    #[test]
    fn test_probe_asks_for_bare_tuples() {
        let fixture = context_fixture(PlatformFamily::Rhel, |_| {});
        fixture.fake.set_service("postgresql-9.6", true, true);
        fixture.fake.set_role_has_password(true);

        assert!(CredentialSetter.observe(&fixture.ctx()).unwrap());

        let commands = fixture.fake.commands();
        let probe = commands.last().unwrap();
        assert!(probe.args.iter().any(|a| a == "-tA"));
        assert!(probe.args.iter().any(|a| a == HAS_PASSWORD_SQL));
        assert!(probe.env.contains(&("LC_ALL".to_string(), "C".to_string())));
    }

    #[test]
    fn test_null_password_does_not_apply() {
        let fixture = context_fixture(PlatformFamily::Rhel, |config| {
            config.password = crate::types::PasswordSetting::Unmanaged;
        });
        let ctx = fixture.ctx();
        assert!(!CredentialSetter.applies(&ctx));
        assert!(CredentialSetter.plan(&ctx, &false).is_empty());
    }

    #[test]
    fn test_probe_failure_is_an_error() {
        let fixture = context_fixture(PlatformFamily::Debian, |_| {});
        // No service running, psql cannot connect
        let err = CredentialSetter.observe(&fixture.ctx()).unwrap_err();
        assert!(err.is_probe());
    }

    #[test]
    fn test_sets_password_over_stdin() {
        let fixture = context_fixture(PlatformFamily::Debian, |_| {});
        fixture.fake.set_service("postgresql", true, true);
        let ctx = fixture.ctx();

        assert!(!CredentialSetter.observe(&ctx).unwrap());
        for action in CredentialSetter.plan(&ctx, &false) {
            apply(&ctx, &action).unwrap();
        }
        assert!(CredentialSetter.observe(&ctx).unwrap());

        let commands = fixture.fake.commands();
        let alter = commands.iter().find(|c| c.stdin.is_some()).unwrap();
        assert_eq!(alter.run_as.as_deref(), Some("postgres"));
        assert!(alter.args.iter().all(|a| !a.contains("ALTER ROLE")));
        assert!(alter.stdin.as_ref().unwrap().expose().starts_with("ALTER ROLE postgres"));
    }
}
