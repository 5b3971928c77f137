//! DatabaseInitializer: run `initdb` once on families that need it.

use super::{Action, Step, StepContext};
use crate::error::Result;
use crate::platform::PlatformProfile;
use crate::state::Phase;

#[derive(Debug, Default, Clone, Copy)]
pub struct DatabaseInitializer;

impl Step for DatabaseInitializer {
    /// Whether `PG_VERSION` exists in the data directory
    type Observation = bool;

    fn phase(&self) -> Phase {
        Phase::InitializingDatabase
    }

    fn name(&self) -> &'static str {
        "initdb"
    }

    fn applies(&self, ctx: &StepContext<'_>) -> bool {
        ctx.profile.initdb.is_some()
    }

    fn observe(&self, ctx: &StepContext<'_>) -> Result<bool> {
        ctx.host
            .fs
            .exists(&PlatformProfile::initialized_marker(ctx.spec))
    }

    fn plan(&self, ctx: &StepContext<'_>, initialized: &bool) -> Vec<Action> {
        match (&ctx.profile.initdb, *initialized) {
            (Some(args), false) => vec![Action::RunInitDb {
                args: args.clone(),
                run_as: ctx.spec.user.clone(),
            }],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::tests_support::context_fixture;
    use crate::types::PlatformFamily;
    use strum::IntoEnumIterator;

    #[test]
    fn test_fires_only_on_rhel_like_when_uninitialized() {
        for family in PlatformFamily::iter() {
            let fixture = context_fixture(family, |_| {});
            let ctx = fixture.ctx();

            let uninitialized = DatabaseInitializer.plan(&ctx, &false);
            if family.requires_explicit_initdb() {
                assert!(DatabaseInitializer.applies(&ctx));
                assert_eq!(uninitialized.len(), 1, "{family}");
            } else {
                assert!(!DatabaseInitializer.applies(&ctx));
                assert!(uninitialized.is_empty(), "{family}");
            }
            assert!(DatabaseInitializer.plan(&ctx, &true).is_empty());
        }
    }

    #[test]
    fn test_runs_as_configured_user_with_locale() {
        let fixture = context_fixture(PlatformFamily::Fedora, |config| {
            config.initdb_locale = Some("en_US.UTF-8".to_string());
        });
        let plan = DatabaseInitializer.plan(&fixture.ctx(), &false);
        let Action::RunInitDb { args, run_as } = &plan[0] else {
            panic!("expected initdb, got {:?}", plan);
        };
        assert_eq!(run_as, "postgres");
        assert_eq!(args.locale.as_deref(), Some("en_US.UTF-8"));
    }

    #[test]
    fn test_observe_reads_marker() {
        let fixture = context_fixture(PlatformFamily::Rhel, |_| {});
        let ctx = fixture.ctx();
        assert!(!DatabaseInitializer.observe(&ctx).unwrap());

        fixture
            .fake
            .add_file("/var/lib/pgsql/9.6/data/PG_VERSION", "9.6\n");
        assert!(DatabaseInitializer.observe(&ctx).unwrap());
    }
}
