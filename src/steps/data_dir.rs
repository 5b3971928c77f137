//! DataDirectoryProvisioner: the data directory, owned by the service
//! account and readable by it alone.

use super::{Action, Step, StepContext, SERVICE_ACCOUNT};
use crate::error::Result;
use crate::host::{DirectorySpec, PathInfo};
use crate::state::Phase;

/// Permission bits of the data directory
pub const DATA_DIR_MODE: u32 = 0o700;

#[derive(Debug, Default, Clone, Copy)]
pub struct DataDirectoryProvisioner;

impl DataDirectoryProvisioner {
    pub fn desired(ctx: &StepContext<'_>) -> DirectorySpec {
        DirectorySpec {
            path: ctx.spec.data_directory.clone(),
            owner: SERVICE_ACCOUNT.to_string(),
            group: SERVICE_ACCOUNT.to_string(),
            mode: DATA_DIR_MODE,
            recursive: true,
        }
    }
}

impl Step for DataDirectoryProvisioner {
    type Observation = Option<PathInfo>;

    fn phase(&self) -> Phase {
        Phase::ProvisioningDataDirectory
    }

    fn name(&self) -> &'static str {
        "data_directory"
    }

    fn observe(&self, ctx: &StepContext<'_>) -> Result<Option<PathInfo>> {
        ctx.host.fs.inspect_directory(&ctx.spec.data_directory)
    }

    fn plan(&self, ctx: &StepContext<'_>, observation: &Option<PathInfo>) -> Vec<Action> {
        let desired = Self::desired(ctx);
        match observation {
            Some(info) if info.is_dir && info.matches(&desired.owner, &desired.group, desired.mode) => {
                vec![]
            }
            _ => vec![Action::EnsureDirectory(desired)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::apply;
    use crate::steps::tests_support::context_fixture;
    use crate::types::PlatformFamily;
    use std::path::PathBuf;

    fn info(owner: &str, mode: u32) -> PathInfo {
        PathInfo {
            is_dir: true,
            owner: owner.to_string(),
            group: owner.to_string(),
            mode,
        }
    }

    #[test]
    fn test_plan_converged() {
        let fixture = context_fixture(PlatformFamily::Rhel, |_| {});
        let plan = DataDirectoryProvisioner.plan(&fixture.ctx(), &Some(info("postgres", 0o700)));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_fixes_drift() {
        let fixture = context_fixture(PlatformFamily::Rhel, |_| {});
        let ctx = fixture.ctx();
        assert_eq!(DataDirectoryProvisioner.plan(&ctx, &Some(info("postgres", 0o755))).len(), 1);
        assert_eq!(DataDirectoryProvisioner.plan(&ctx, &Some(info("root", 0o700))).len(), 1);
        assert_eq!(DataDirectoryProvisioner.plan(&ctx, &None).len(), 1);
    }

    #[test]
    fn test_creates_missing_parents() {
        let fixture = context_fixture(PlatformFamily::Debian, |config| {
            config.data_directory = Some(PathBuf::from("/data/pg"));
        });
        let ctx = fixture.ctx();

        let observation = DataDirectoryProvisioner.observe(&ctx).unwrap();
        assert_eq!(observation, None);
        for action in DataDirectoryProvisioner.plan(&ctx, &observation) {
            apply(&ctx, &action).unwrap();
        }

        let created = fixture.fake.directory("/data/pg").unwrap();
        assert!(created.matches("postgres", "postgres", 0o700));
        assert!(fixture.fake.directory("/data").is_some());

        let observation = DataDirectoryProvisioner.observe(&ctx).unwrap();
        assert!(DataDirectoryProvisioner.plan(&ctx, &observation).is_empty());
    }
}
