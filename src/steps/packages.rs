//! PackageInstaller: repository definition, client package, server package.

use super::{Action, Step, StepContext};
use crate::error::Result;
use crate::state::Phase;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageObservation {
    /// `None` when no repository is requested
    pub repository_configured: Option<bool>,
    pub client_installed: bool,
    pub server_installed: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PackageInstaller;

impl Step for PackageInstaller {
    type Observation = PackageObservation;

    fn phase(&self) -> Phase {
        Phase::InstallingPackages
    }

    fn name(&self) -> &'static str {
        "packages"
    }

    fn observe(&self, ctx: &StepContext<'_>) -> Result<PackageObservation> {
        let packages = &ctx.host.packages;
        let repository_configured = match &ctx.profile.repository {
            Some(repo) => Some(packages.repository_configured(repo)?),
            None => None,
        };

        Ok(PackageObservation {
            repository_configured,
            client_installed: packages.is_installed(&ctx.profile.client_package)?,
            server_installed: packages.is_installed(&ctx.profile.server_package)?,
        })
    }

    fn plan(&self, ctx: &StepContext<'_>, observation: &PackageObservation) -> Vec<Action> {
        let mut actions = Vec::new();

        if let (Some(repo), Some(false)) =
            (&ctx.profile.repository, observation.repository_configured)
        {
            actions.push(Action::ConfigureRepository(repo.clone()));
        }
        if !observation.client_installed {
            actions.push(Action::InstallPackage(ctx.profile.client_package.clone()));
        }
        if !observation.server_installed {
            actions.push(Action::InstallPackage(ctx.profile.server_package.clone()));
        }

        actions
    }
}
