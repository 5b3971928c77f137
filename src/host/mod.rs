//! Host collaborators.
//!
//! The reconciler never touches the operating system directly. Every probe
//! and every mutation goes through one of the traits below, bundled in a
//! [`Host`]. The system implementations shell out to native tools. The
//! in-memory `fake` module is only built for tests.

#[cfg(any(test, feature = "__test_support"))]
pub mod fake;
pub mod fs;
pub mod packages;
pub mod process;
pub mod services;
pub mod template;

pub use fs::{DirectorySpec, FileSpec, Filesystem, LocalFilesystem, PathInfo, WriteOutcome};
pub use packages::{PackageManager, PackageTool, RepositoryDefinition, SigningKey, SystemPackages};
pub use process::{CommandOutput, CommandSpec, ProcessExecutor, SystemExecutor};
pub use services::{ServiceManager, ServiceSupports, Systemd};
pub use template::{SourceRenderer, TemplateRenderer, TemplateVars};

use crate::types::{PlatformFamily, TemplateSource};

/// The set of collaborators a run operates through
pub struct Host {
    pub packages: Box<dyn PackageManager>,
    pub services: Box<dyn ServiceManager>,
    pub fs: Box<dyn Filesystem>,
    pub exec: Box<dyn ProcessExecutor>,
    pub templates: Box<dyn TemplateRenderer>,
}

impl Host {
    /// Collaborators backed by the local system
    pub fn system(family: PlatformFamily, templates: TemplateSource) -> Self {
        Self {
            packages: Box::new(SystemPackages::new(PackageTool::for_family(family))),
            services: Box::new(Systemd::new()),
            fs: Box::new(LocalFilesystem::new()),
            exec: Box::new(SystemExecutor::new()),
            templates: Box::new(SourceRenderer::new(templates)),
        }
    }

    /// Collaborators backed by a shared in-memory host
    #[cfg(any(test, feature = "__test_support"))]
    pub fn fake(host: &fake::FakeHost) -> Self {
        Self {
            packages: Box::new(host.clone()),
            services: Box::new(host.clone()),
            fs: Box::new(host.clone()),
            exec: Box::new(host.clone()),
            templates: Box::new(SourceRenderer::new(TemplateSource::Builtin)),
        }
    }
}
