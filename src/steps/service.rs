//! ServiceReconciler: unit override, enabled at boot, running.
//!
//! On families with a unit override the unit is rendered from the
//! `postgresql.service` template on every run. A content change is followed
//! by `daemon-reload`, and by a restart when the service is already running.

use super::{Action, Step, StepContext};
use crate::error::Result;
use crate::host::template::SERVICE_UNIT_TEMPLATE;
use crate::host::FileSpec;
use crate::state::Phase;

/// Rendered and on-disk unit override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitState {
    pub file: FileSpec,
    pub rendered: String,
    pub current: Option<String>,
    /// Owner, group and mode already match
    pub metadata_ok: bool,
}

impl UnitState {
    pub fn content_changed(&self) -> bool {
        self.current.as_deref() != Some(self.rendered.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceObservation {
    /// `None` on families without a unit override
    pub unit: Option<UnitState>,
    pub enabled: bool,
    /// `None` when the service does not support status
    pub active: Option<bool>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceReconciler;

impl ServiceReconciler {
    fn unit_file(path: &std::path::Path) -> FileSpec {
        FileSpec {
            path: path.to_path_buf(),
            owner: "root".to_string(),
            group: "root".to_string(),
            mode: 0o644,
        }
    }
}

impl Step for ServiceReconciler {
    type Observation = ServiceObservation;

    fn phase(&self) -> Phase {
        Phase::ReconcilingService
    }

    fn name(&self) -> &'static str {
        "service"
    }

    fn observe(&self, ctx: &StepContext<'_>) -> Result<ServiceObservation> {
        let host = ctx.host;
        let service = ctx.profile.service_name.as_str();

        let unit = match &ctx.profile.unit_override {
            Some(path) => {
                let file = Self::unit_file(path);
                let rendered = host
                    .templates
                    .render(SERVICE_UNIT_TEMPLATE, &ctx.profile.unit_vars(ctx.spec))?;
                let current = host.fs.read_file(path)?;
                let metadata_ok = host
                    .fs
                    .inspect_directory(path)?
                    .is_some_and(|info| info.matches(&file.owner, &file.group, file.mode));
                Some(UnitState {
                    file,
                    rendered,
                    current,
                    metadata_ok,
                })
            }
            None => None,
        };

        let active = if ctx.profile.supports.status {
            Some(host.services.is_active(service)?)
        } else {
            None
        };

        Ok(ServiceObservation {
            unit,
            enabled: host.services.is_enabled(service)?,
            active,
        })
    }

    fn plan(&self, ctx: &StepContext<'_>, observation: &ServiceObservation) -> Vec<Action> {
        let service = &ctx.profile.service_name;
        let mut actions = Vec::new();
        let mut unit_changed = false;

        if let Some(unit) = &observation.unit {
            unit_changed = unit.content_changed();
            if unit_changed || !unit.metadata_ok {
                actions.push(Action::WriteUnitFile {
                    file: unit.file.clone(),
                    content: unit.rendered.clone(),
                });
            }
            if unit_changed {
                actions.push(Action::DaemonReload);
            }
        }

        if !observation.enabled {
            actions.push(Action::EnableService(service.clone()));
        }

        match (observation.active, unit_changed) {
            (Some(true), false) => {}
            (Some(false), _) => actions.push(Action::StartService(service.clone())),
            (Some(true), true) | (None, true) => {
                actions.push(Action::RestartService(service.clone()))
            }
            (None, false) => actions.push(Action::StartService(service.clone())),
        }

        actions
    }
}
