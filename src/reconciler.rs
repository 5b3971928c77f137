//! Reconciliation pipeline.
//!
//! Runs the five steps in phase order against one [`Host`]. Each step's
//! probes run immediately before its plan, so a step always sees the effects
//! of the steps before it. The first failure stops the run; there is no
//! rollback, and re-running converges from wherever the host was left.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::error::Result;
use crate::host::Host;
use crate::platform::PlatformProfile;
use crate::server_spec::ServerSpec;
use crate::state::{Phase, ReconciliationState};
use crate::steps::{
    apply, CredentialSetter, DataDirectoryProvisioner, DatabaseInitializer, PackageInstaller,
    ServiceReconciler, Step, StepContext, StepOutcome, StepReport,
};

/// Drives the steps for one server on one host
pub struct Reconciler<'a> {
    spec: &'a ServerSpec,
    profile: &'a PlatformProfile,
    host: &'a Host,
    dry_run: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(spec: &'a ServerSpec, profile: &'a PlatformProfile, host: &'a Host) -> Self {
        Self {
            spec,
            profile,
            host,
            dry_run: false,
        }
    }

    /// Plan without applying anything
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn context(&self) -> StepContext<'a> {
        StepContext {
            spec: self.spec,
            profile: self.profile,
            host: self.host,
        }
    }

    /// Run every step in order, recording reports into `state`.
    ///
    /// On error `state` is [`Phase::Failed`] and records the failing phase.
    pub fn run(&self, state: &mut ReconciliationState) -> Result<()> {
        info!(
            "Reconciling PostgreSQL {} ({}){}",
            self.spec.version,
            self.profile.family,
            if self.dry_run { " [dry run]" } else { "" }
        );

        self.run_step(&PackageInstaller, state)?;
        self.run_step(&DataDirectoryProvisioner, state)?;
        self.run_step(&DatabaseInitializer, state)?;
        self.run_step(&ServiceReconciler, state)?;
        self.run_step(&CredentialSetter, state)?;

        state.advance()?;
        info!("{}", state.current_phase());
        Ok(())
    }

    fn run_step<S: Step>(&self, step: &S, state: &mut ReconciliationState) -> Result<()> {
        state.transition_to(step.phase())?;
        let span = info_span!("step", name = step.name());
        let _enter = span.enter();

        match self.execute(step, state) {
            Ok(report) => {
                info!("{}: {}", step.phase(), report.outcome);
                state.record(report);
                Ok(())
            }
            Err(e) => {
                state.record(
                    StepReport::new(step.phase(), step.name(), StepOutcome::Failed)
                        .with_note(e.to_string()),
                );
                state.fail();
                Err(e)
            }
        }
    }

    fn execute<S: Step>(&self, step: &S, state: &ReconciliationState) -> Result<StepReport> {
        let ctx = self.context();
        let report = |outcome| StepReport::new(step.phase(), step.name(), outcome);

        if !step.applies(&ctx) {
            return Ok(report(StepOutcome::Skipped));
        }

        let pending = state.reports().iter().any(StepReport::has_changes);
        let observation = match step.observe(&ctx) {
            Ok(observation) => observation,
            Err(e) if self.dry_run && pending && e.is_probe() => {
                warn!("Deferred until earlier changes are applied: {}", e);
                return Ok(report(StepOutcome::Deferred).with_note(e.to_string()));
            }
            Err(e) => return Err(e),
        };
        debug!("Observed: {:?}", observation);

        let actions = step.plan(&ctx, &observation);
        if actions.is_empty() {
            return Ok(report(StepOutcome::Unchanged));
        }
        if self.dry_run {
            for action in &actions {
                info!("Would apply: {}", action);
            }
            return Ok(report(StepOutcome::Planned).with_actions(&actions));
        }

        for action in &actions {
            apply(&ctx, action)?;
        }
        Ok(report(StepOutcome::Changed).with_actions(&actions))
    }
}

/// Serializable summary of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub version: String,
    pub data_dir: PathBuf,
    pub conf_dir: PathBuf,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<Phase>,
    pub changed: bool,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn from_state(state: &ReconciliationState, dry_run: bool) -> Self {
        Self {
            dry_run,
            version: state.version.clone(),
            data_dir: state.data_dir.clone(),
            conf_dir: state.conf_dir.clone(),
            phase: state.current_phase(),
            failed_at: state.failed_at(),
            changed: state.reports().iter().any(StepReport::has_changes),
            steps: state.reports().to_vec(),
        }
    }
}
