//! Reconciliation state machine
//!
//! [`ReconciliationState`] is the run-scoped context threaded through the
//! pipeline by `&mut`. It owns the current [`Phase`], enforces forward-only
//! transitions and collects the report of every step. It is created when a
//! run starts and dropped when it ends; nothing is persisted.
//!
//! ```text
//! NotStarted
//!     ↓
//! InstallingPackages
//!     ↓
//! ProvisioningDataDirectory
//!     ↓
//! InitializingDatabase
//!     ↓
//! ReconcilingService
//!     ↓
//! SettingCredentials
//!     ↓
//! Completed
//!
//! (Any non-terminal phase can transition to Failed)
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::server_spec::ServerSpec;
use crate::steps::StepReport;

/// Reconciliation phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    NotStarted = 0,
    InstallingPackages = 1,
    ProvisioningDataDirectory = 2,
    InitializingDatabase = 3,
    ReconcilingService = 4,
    SettingCredentials = 5,
    /// Terminal: every step converged
    Completed = 6,
    /// Terminal: a step failed, see [`ReconciliationState::failed_at`]
    Failed = 255,
}

impl Phase {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Next phase in sequence, `None` for terminal phases
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::InstallingPackages),
            Self::InstallingPackages => Some(Self::ProvisioningDataDirectory),
            Self::ProvisioningDataDirectory => Some(Self::InitializingDatabase),
            Self::InitializingDatabase => Some(Self::ReconcilingService),
            Self::ReconcilingService => Some(Self::SettingCredentials),
            Self::SettingCredentials => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::InstallingPackages => "Installing packages",
            Self::ProvisioningDataDirectory => "Provisioning data directory",
            Self::InitializingDatabase => "Initializing database",
            Self::ReconcilingService => "Reconciling service",
            Self::SettingCredentials => "Setting credentials",
            Self::Completed => "Reconciliation complete",
            Self::Failed => "Reconciliation failed",
        }
    }

    /// The phases that run a step, in order
    pub const fn step_phases() -> &'static [Self] {
        &[
            Self::InstallingPackages,
            Self::ProvisioningDataDirectory,
            Self::InitializingDatabase,
            Self::ReconcilingService,
            Self::SettingCredentials,
        ]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors from invalid phase transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransitionError {
    #[error("Cannot skip from {from} to {to}")]
    SkippedPhase { from: Phase, to: Phase },

    #[error("Cannot go backwards from {from} to {to}")]
    BackwardTransition { from: Phase, to: Phase },

    #[error("Cannot transition from terminal phase {from}")]
    FromTerminalPhase { from: Phase },
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Run-scoped reconciliation context.
#[derive(Debug, Clone)]
pub struct ReconciliationState {
    current: Phase,
    failed_at: Option<Phase>,
    /// Phases entered, with unix timestamps
    history: Vec<(Phase, u64)>,

    // Values later steps (and callers) read back from the run
    pub version: String,
    pub data_dir: PathBuf,
    pub conf_dir: PathBuf,

    reports: Vec<StepReport>,
}

impl ReconciliationState {
    pub fn new(spec: &ServerSpec) -> Self {
        Self {
            current: Phase::NotStarted,
            failed_at: None,
            history: Vec::with_capacity(Phase::step_phases().len() + 2),
            version: spec.version.clone(),
            data_dir: spec.data_directory.clone(),
            conf_dir: spec.config_directory.clone(),
            reports: Vec::new(),
        }
    }

    #[inline]
    pub fn current_phase(&self) -> Phase {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<Phase> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == Phase::Completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.current == Phase::Failed
    }

    pub fn history(&self) -> &[(Phase, u64)] {
        &self.history
    }

    pub fn reports(&self) -> &[StepReport] {
        &self.reports
    }

    pub fn record(&mut self, report: StepReport) {
        self.reports.push(report);
    }

    /// Move to the next phase.
    pub fn advance(&mut self) -> Result<Phase, PhaseTransitionError> {
        let next = self
            .current
            .next()
            .ok_or(PhaseTransitionError::FromTerminalPhase { from: self.current })?;
        self.enter(next);
        Ok(next)
    }

    /// Move to `target`, which must be the next phase.
    pub fn transition_to(&mut self, target: Phase) -> Result<(), PhaseTransitionError> {
        if self.current.is_terminal() {
            return Err(PhaseTransitionError::FromTerminalPhase { from: self.current });
        }
        if target == Phase::Failed {
            self.fail();
            return Ok(());
        }
        if target.order() <= self.current.order() {
            return Err(PhaseTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next() != Some(target) {
            return Err(PhaseTransitionError::SkippedPhase {
                from: self.current,
                to: target,
            });
        }
        self.enter(target);
        Ok(())
    }

    /// Mark the run failed at the current phase. No-op once terminal.
    pub fn fail(&mut self) {
        if self.current.is_terminal() {
            return;
        }
        tracing::error!("Reconciliation failed during: {}", self.current);
        self.failed_at = Some(self.current);
        self.enter(Phase::Failed);
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!("Phase {} -> {}", self.current, phase);
        self.history.push((phase, unix_now()));
        self.current = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::types::PlatformFamily;

    fn state() -> ReconciliationState {
        let spec = ServerSpec::resolve(&ServerConfig::default(), PlatformFamily::Rhel).unwrap();
        ReconciliationState::new(&spec)
    }

    #[test]
    fn test_new_state_carries_run_values() {
        let state = state();
        assert_eq!(state.current_phase(), Phase::NotStarted);
        assert_eq!(state.version, "9.6");
        assert_eq!(state.data_dir, PathBuf::from("/var/lib/pgsql/9.6/data"));
        assert_eq!(state.conf_dir, state.data_dir);
        assert!(state.history().is_empty());
    }

    #[test]
    fn test_advance_through_all_phases() {
        let mut state = state();
        for expected in Phase::step_phases() {
            assert_eq!(state.advance().unwrap(), *expected);
        }
        assert_eq!(state.advance().unwrap(), Phase::Completed);
        assert!(state.is_complete());
        assert_eq!(
            state.advance(),
            Err(PhaseTransitionError::FromTerminalPhase {
                from: Phase::Completed
            })
        );
        assert_eq!(state.history().len(), Phase::step_phases().len() + 1);
    }

    #[test]
    fn test_cannot_skip_or_go_back() {
        let mut state = state();
        assert!(matches!(
            state.transition_to(Phase::InitializingDatabase),
            Err(PhaseTransitionError::SkippedPhase { .. })
        ));

        state.transition_to(Phase::InstallingPackages).unwrap();
        assert!(matches!(
            state.transition_to(Phase::NotStarted),
            Err(PhaseTransitionError::BackwardTransition { .. })
        ));
    }

    #[test]
    fn test_fail_records_phase() {
        let mut state = state();
        state.advance().unwrap();
        state.advance().unwrap();
        state.fail();

        assert!(state.is_failed());
        assert_eq!(state.failed_at(), Some(Phase::ProvisioningDataDirectory));

        // Terminal: a second failure does not overwrite the first
        state.fail();
        assert_eq!(state.failed_at(), Some(Phase::ProvisioningDataDirectory));
        assert!(state.advance().is_err());
    }

    #[test]
    fn test_phase_order_matches_next() {
        let mut phase = Phase::NotStarted;
        while let Some(next) = phase.next() {
            assert!(next.order() > phase.order());
            phase = next;
        }
        assert_eq!(phase, Phase::Completed);
    }
}
