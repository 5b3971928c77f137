//! pgreconcile Library
//!
//! Idempotent reconciliation of a PostgreSQL server install: packages, data
//! directory, database initialization, service and administrative password.

pub mod cli;
pub mod command_args;
pub mod config;
pub mod error;
pub mod host;
pub mod lock;
pub mod platform;
pub mod process_guard;
pub mod reconciler;
pub mod sanity;
pub mod secret;
pub mod server_spec;
pub mod state;
pub mod steps;
pub mod types;

// Re-export main types for convenience
pub use config::ServerConfig;
pub use error::{ReconcileError, Result};
#[cfg(any(test, feature = "__test_support"))]
pub use host::fake::FakeHost;
pub use host::Host;
pub use lock::RunLock;
pub use platform::{HostFacts, PlatformProfile};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use reconciler::{Reconciler, RunReport};
pub use secret::Secret;
pub use server_spec::ServerSpec;
pub use state::{Phase, PhaseTransitionError, ReconciliationState};
pub use steps::{Action, StepOutcome, StepReport};
pub use types::{PasswordSetting, PlatformFamily, TemplateSource};
