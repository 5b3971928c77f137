//! Configuration file handling for saving and loading server intents.
//!
//! `ServerConfig` is the declarative input surface: what the operator writes
//! in JSON. Path fields left unset are derived per platform when the config
//! is resolved into a [`ServerSpec`](crate::server_spec::ServerSpec).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use strum::IntoEnumIterator;

use crate::error::{ReconcileError, Result};
use crate::server_spec::ServerSpec;
use crate::types::{PasswordSetting, PlatformFamily, TemplateSource};

/// Default PostgreSQL major version
pub const DEFAULT_VERSION: &str = "9.6";
/// Default listening port
pub const DEFAULT_PORT: u32 = 5432;
/// Default connection user
pub const DEFAULT_USER: &str = "postgres";

/// Server configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    // Package
    pub version: String,
    pub setup_repo: bool,

    // Layout (derived per platform when unset)
    pub data_directory: Option<PathBuf>,
    pub config_directory: Option<PathBuf>,
    pub hba_file: Option<PathBuf>,
    pub ident_file: Option<PathBuf>,
    pub external_pid_file: Option<PathBuf>,

    // Server
    pub password: PasswordSetting,
    pub port: u32, // Wider than u16 so out-of-range values reach validation
    #[serde(alias = "cookbook")]
    pub template_source: String,
    pub initdb_locale: Option<String>,

    // Connection preferences
    pub user: String,
    pub database: Option<String>,
    pub host: Option<String>,
}

impl ServerConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        tracing::info!("Configuration written to {}", path.as_ref().display());
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ReconcileError::config(format!("failed to read {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            ReconcileError::config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Parsed template source
    pub fn template_source(&self) -> TemplateSource {
        TemplateSource::parse(&self.template_source)
    }

    /// Validate the configuration against every supported platform family
    pub fn validate(&self) -> Result<()> {
        for family in PlatformFamily::iter() {
            ServerSpec::resolve(self, family)?;
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            setup_repo: true,
            data_directory: None,
            config_directory: None,
            hba_file: None,
            ident_file: None,
            external_pid_file: None,
            password: PasswordSetting::Generate,
            port: DEFAULT_PORT,
            template_source: TemplateSource::BUILTIN.to_string(),
            initdb_locale: None,
            user: DEFAULT_USER.to_string(),
            database: None,
            host: None,
        }
    }
}
