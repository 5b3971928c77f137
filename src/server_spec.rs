//! Resolved server intent.
//!
//! [`ServerSpec`] is built once per run from a [`ServerConfig`] and the
//! platform family. Every default the configuration leaves open is derived
//! here, and every value is validated, so the steps only ever see a
//! complete, well-formed intent.

use std::path::{Path, PathBuf};

use crate::config::ServerConfig;
use crate::error::{ReconcileError, Result};
use crate::types::{PasswordSetting, PlatformFamily, TemplateSource};

/// Immutable, fully resolved server intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub version: String,
    pub setup_repo: bool,
    pub data_directory: PathBuf,
    pub config_directory: PathBuf,
    pub hba_file: PathBuf,
    pub ident_file: PathBuf,
    pub external_pid_file: PathBuf,
    pub password: PasswordSetting,
    pub port: u16,
    pub template_source: TemplateSource,
    pub initdb_locale: Option<String>,
    pub user: String,
    pub database: Option<String>,
    pub host: Option<String>,
}

// ============================================================================
// Layout derivation
// ============================================================================

/// Default data directory for a version on a family
pub fn default_data_dir(family: PlatformFamily, version: &str) -> PathBuf {
    if family.is_rhel_like() {
        PathBuf::from(format!("/var/lib/pgsql/{}/data", version))
    } else {
        PathBuf::from(format!("/var/lib/postgresql/{}/main", version))
    }
}

/// Default configuration directory for a version on a family
pub fn default_conf_dir(family: PlatformFamily, version: &str) -> PathBuf {
    if family.is_rhel_like() {
        default_data_dir(family, version)
    } else {
        PathBuf::from(format!("/etc/postgresql/{}/main", version))
    }
}

/// Default external PID file for a version
pub fn default_pid_file(version: &str) -> PathBuf {
    PathBuf::from(format!("/var/run/postgresql/{}-main.pid", version))
}

/// Whether `version` has the form `N` or `N.N`
pub fn is_valid_version(version: &str) -> bool {
    let mut parts = version.split('.');
    let all_numeric = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(major), None, None) => all_numeric(major),
        (Some(major), Some(minor), None) => all_numeric(major) && all_numeric(minor),
        _ => false,
    }
}

fn require_absolute(field: &str, path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(ReconcileError::config(format!(
            "{} must be an absolute path, got '{}'",
            field,
            path.display()
        )))
    }
}

impl ServerSpec {
    /// Resolve and validate a configuration for a platform family
    pub fn resolve(config: &ServerConfig, family: PlatformFamily) -> Result<Self> {
        let version = config.version.trim().to_string();
        if !is_valid_version(&version) {
            return Err(ReconcileError::config(format!(
                "version must look like '12' or '9.6', got '{}'",
                config.version
            )));
        }

        let port = u16::try_from(config.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                ReconcileError::config(format!("port must be in 1..=65535, got {}", config.port))
            })?;

        if config.user.trim().is_empty() {
            return Err(ReconcileError::config("user must not be empty"));
        }

        if let PasswordSetting::Literal(secret) = &config.password {
            if secret.is_empty() {
                return Err(ReconcileError::config(
                    "password must not be empty; use null to leave it unmanaged",
                ));
            }
        }

        let data_directory = config
            .data_directory
            .clone()
            .unwrap_or_else(|| default_data_dir(family, &version));
        let config_directory = config
            .config_directory
            .clone()
            .unwrap_or_else(|| default_conf_dir(family, &version));
        let hba_file = config
            .hba_file
            .clone()
            .unwrap_or_else(|| config_directory.join("pg_hba.conf"));
        let ident_file = config
            .ident_file
            .clone()
            .unwrap_or_else(|| config_directory.join("pg_ident.conf"));
        let external_pid_file = config
            .external_pid_file
            .clone()
            .unwrap_or_else(|| default_pid_file(&version));

        for (field, path) in [
            ("data_directory", &data_directory),
            ("config_directory", &config_directory),
            ("hba_file", &hba_file),
            ("ident_file", &ident_file),
            ("external_pid_file", &external_pid_file),
        ] {
            require_absolute(field, path)?;
        }

        let template_source = config.template_source();
        if let TemplateSource::Directory(dir) = &template_source {
            require_absolute("template_source", dir)?;
        }

        Ok(Self {
            version,
            setup_repo: config.setup_repo,
            data_directory,
            config_directory,
            hba_file,
            ident_file,
            external_pid_file,
            password: config.password.clone(),
            port,
            template_source,
            initdb_locale: config.initdb_locale.clone().filter(|l| !l.is_empty()),
            user: config.user.clone(),
            database: config.database.clone(),
            host: config.host.clone(),
        })
    }

    /// `version` without dots, as used in rhel-like package names
    pub fn version_nodot(&self) -> String {
        self.version.replace('.', "")
    }
}
