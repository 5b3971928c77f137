use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::lock::DEFAULT_LOCK_FILE;
use crate::types::PlatformFamily;

/// pgreconcile - Idempotent PostgreSQL server install reconciler
#[derive(Parser)]
#[command(name = "pgreconcile")]
#[command(about = "Converge a host to an installed, initialized and running PostgreSQL server")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: probe and plan, but change nothing.
    ///
    /// Probes that depend on changes an earlier step would make are
    /// reported as deferred.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Platform family, overriding /etc/os-release detection
    #[arg(long, global = true, value_parser = parse_family)]
    pub platform_family: Option<PlatformFamily>,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_family(value: &str) -> Result<PlatformFamily, String> {
    value
        .parse()
        .map_err(|_| format!("unknown platform family '{}' (rhel, fedora, amazon, debian)", value))
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile the host against a server configuration
    Apply {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run lock file
        #[arg(long, default_value = DEFAULT_LOCK_FILE)]
        lock_file: PathBuf,

        /// Skip the root and required binaries checks
        #[arg(long)]
        skip_preflight: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
    /// Print detected host facts and the resolved server layout
    Facts {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_requires_command() {
        let result = Cli::try_parse_from(["pgreconcile"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_apply_with_config() {
        let result = Cli::try_parse_from([
            "pgreconcile",
            "apply",
            "--config",
            "/etc/pgreconcile/server.json",
        ]);
        assert!(result.is_ok());
        let cli = result.unwrap();
        assert!(!cli.dry_run);
        match cli.command {
            Commands::Apply {
                config,
                lock_file,
                skip_preflight,
                json,
            } => {
                assert_eq!(config.unwrap().to_str().unwrap(), "/etc/pgreconcile/server.json");
                assert_eq!(lock_file.to_str().unwrap(), DEFAULT_LOCK_FILE);
                assert!(!skip_preflight);
                assert!(!json);
            }
            _ => panic!("Expected Apply command"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pgreconcile",
            "apply",
            "--dry-run",
            "--platform-family",
            "amazon",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.platform_family, Some(PlatformFamily::Amazon));
    }

    #[test]
    fn test_cli_rejects_unknown_family() {
        let result = Cli::try_parse_from(["pgreconcile", "facts", "--platform-family", "arch"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_validate_command() {
        let result = Cli::try_parse_from(["pgreconcile", "validate", "/path/to/server.json"]);
        assert!(result.is_ok());
        let cli = result.unwrap();
        match cli.command {
            Commands::Validate { config } => {
                assert_eq!(config.to_str().unwrap(), "/path/to/server.json");
            }
            _ => panic!("Expected Validate command"),
        }
    }

    #[test]
    fn test_cli_init_config_and_completions() {
        assert!(Cli::try_parse_from(["pgreconcile", "init-config", "/tmp/server.json"]).is_ok());
        assert!(Cli::try_parse_from(["pgreconcile", "completions", "bash"]).is_ok());
        assert!(Cli::try_parse_from(["pgreconcile", "completions", "tcsh"]).is_err());
    }
}
