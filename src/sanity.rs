//! Pre-flight sanity checks for the runtime environment
//!
//! Verified before a reconciliation run touches the host:
//! - Running with root privileges (EUID 0)
//! - The binaries the host collaborators shell out to are on `PATH`
//!
//! If any check fails, the program exits with a clear error message
//! before any lock is taken or any probe runs.

use std::env;
use std::path::Path;

use crate::host::PackageTool;
use crate::types::PlatformFamily;

/// Environment variable that disables the root check (development only)
pub const SKIP_ROOT_ENV: &str = "PGRECONCILE_SKIP_ROOT_CHECK";

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }
}

/// Binaries needed on every family
const REQUIRED_BINARIES: &[&str] = &[
    "systemctl", // Service manager
    "runuser",   // Commands as the postgres account (util-linux)
];

/// Binaries a run on `family` needs
pub fn required_binaries(family: PlatformFamily, tool: PackageTool, setup_repo: bool) -> Vec<&'static str> {
    let mut binaries: Vec<&'static str> = REQUIRED_BINARIES.to_vec();
    binaries.extend_from_slice(tool.required_binaries());
    // The apt signing key is downloaded; yum fetches its own
    if setup_repo && !family.is_rhel_like() {
        binaries.push("curl");
    }
    binaries
}

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    let Some(path) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path).any(|dir| is_executable(&dir.join(name)))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Check if running as root (EUID 0)
fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Perform all sanity checks and return the result
pub fn verify_environment(family: PlatformFamily, tool: PackageTool, setup_repo: bool) -> SanityCheckResult {
    let missing = required_binaries(family, tool, setup_repo)
        .into_iter()
        .filter(|binary| !binary_exists(binary))
        .map(str::to_string)
        .collect();

    SanityCheckResult {
        missing_binaries: missing,
        is_root: is_running_as_root(),
    }
}

/// Print a pretty error message to stderr and exit
pub fn print_error_and_exit(result: &SanityCheckResult) -> ! {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║               pgreconcile - Pre-flight Check Failed              ║");
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();

    if !result.is_root {
        eprintln!("❌ ERROR: Root privileges required");
        eprintln!("   Installing packages and managing services requires root.");
        eprintln!();
        eprintln!("   Solution: Run with sudo or as root user:");
        eprintln!("     sudo pgreconcile apply");
        eprintln!();
    }

    if !result.missing_binaries.is_empty() {
        eprintln!("❌ ERROR: Missing required binaries");
        eprintln!();
        for binary in &result.missing_binaries {
            eprintln!("   • {} (package: {})", binary, get_package_for_binary(binary));
        }
        eprintln!();
    }

    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║  Fix the above issues and try again.                             ║");
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();

    std::process::exit(1);
}

/// Map binary names to the package providing them
fn get_package_for_binary(binary: &str) -> &'static str {
    match binary {
        "systemctl" => "systemd",
        "runuser" => "util-linux",
        "curl" => "curl",
        "dpkg-query" => "dpkg",
        "apt-get" => "apt",
        "rpm" => "rpm",
        "dnf" => "dnf",
        "yum" => "yum",
        _ => "unknown", // Fallback for unknown binaries
    }
}

/// Skip root check (for development/testing)
/// Set PGRECONCILE_SKIP_ROOT_CHECK=1 to skip
pub fn should_skip_root_check() -> bool {
    env::var(SKIP_ROOT_ENV)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Run pre-flight checks, exiting on failure
pub fn run_preflight_checks(family: PlatformFamily, tool: PackageTool, setup_repo: bool) {
    tracing::debug!("Running pre-flight sanity checks...");

    let mut result = verify_environment(family, tool, setup_repo);

    if should_skip_root_check() {
        tracing::warn!("Root check skipped ({}=1)", SKIP_ROOT_ENV);
        result.is_root = true;
    }

    if !result.is_ok() {
        print_error_and_exit(&result);
    }

    tracing::info!("Pre-flight checks passed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_exists_sh() {
        assert!(binary_exists("sh"), "sh should be available");
    }

    #[test]
    fn test_binary_exists_nonexistent() {
        assert!(!binary_exists("this_binary_definitely_does_not_exist_12345"));
    }

    #[test]
    fn test_required_binaries_per_family() {
        let debian = required_binaries(PlatformFamily::Debian, PackageTool::Apt, true);
        assert!(debian.contains(&"apt-get"));
        assert!(debian.contains(&"curl"));

        let debian_no_repo = required_binaries(PlatformFamily::Debian, PackageTool::Apt, false);
        assert!(!debian_no_repo.contains(&"curl"));

        let rhel = required_binaries(PlatformFamily::Rhel, PackageTool::Dnf, true);
        assert!(rhel.contains(&"rpm"));
        assert!(rhel.contains(&"systemctl"));
        assert!(!rhel.contains(&"curl"));
    }

    #[test]
    fn test_package_mapping() {
        assert_eq!(get_package_for_binary("runuser"), "util-linux");
        assert_eq!(get_package_for_binary("dpkg-query"), "dpkg");
    }

    #[test]
    fn test_sanity_result_is_ok() {
        let ok_result = SanityCheckResult {
            missing_binaries: vec![],
            is_root: true,
        };
        assert!(ok_result.is_ok());

        let missing_binary = SanityCheckResult {
            missing_binaries: vec!["systemctl".to_string()],
            is_root: true,
        };
        assert!(!missing_binary.is_ok());

        let not_root = SanityCheckResult {
            missing_binaries: vec![],
            is_root: false,
        };
        assert!(!not_root.is_ok());
    }
}
