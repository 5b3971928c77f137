//! Platform detection and name resolution.
//!
//! [`HostFacts`] is what the host says about itself (`/etc/os-release` plus
//! the CPU architecture). [`PlatformProfile`] turns a [`ServerSpec`] and
//! those facts into concrete names: packages, service, binaries, unit
//! override and repository definition. Resolution is pure; only
//! [`HostFacts::detect`] touches the filesystem.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::command_args::InitDbArgs;
use crate::error::{ReconcileError, Result};
use crate::host::packages::{RepositoryDefinition, SigningKey};
use crate::host::services::ServiceSupports;
use crate::host::template::TemplateVars;
use crate::server_spec::ServerSpec;
use crate::types::PlatformFamily;

/// Location of the os-release file
pub const OS_RELEASE: &str = "/etc/os-release";

const YUM_BASE: &str = "https://download.postgresql.org/pub/repos/yum";
const APT_BASE: &str = "https://apt.postgresql.org/pub/repos/apt";
const APT_KEY_URL: &str = "https://www.postgresql.org/media/keys/ACCC4CF8.asc";
const APT_KEY_PATH: &str = "/usr/share/keyrings/pgdg.asc";
const UNIT_OVERRIDE_DIR: &str = "/etc/systemd/system";

// ============================================================================
// Host facts
// ============================================================================

/// Facts about the host operating system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFacts {
    pub family: PlatformFamily,
    pub distro_id: String,
    pub version_id: String,
    pub codename: Option<String>,
    pub arch: String,
}

/// Map an os-release `ID` (or one `ID_LIKE` entry) to a family
pub fn family_for_id(id: &str) -> Option<PlatformFamily> {
    match id {
        "rhel" | "centos" | "rocky" | "almalinux" | "ol" | "scientific" => {
            Some(PlatformFamily::Rhel)
        }
        "fedora" => Some(PlatformFamily::Fedora),
        "amzn" => Some(PlatformFamily::Amazon),
        "debian" | "ubuntu" | "linuxmint" | "raspbian" | "pop" => Some(PlatformFamily::Debian),
        _ => None,
    }
}

fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

impl HostFacts {
    /// Build facts from os-release content.
    ///
    /// `family_override` replaces the detected family; without it an
    /// unrecognized distribution is a configuration error.
    pub fn from_os_release(
        content: &str,
        arch: &str,
        family_override: Option<PlatformFamily>,
    ) -> Result<Self> {
        let fields = parse_os_release(content);
        let distro_id = fields.get("ID").cloned().unwrap_or_default();

        let detected = family_for_id(&distro_id).or_else(|| {
            fields
                .get("ID_LIKE")
                .and_then(|like| like.split_whitespace().find_map(family_for_id))
        });

        let family = family_override.or(detected).ok_or_else(|| {
            ReconcileError::config(format!(
                "unsupported platform '{}'; use --platform-family to override",
                distro_id
            ))
        })?;

        let codename = fields
            .get("VERSION_CODENAME")
            .or_else(|| fields.get("UBUNTU_CODENAME"))
            .filter(|c| !c.is_empty())
            .cloned();

        Ok(Self {
            family,
            distro_id,
            version_id: fields.get("VERSION_ID").cloned().unwrap_or_default(),
            codename,
            arch: arch.to_string(),
        })
    }

    /// Detect facts from the running host
    pub fn detect(family_override: Option<PlatformFamily>) -> Result<Self> {
        Self::detect_from(Path::new(OS_RELEASE), family_override)
    }

    pub fn detect_from(path: &Path, family_override: Option<PlatformFamily>) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if family_override.is_some() => {
                tracing::warn!("Cannot read {} ({}), relying on family override", path.display(), e);
                String::new()
            }
            Err(e) => {
                return Err(ReconcileError::probe(
                    "platform",
                    format!("cannot read {}: {}", path.display(), e),
                ));
            }
        };

        let facts = Self::from_os_release(&content, std::env::consts::ARCH, family_override)?;
        tracing::info!(
            "Platform: family={} id={} version={} arch={}",
            facts.family,
            facts.distro_id,
            facts.version_id,
            facts.arch
        );
        Ok(facts)
    }

    /// Major release number used in PGDG yum paths
    pub fn rhel_major(&self) -> Result<String> {
        let major = self.version_id.split('.').next().unwrap_or_default();
        let mapped = match self.family {
            PlatformFamily::Amazon => match major {
                "2" => "7",
                "2023" => "9",
                other => {
                    return Err(ReconcileError::config(format!(
                        "no PGDG repository for Amazon Linux {}",
                        other
                    )));
                }
            },
            _ => major,
        };
        if mapped.is_empty() {
            return Err(ReconcileError::config(
                "cannot determine the release version for the PGDG repository",
            ));
        }
        Ok(mapped.to_string())
    }
}

// ============================================================================
// Name resolution
// ============================================================================

/// Service unit name for a version on a family
pub fn service_name(family: PlatformFamily, version: &str) -> String {
    if family.is_rhel_like() {
        format!("postgresql-{}", version)
    } else {
        "postgresql".to_string()
    }
}

/// Server package name
pub fn server_package(family: PlatformFamily, version: &str) -> String {
    if family.is_rhel_like() {
        format!("postgresql{}-server", version.replace('.', ""))
    } else {
        format!("postgresql-{}", version)
    }
}

/// Client package name
pub fn client_package(family: PlatformFamily, version: &str) -> String {
    if family.is_rhel_like() {
        format!("postgresql{}", version.replace('.', ""))
    } else {
        format!("postgresql-client-{}", version)
    }
}

/// Directory holding the server binaries
pub fn bin_dir(family: PlatformFamily, version: &str) -> PathBuf {
    if family.is_rhel_like() {
        PathBuf::from(format!("/usr/pgsql-{}/bin", version))
    } else {
        PathBuf::from(format!("/usr/lib/postgresql/{}/bin", version))
    }
}

/// PGDG yum repository for a version
pub fn yum_repository(version: &str, facts: &HostFacts) -> Result<RepositoryDefinition> {
    let nodot = version.replace('.', "");
    let (tree, dist) = match facts.family {
        PlatformFamily::Fedora => ("fedora", "fedora"),
        _ => ("redhat", "rhel"),
    };
    let major = facts.rhel_major()?;
    let name = format!("pgdg{}", nodot);

    let content = format!(
        "[{name}]\n\
         name=PostgreSQL {version} for {dist} {major} - {arch}\n\
         baseurl={YUM_BASE}/{version}/{tree}/{dist}-{major}-{arch}\n\
         enabled=1\n\
         gpgcheck=1\n\
         gpgkey={YUM_BASE}/RPM-GPG-KEY-PGDG-{nodot}\n",
        arch = facts.arch,
    );

    Ok(RepositoryDefinition {
        path: PathBuf::from(format!("/etc/yum.repos.d/pgdg-{}.repo", nodot)),
        name,
        content,
        key: None,
    })
}

/// PGDG apt repository for the host's release
pub fn apt_repository(facts: &HostFacts) -> Result<RepositoryDefinition> {
    let codename = facts.codename.as_deref().ok_or_else(|| {
        ReconcileError::config("os-release has no VERSION_CODENAME; cannot configure the PGDG apt repository")
    })?;

    Ok(RepositoryDefinition {
        name: "pgdg".to_string(),
        path: PathBuf::from("/etc/apt/sources.list.d/pgdg.list"),
        content: format!(
            "deb [signed-by={APT_KEY_PATH}] {APT_BASE} {codename}-pgdg main\n"
        ),
        key: Some(SigningKey {
            url: APT_KEY_URL.to_string(),
            path: PathBuf::from(APT_KEY_PATH),
        }),
    })
}

/// Concrete names and commands for one server on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    pub family: PlatformFamily,
    pub service_name: String,
    pub server_package: String,
    pub client_package: String,
    pub bin_dir: PathBuf,
    /// Set on families that initialize the data directory explicitly
    pub initdb: Option<InitDbArgs>,
    /// Set on families that receive a unit override
    pub unit_override: Option<PathBuf>,
    /// Set when repository setup is requested
    pub repository: Option<RepositoryDefinition>,
    pub supports: ServiceSupports,
}

impl PlatformProfile {
    pub fn resolve(spec: &ServerSpec, facts: &HostFacts) -> Result<Self> {
        let family = facts.family;
        let version = spec.version.as_str();
        let service = service_name(family, version);
        let bin = bin_dir(family, version);

        let initdb = family.requires_explicit_initdb().then(|| InitDbArgs {
            binary: bin.join("initdb"),
            data_dir: spec.data_directory.clone(),
            locale: spec.initdb_locale.clone(),
        });

        let unit_override = family
            .uses_unit_override()
            .then(|| Path::new(UNIT_OVERRIDE_DIR).join(format!("{}.service", service)));

        let repository = match (spec.setup_repo, family.is_rhel_like()) {
            (false, _) => None,
            (true, true) => Some(yum_repository(version, facts)?),
            (true, false) => Some(apt_repository(facts)?),
        };

        Ok(Self {
            family,
            service_name: service,
            server_package: server_package(family, version),
            client_package: client_package(family, version),
            bin_dir: bin,
            initdb,
            unit_override,
            repository,
            supports: ServiceSupports::default(),
        })
    }

    /// Variables for the unit override template
    pub fn unit_vars(&self, spec: &ServerSpec) -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.insert("service_name", self.service_name.clone());
        vars.insert("port", spec.port.to_string());
        vars.insert("data_dir", spec.data_directory.display().to_string());
        vars.insert("version", spec.version.clone());
        vars.insert("bin_dir", self.bin_dir.display().to_string());
        vars
    }

    /// Marker whose presence means the data directory is initialized
    pub fn initialized_marker(spec: &ServerSpec) -> PathBuf {
        spec.data_directory.join("PG_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    const ROCKY_9: &str = r#"NAME="Rocky Linux"
VERSION="9.3 (Blue Onyx)"
ID="rocky"
ID_LIKE="rhel centos fedora"
VERSION_ID="9.3"
"#;

    const BOOKWORM: &str = "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\n\
                            ID=debian\n\
                            VERSION_ID=\"12\"\n\
                            VERSION_CODENAME=bookworm\n";

    fn spec(version: &str, family: PlatformFamily) -> ServerSpec {
        let config = ServerConfig {
            version: version.to_string(),
            ..ServerConfig::default()
        };
        ServerSpec::resolve(&config, family).unwrap()
    }

    #[test]
    fn test_facts_from_os_release() {
        let facts = HostFacts::from_os_release(ROCKY_9, "x86_64", None).unwrap();
        assert_eq!(facts.family, PlatformFamily::Rhel);
        assert_eq!(facts.distro_id, "rocky");
        assert_eq!(facts.version_id, "9.3");
        assert_eq!(facts.rhel_major().unwrap(), "9");

        let facts = HostFacts::from_os_release(BOOKWORM, "aarch64", None).unwrap();
        assert_eq!(facts.family, PlatformFamily::Debian);
        assert_eq!(facts.codename.as_deref(), Some("bookworm"));
    }

    #[test]
    fn test_facts_id_like_fallback_and_override() {
        let content = "ID=someclone\nID_LIKE=\"rhel fedora\"\nVERSION_ID=8\n";
        let facts = HostFacts::from_os_release(content, "x86_64", None).unwrap();
        assert_eq!(facts.family, PlatformFamily::Rhel);

        let unknown = "ID=arch\n";
        assert!(HostFacts::from_os_release(unknown, "x86_64", None).is_err());
        let forced =
            HostFacts::from_os_release(unknown, "x86_64", Some(PlatformFamily::Debian)).unwrap();
        assert_eq!(forced.family, PlatformFamily::Debian);
    }

    #[test]
    fn test_amazon_major_mapping() {
        let facts = HostFacts::from_os_release("ID=amzn\nVERSION_ID=\"2023\"\n", "x86_64", None)
            .unwrap();
        assert_eq!(facts.family, PlatformFamily::Amazon);
        assert_eq!(facts.rhel_major().unwrap(), "9");

        let facts = HostFacts::from_os_release("ID=amzn\nVERSION_ID=\"1\"\n", "x86_64", None)
            .unwrap();
        assert!(facts.rhel_major().is_err());
    }

    #[test]
    fn test_names_are_deterministic() {
        assert_eq!(service_name(PlatformFamily::Rhel, "9.6"), "postgresql-9.6");
        assert_eq!(service_name(PlatformFamily::Debian, "9.6"), "postgresql");
        assert_eq!(server_package(PlatformFamily::Fedora, "9.6"), "postgresql96-server");
        assert_eq!(server_package(PlatformFamily::Debian, "12"), "postgresql-12");
        assert_eq!(client_package(PlatformFamily::Amazon, "12"), "postgresql12");
        assert_eq!(client_package(PlatformFamily::Debian, "12"), "postgresql-client-12");
    }

    #[test]
    fn test_rhel_profile() {
        let facts = HostFacts::from_os_release(ROCKY_9, "x86_64", None).unwrap();
        let spec = spec("9.6", PlatformFamily::Rhel);
        let profile = PlatformProfile::resolve(&spec, &facts).unwrap();

        assert_eq!(
            profile.unit_override,
            Some(PathBuf::from("/etc/systemd/system/postgresql-9.6.service"))
        );
        let initdb = profile.initdb.unwrap();
        assert_eq!(initdb.binary, PathBuf::from("/usr/pgsql-9.6/bin/initdb"));
        assert_eq!(initdb.data_dir, PathBuf::from("/var/lib/pgsql/9.6/data"));

        let repo = profile.repository.unwrap();
        assert_eq!(repo.path, PathBuf::from("/etc/yum.repos.d/pgdg-96.repo"));
        assert!(repo.content.contains(
            "baseurl=https://download.postgresql.org/pub/repos/yum/9.6/redhat/rhel-9-x86_64"
        ));
        assert!(repo.content.contains("RPM-GPG-KEY-PGDG-96"));
    }

    #[test]
    fn test_debian_profile() {
        let facts = HostFacts::from_os_release(BOOKWORM, "x86_64", None).unwrap();
        let spec = spec("12", PlatformFamily::Debian);
        let profile = PlatformProfile::resolve(&spec, &facts).unwrap();

        assert!(profile.initdb.is_none());
        assert!(profile.unit_override.is_none());
        let repo = profile.repository.unwrap();
        assert_eq!(
            repo.content,
            "deb [signed-by=/usr/share/keyrings/pgdg.asc] https://apt.postgresql.org/pub/repos/apt bookworm-pgdg main\n"
        );
        assert_eq!(repo.key.unwrap().path, PathBuf::from("/usr/share/keyrings/pgdg.asc"));
    }

    #[test]
    fn test_no_repository_without_setup_repo() {
        let facts = HostFacts::from_os_release("ID=debian\n", "x86_64", None).unwrap();
        let config = ServerConfig {
            setup_repo: false,
            ..ServerConfig::default()
        };
        let spec = ServerSpec::resolve(&config, PlatformFamily::Debian).unwrap();
        // No codename is fine when no repository is needed
        assert!(PlatformProfile::resolve(&spec, &facts).unwrap().repository.is_none());
    }

    #[test]
    fn test_unit_vars() {
        let facts = HostFacts::from_os_release(ROCKY_9, "x86_64", None).unwrap();
        let spec = spec("9.6", PlatformFamily::Rhel);
        let profile = PlatformProfile::resolve(&spec, &facts).unwrap();
        let vars = profile.unit_vars(&spec);
        assert_eq!(vars["service_name"], "postgresql-9.6");
        assert_eq!(vars["port"], "5432");
        assert_eq!(vars["data_dir"], "/var/lib/pgsql/9.6/data");
    }
}
