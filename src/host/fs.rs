//! Filesystem collaborator.
//!
//! Directory creation and managed file writes with ownership and mode.
//! Managed files are written atomically: a temp file in the same directory
//! is fully written, synced, chowned and then renamed over the target.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Group, Uid, User};

use crate::error::{ReconcileError, Result};

/// Desired state of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySpec {
    pub path: PathBuf,
    pub owner: String,
    pub group: String,
    pub mode: u32,
    /// Create missing parents
    pub recursive: bool,
}

/// Desired ownership and mode of a managed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub owner: String,
    pub group: String,
    pub mode: u32,
}

/// Observed state of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub is_dir: bool,
    /// Owner name, or the numeric uid when it has no passwd entry
    pub owner: String,
    /// Group name, or the numeric gid when it has no group entry
    pub group: String,
    /// Permission bits (`mode & 0o7777`)
    pub mode: u32,
}

impl PathInfo {
    /// Whether ownership and mode match the desired values
    pub fn matches(&self, owner: &str, group: &str, mode: u32) -> bool {
        self.owner == owner && self.group == group && self.mode == mode
    }
}

/// What a managed file write changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub content_changed: bool,
    pub metadata_changed: bool,
}

impl WriteOutcome {
    pub fn changed(&self) -> bool {
        self.content_changed || self.metadata_changed
    }
}

/// Filesystem operations used by the reconciler.
pub trait Filesystem {
    /// Whether `path` exists. Permission errors are errors, not `false`.
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Ownership and mode of `path`, `None` if it does not exist
    fn inspect_directory(&self, path: &Path) -> Result<Option<PathInfo>>;

    /// Create the directory if missing and converge owner, group and mode.
    /// Returns true if anything changed.
    fn ensure_directory(&self, spec: &DirectorySpec) -> Result<bool>;

    /// Contents of a file, `None` if it does not exist
    fn read_file(&self, path: &Path) -> Result<Option<String>>;

    /// Atomically write a managed file and converge its metadata
    fn write_file(&self, spec: &FileSpec, content: &str) -> Result<WriteOutcome>;
}

/// The local filesystem.
#[derive(Debug, Default, Clone)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }

    fn resolve_uid(name: &str) -> Result<Uid> {
        User::from_name(name)
            .map_err(|e| ReconcileError::probe("user lookup", format!("{}: {}", name, e)))?
            .map(|u| u.uid)
            .ok_or_else(|| ReconcileError::config(format!("unknown user '{}'", name)))
    }

    fn resolve_gid(name: &str) -> Result<Gid> {
        Group::from_name(name)
            .map_err(|e| ReconcileError::probe("group lookup", format!("{}: {}", name, e)))?
            .map(|g| g.gid)
            .ok_or_else(|| ReconcileError::config(format!("unknown group '{}'", name)))
    }

    fn user_name(uid: u32) -> String {
        User::from_uid(Uid::from_raw(uid))
            .ok()
            .flatten()
            .map_or_else(|| uid.to_string(), |u| u.name)
    }

    fn group_name(gid: u32) -> String {
        Group::from_gid(Gid::from_raw(gid))
            .ok()
            .flatten()
            .map_or_else(|| gid.to_string(), |g| g.name)
    }

    /// Converge owner, group and mode of an existing path
    fn converge_metadata(path: &Path, owner: &str, group: &str, mode: u32) -> Result<bool> {
        let uid = Self::resolve_uid(owner)?;
        let gid = Self::resolve_gid(group)?;
        let meta = fs::metadata(path)?;
        let mut changed = false;

        if meta.uid() != uid.as_raw() || meta.gid() != gid.as_raw() {
            nix::unistd::chown(path, Some(uid), Some(gid)).map_err(std::io::Error::from)?;
            tracing::info!("chown {}:{} {}", owner, group, path.display());
            changed = true;
        }

        if meta.mode() & 0o7777 != mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
            tracing::info!("chmod {:o} {}", mode, path.display());
            changed = true;
        }

        Ok(changed)
    }

    fn temp_path_for(path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .ok_or_else(|| ReconcileError::config(format!("{} has no file name", path.display())))?;
        let temp_name = format!(".{}.pgreconcile-{}.tmp", name.to_string_lossy(), std::process::id());
        Ok(path.with_file_name(temp_name))
    }
}

impl Filesystem for LocalFilesystem {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(path.try_exists()?)
    }

    fn inspect_directory(&self, path: &Path) -> Result<Option<PathInfo>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(PathInfo {
                is_dir: meta.is_dir(),
                owner: Self::user_name(meta.uid()),
                group: Self::group_name(meta.gid()),
                mode: meta.mode() & 0o7777,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_directory(&self, spec: &DirectorySpec) -> Result<bool> {
        let mut changed = false;

        match fs::metadata(&spec.path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ReconcileError::config(format!(
                    "{} exists and is not a directory",
                    spec.path.display()
                )));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if spec.recursive {
                    fs::create_dir_all(&spec.path)?;
                } else {
                    fs::create_dir(&spec.path)?;
                }
                tracing::info!("Created directory {}", spec.path.display());
                changed = true;
            }
            Err(e) => return Err(e.into()),
        }

        changed |= Self::converge_metadata(&spec.path, &spec.owner, &spec.group, spec.mode)?;
        Ok(changed)
    }

    fn read_file(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, spec: &FileSpec, content: &str) -> Result<WriteOutcome> {
        let current = self.read_file(&spec.path)?;
        let content_changed = current.as_deref() != Some(content);

        if content_changed {
            let temp = Self::temp_path_for(&spec.path)?;
            let uid = Self::resolve_uid(&spec.owner)?;
            let gid = Self::resolve_gid(&spec.group)?;

            let written = (|| -> Result<()> {
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(spec.mode)
                    .open(&temp)?;
                file.write_all(content.as_bytes())?;
                file.sync_all()?;
                nix::unistd::chown(&temp, Some(uid), Some(gid)).map_err(std::io::Error::from)?;
                fs::set_permissions(&temp, fs::Permissions::from_mode(spec.mode))?;
                fs::rename(&temp, &spec.path)?;
                Ok(())
            })();

            if written.is_err() {
                let _ = fs::remove_file(&temp);
            }
            written?;

            tracing::info!("Wrote {} ({} bytes)", spec.path.display(), content.len());
            return Ok(WriteOutcome {
                content_changed: true,
                metadata_changed: false,
            });
        }

        let metadata_changed =
            Self::converge_metadata(&spec.path, &spec.owner, &spec.group, spec.mode)?;
        Ok(WriteOutcome {
            content_changed: false,
            metadata_changed,
        })
    }
}
