//! Type-safe configuration types for pgreconcile
//!
//! Stringly-typed inputs (platform family, password mode, template source)
//! are parsed into enums once, at the configuration boundary.

use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;
use strum::{Display, EnumIter, EnumString};

use crate::secret::Secret;

/// Host platform family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlatformFamily {
    /// RHEL, CentOS, Rocky, AlmaLinux, Oracle Linux
    Rhel,
    Fedora,
    /// Amazon Linux
    Amazon,
    /// Debian, Ubuntu and derivatives
    Debian,
}

impl PlatformFamily {
    /// Families served by the PGDG yum tree and the `/usr/pgsql-{v}` layout
    pub fn is_rhel_like(self) -> bool {
        matches!(self, Self::Rhel | Self::Fedora | Self::Amazon)
    }

    /// Families where the data directory is initialized explicitly with initdb.
    ///
    /// Debian packages run initdb as a side effect of installation.
    pub fn requires_explicit_initdb(self) -> bool {
        self.is_rhel_like()
    }

    /// Families that receive a rendered systemd unit override
    pub fn uses_unit_override(self) -> bool {
        self.is_rhel_like()
    }
}

/// What to do with the administrative role password.
///
/// Configured as a JSON string or `null`:
/// - `"generate"` creates a random password
/// - any other string is used literally
/// - `null` leaves credentials unmanaged
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Option<String>")]
pub enum PasswordSetting {
    #[default]
    Generate,
    Literal(Secret),
    Unmanaged,
}

impl PasswordSetting {
    /// Keyword selecting a generated password
    pub const GENERATE: &'static str = "generate";

    /// Returns true if the credential step should do anything at all
    pub fn is_managed(&self) -> bool {
        !matches!(self, Self::Unmanaged)
    }
}

impl From<Option<String>> for PasswordSetting {
    fn from(value: Option<String>) -> Self {
        match value {
            None => Self::Unmanaged,
            Some(v) if v == Self::GENERATE => Self::Generate,
            Some(v) => Self::Literal(Secret::new(v)),
        }
    }
}

// Serialized by reference so a literal is never copied out of its `Secret`
impl Serialize for PasswordSetting {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Generate => serializer.serialize_some(Self::GENERATE),
            Self::Literal(secret) => serializer.serialize_some(secret.expose()),
            Self::Unmanaged => serializer.serialize_none(),
        }
    }
}

impl std::fmt::Display for PasswordSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generate => write!(f, "generate"),
            Self::Literal(_) => write!(f, "literal (redacted)"),
            Self::Unmanaged => write!(f, "unmanaged"),
        }
    }
}

/// Where unit templates come from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TemplateSource {
    /// Templates compiled into the binary
    #[default]
    Builtin,
    /// A directory holding `<template_id>` files with `{{ name }}` placeholders
    Directory(PathBuf),
}

impl TemplateSource {
    pub const BUILTIN: &'static str = "builtin";
    /// Name of the cookbook the built-in templates come from; accepted
    /// under the `cookbook` key as another spelling of `builtin`
    pub const COOKBOOK: &'static str = "postgresql";

    pub fn parse(value: &str) -> Self {
        if value.is_empty() || value == Self::BUILTIN || value == Self::COOKBOOK {
            Self::Builtin
        } else {
            Self::Directory(PathBuf::from(value))
        }
    }
}

impl std::fmt::Display for TemplateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin => write!(f, "{}", Self::BUILTIN),
            Self::Directory(dir) => write!(f, "{}", dir.display()),
        }
    }
}
