//! Package and manifest model.
//!
//! A [`Package`] is an immutable record ingested from a `ralph.json`
//! manifest: identity `(name, version)`, declared dependencies, build-system
//! hints, and any additional manifest fields preserved verbatim.

mod generator;
mod project;

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, ErrorKind, Result};
use crate::version::{Version, VersionRequirement};

pub use generator::{BuildSystem, ProjectGenerator, VersionControl};
pub use project::{Project, ProjectInfo};

/// File name of a package manifest inside a source tree or project.
pub const MANIFEST_FILE: &str = "ralph.json";

/// A declared dependency: a package name plus a version requirement.
///
/// Serialized as a two-element array `["name", ">=1.0,<2"]` to match the
/// manifest format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDependency {
    pub name: String,
    pub requirement: VersionRequirement,
}

impl Serialize for PackageDependency {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (&self.name, &self.requirement).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackageDependency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (name, requirement) = <(String, VersionRequirement)>::deserialize(deserializer)?;
        Ok(PackageDependency { name, requirement })
    }
}

/// An immutable package record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PackageDependency>,
    #[serde(
        rename = "buildSystem",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub build_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs: Option<String>,
    /// Additional manifest fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Package {
    /// Parse a manifest file's contents.
    pub fn parse_manifest(content: &str) -> Result<Self> {
        let package: Package =
            serde_json::from_str(content).map_err(|e| Error::corrupt("manifest", e))?;
        if package.name.is_empty() {
            return Err(Error::corrupt("manifest", "package name is empty"));
        }
        Ok(package)
    }

    /// `name@version` rendering used in status messages.
    pub fn spec(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Feature configuration captured at install time.
///
/// Not part of package identity; two installs of the same version with
/// different configurations replace one another.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageConfiguration(BTreeMap<String, String>);

impl PackageConfiguration {
    /// Parse `key=value` items given on the command line.
    pub fn from_items<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let mut map = BTreeMap::new();
        for item in items {
            let item = item.as_ref();
            match item.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    map.insert(key.to_string(), value.to_string());
                }
                _ => {
                    return Err(Error::new(
                        ErrorKind::UsageError,
                        format!("invalid configuration item '{}', expected key=value", item),
                    ));
                }
            }
        }
        Ok(PackageConfiguration(map))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
