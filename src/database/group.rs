//! Installed package groups.
//!
//! A group is a named list of installed packages inside one database scope,
//! persisted as `groups/<group>.json`. Within a group at most one record
//! exists per package name; installing a different version replaces it.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::future::{self, Future};
use crate::jsonfile;
use crate::package::{Package, PackageConfiguration};
use crate::version::Version;

use super::{Candidate, PackageDatabase, PackageLookup};

/// One installed record: the package reference, the configuration captured
/// at install time, and when it was installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub source: String,
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub config: PackageConfiguration,
    #[serde(rename = "installedAt", with = "crate::jsonfile::iso8601")]
    pub installed_at: DateTime<Utc>,
}

/// Handle to a named group of one database.
#[derive(Debug)]
pub struct PackageGroup {
    database: Arc<PackageDatabase>,
    name: String,
}

impl PackageGroup {
    pub(super) fn new(database: Arc<PackageDatabase>, name: String) -> Self {
        PackageGroup { database, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn file(&self) -> PathBuf {
        self.database.group_file(&self.name)
    }

    /// The group's installed records. A group that was never written is
    /// empty.
    pub fn installed(&self) -> Result<Vec<InstalledPackage>> {
        let _state = self.database.read_state();
        load_records(&self.file())
    }

    /// Whether the exact `(name, version)` is installed in this group.
    pub fn is_installed(&self, package: &Package) -> Result<bool> {
        Ok(self
            .installed()?
            .iter()
            .any(|record| record.name == package.name && record.version == package.version))
    }

    /// Install a resolved package into this group.
    ///
    /// Installing the identical version and configuration again is a no-op
    /// that leaves `installedAt` untouched. A record for the same name at
    /// another version (or configuration) is replaced. The package's
    /// declared dependencies must be satisfiable through `view`.
    pub fn install(
        &self,
        candidate: Candidate,
        config: PackageConfiguration,
        view: Arc<dyn PackageLookup>,
    ) -> Future<()> {
        let database = Arc::clone(&self.database);
        let group_file = self.file();
        future::spawn(move |notifier| {
            let package = &candidate.package;
            for dependency in &package.dependencies {
                let found =
                    view.find_packages(&dependency.name, Some(&dependency.requirement));
                if found.is_empty() {
                    return Err(Error::new(
                        ErrorKind::UnsatisfiedDependency,
                        format!(
                            "dependency {}@{} of {} is not satisfiable by the registered sources",
                            dependency.name,
                            dependency.requirement,
                            package.spec()
                        ),
                    ));
                }
            }

            let _state = database.write_state();
            let mut records = load_records(&group_file)?;

            if let Some(existing) = records.iter().position(|r| r.name == package.name) {
                let record = &records[existing];
                if record.version == package.version && record.config == config {
                    notifier.status(format!("{} is already installed", package.spec()))?;
                    return Ok(());
                }
                records.remove(existing);
            }

            records.push(InstalledPackage {
                source: candidate.source.clone(),
                name: package.name.clone(),
                version: package.version.clone(),
                config,
                installed_at: Utc::now(),
            });
            records.sort_by(|a, b| a.name.cmp(&b.name));
            jsonfile::write_atomic(&group_file, &records)?;

            notifier.status(format!("Installed {}", package.spec()))?;
            Ok(())
        })
    }

    /// Remove the record matching the package's `(name, version)`.
    pub fn remove(&self, package: &Package) -> Future<()> {
        let database = Arc::clone(&self.database);
        let group_file = self.file();
        let name = package.name.clone();
        let version = package.version.clone();
        let spec = package.spec();
        future::spawn(move |notifier| {
            let _state = database.write_state();
            let mut records = load_records(&group_file)?;
            let before = records.len();
            records.retain(|record| !(record.name == name && record.version == version));
            if records.len() == before {
                return Err(Error::new(
                    ErrorKind::NotInstalled,
                    format!("{} is not installed", spec),
                ));
            }
            jsonfile::write_atomic(&group_file, &records)?;
            notifier.status(format!("Removed {}", spec))?;
            Ok(())
        })
    }
}

pub(super) fn load_records(path: &std::path::Path) -> Result<Vec<InstalledPackage>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    jsonfile::read(path)
}
