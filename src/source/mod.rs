//! Package sources.
//!
//! A source is a named remote repository that publishes package manifests.
//! The persisted form (one entry in `sources.json`) carries the name, kind,
//! URL and last-updated timestamp; the cached package list is re-ingested
//! from the clone working tree and never written to disk.

mod git;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::future::Notifier;
use crate::package::{Package, MANIFEST_FILE};

pub use git::{
    no_credentials, CredentialKind, CredentialQuery, CredentialResponse, CredentialsCallback,
    GitClient, LibGit,
};

#[cfg(test)]
pub use git::MockGitClient;

/// Source kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Git,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Git => write!(f, "git"),
        }
    }
}

/// A registered package source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub url: String,
    #[serde(rename = "lastUpdated", with = "crate::jsonfile::iso8601")]
    pub last_updated: DateTime<Utc>,
    /// Result of the most recent successful ingestion. Not persisted.
    #[serde(skip)]
    pub packages: Vec<Package>,
}

impl PackageSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        PackageSource {
            name: name.into(),
            kind: SourceKind::Git,
            url: url.into(),
            last_updated: Utc::now(),
            packages: Vec::new(),
        }
    }
}

/// Scan a source working tree for package manifests.
///
/// Every `ralph.json` below `tree` (excluding `.git`) describes one package.
/// A manifest that fails to parse is reported as a status warning and
/// skipped; a duplicate `(name, version)` keeps the first occurrence.
pub fn ingest_packages(tree: &Path, notifier: &Notifier) -> Result<Vec<Package>> {
    let mut manifest_paths = Vec::new();
    collect_manifests(tree, &mut manifest_paths)?;
    manifest_paths.sort();

    let mut packages = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for path in manifest_paths {
        let display = path
            .strip_prefix(tree)
            .unwrap_or(&path)
            .display()
            .to_string();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("unreadable manifest {}: {}", display, e);
                notifier.status(format!("Warning: skipping manifest {}: {}", display, e))?;
                continue;
            }
        };
        match Package::parse_manifest(&content) {
            Ok(package) => {
                let key = (package.name.clone(), package.version.to_string());
                if seen.insert(key) {
                    packages.push(package);
                } else {
                    log::warn!("duplicate package {} in {}", package.spec(), display);
                    notifier.status(format!(
                        "Warning: duplicate package {} in {}",
                        package.spec(),
                        display
                    ))?;
                }
            }
            Err(e) => {
                log::warn!("invalid manifest {}: {}", display, e);
                notifier.status(format!("Warning: skipping manifest {}: {}", display, e))?;
            }
        }
    }

    packages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
    Ok(packages)
}

fn collect_manifests(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::io(format!("reading directory {}", dir.display()), &e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::io(format!("reading directory {}", dir.display()), &e))?;
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().map(|n| n == ".git").unwrap_or(false) {
                continue;
            }
            collect_manifests(&path, out)?;
        } else if path.file_name().map(|n| n == MANIFEST_FILE).unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(())
}
