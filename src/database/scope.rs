//! Database scopes and their composition.
//!
//! Three database scopes exist with a fixed lookup order: project, then
//! user, then system. Queries search all of them through a
//! [`DatabaseStack`]; writes target exactly one scope.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::version::VersionRequirement;

use super::{Candidate, PackageDatabase, PackageLookup};

/// One of the three database scopes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Project,
    User,
    System,
}

impl Scope {
    /// Lookup order: project first, system last.
    pub const LOOKUP_ORDER: [Scope; 3] = [Scope::Project, Scope::User, Scope::System];
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Project => write!(f, "project"),
            Scope::User => write!(f, "user"),
            Scope::System => write!(f, "system"),
        }
    }
}

/// The well-known database root for a scope.
///
/// Returns `None` when the scope has no usable location on this system.
pub fn database_path(scope: Scope, project_dir: &Path) -> Option<PathBuf> {
    match scope {
        Scope::Project => Some(project_dir.join("vendor")),
        Scope::User => dirs::config_dir().map(|dir| dir.join("ralph")),
        Scope::System => system_config_dir(),
    }
}

#[cfg(unix)]
fn system_config_dir() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/ralph"))
}

#[cfg(windows)]
fn system_config_dir() -> Option<PathBuf> {
    std::env::var_os("PROGRAMDATA").map(|data| PathBuf::from(data).join("ralph"))
}

/// Read-through composition of up to three scope databases.
#[derive(Clone)]
pub struct DatabaseStack {
    databases: Vec<Arc<PackageDatabase>>,
}

impl DatabaseStack {
    /// Compose databases; the given order is the lookup order.
    pub fn new(databases: Vec<Arc<PackageDatabase>>) -> Self {
        DatabaseStack { databases }
    }

    pub fn databases(&self) -> &[Arc<PackageDatabase>] {
        &self.databases
    }

    /// The database for a scope, failing when it is not part of the stack.
    pub fn scope(&self, scope: Scope) -> Result<&Arc<PackageDatabase>> {
        self.databases
            .iter()
            .find(|db| db.scope() == scope)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::ConfigError,
                    format!("the {} database is not available", scope),
                )
            })
    }

    /// Distinct package names across every database, sorted.
    pub fn package_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .iter()
            .flat_map(|db| db.package_names())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl PackageLookup for DatabaseStack {
    /// Matching candidates from every scope, sorted by ascending version.
    ///
    /// The sort is stable, so among equal versions the lookup and source
    /// registration order decides.
    fn find_packages(
        &self,
        name: &str,
        requirement: Option<&VersionRequirement>,
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .databases
            .iter()
            .flat_map(|db| db.find_packages(name, requirement))
            .collect();
        candidates.sort_by(|a, b| a.package.version.cmp(&b.package.version));
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::Project.to_string(), "project");
        assert_eq!(Scope::User.to_string(), "user");
        assert_eq!(Scope::System.to_string(), "system");
    }

    #[test]
    fn test_scope_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Scope::User).unwrap(), "\"user\"");
        let parsed: Scope = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(parsed, Scope::System);
    }

    #[test]
    fn test_project_database_path() {
        let path = database_path(Scope::Project, Path::new("/work/app")).unwrap();
        assert_eq!(path, PathBuf::from("/work/app/vendor"));
    }
}
