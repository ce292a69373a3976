//! Project model.
//!
//! A project is not a special kind of package: it is a [`Package`] value
//! loaded from the project's own manifest, paired with a [`ProjectInfo`]
//! describing where it lives on disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};

use super::{Package, MANIFEST_FILE};

/// Location metadata for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub root_dir: PathBuf,
}

/// A project: its manifest as a package plus its location.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub package: Package,
    pub info: ProjectInfo,
}

impl Project {
    /// Load the project from `<dir>/ralph.json`.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(Error::new(
                ErrorKind::ConfigError,
                format!("no {} found in {}", MANIFEST_FILE, dir.display()),
            ));
        }
        let content = fs::read_to_string(&manifest_path)
            .map_err(|e| Error::io(format!("reading {}", manifest_path.display()), &e))?;
        let package = Package::parse_manifest(&content)
            .map_err(|e| Error::corrupt(manifest_path.display(), e))?;
        Ok(Project {
            package,
            info: ProjectInfo {
                root_dir: dir.to_path_buf(),
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.package.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_valid_project() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name":"myproject","version":"0.0.1"}"#,
        )
        .unwrap();

        let project = Project::load(dir.path()).unwrap();
        assert_eq!(project.name(), "myproject");
        assert_eq!(project.info.root_dir, dir.path());
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = Project::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn test_load_corrupt_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "{").unwrap();
        let err = Project::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }
}
