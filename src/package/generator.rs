//! Project scaffolding for `ralph project new`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use clap::ValueEnum;

use crate::error::{Error, ErrorKind, Result};
use crate::future::{self, Future};
use crate::jsonfile;
use crate::version::Version;

use super::{Package, Project, ProjectInfo, MANIFEST_FILE};

/// Supported build-system templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuildSystem {
    Cmake,
}

/// Supported version-control templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VersionControl {
    Git,
}

/// Scaffolds a new project directory.
pub struct ProjectGenerator {
    name: String,
    directory: PathBuf,
    build_system: Option<BuildSystem>,
    vcs: Option<VersionControl>,
}

impl ProjectGenerator {
    pub fn new(name: impl Into<String>, directory: PathBuf) -> Self {
        ProjectGenerator {
            name: name.into(),
            directory,
            build_system: None,
            vcs: None,
        }
    }

    pub fn build_system(mut self, build_system: Option<BuildSystem>) -> Self {
        self.build_system = build_system;
        self
    }

    pub fn vcs(mut self, vcs: Option<VersionControl>) -> Self {
        self.vcs = vcs;
        self
    }

    /// Generate the project files.
    pub fn generate(self) -> Future<Project> {
        future::spawn(move |notifier| {
            if self.name.is_empty() {
                return Err(Error::new(ErrorKind::UsageError, "project name is empty"));
            }

            let manifest_path = self.directory.join(MANIFEST_FILE);
            if manifest_path.exists() {
                return Err(Error::new(
                    ErrorKind::ConfigError,
                    format!("{} already exists", manifest_path.display()),
                ));
            }
            fs::create_dir_all(&self.directory)
                .map_err(|e| Error::io(format!("creating {}", self.directory.display()), &e))?;

            notifier.status(format!("Writing {}...", MANIFEST_FILE))?;
            let package = Package {
                name: self.name.clone(),
                version: Version::parse("0.0.1")?,
                dependencies: Vec::new(),
                build_system: self.build_system.map(|b| template_name(b).to_string()),
                vcs: self.vcs.map(|v| vcs_name(v).to_string()),
                extra: BTreeMap::new(),
            };
            jsonfile::write_atomic(&manifest_path, &package)?;

            if let Some(build_system) = self.build_system {
                notifier.status("Writing build system files...")?;
                write_build_system(&self, build_system)?;
            }

            if let Some(VersionControl::Git) = self.vcs {
                notifier.status("Initializing git repository...")?;
                git2::Repository::init(&self.directory).map_err(|e| {
                    Error::new(
                        ErrorKind::Io,
                        format!("initializing git repository: {}", e.message()),
                    )
                })?;
                let gitignore = self.directory.join(".gitignore");
                if !gitignore.exists() {
                    fs::write(&gitignore, "/vendor/\n/build/\n")
                        .map_err(|e| Error::io(format!("writing {}", gitignore.display()), &e))?;
                }
            }

            Ok(Project {
                package,
                info: ProjectInfo {
                    root_dir: self.directory,
                },
            })
        })
    }
}

fn template_name(build_system: BuildSystem) -> &'static str {
    match build_system {
        BuildSystem::Cmake => "cmake",
    }
}

fn vcs_name(vcs: VersionControl) -> &'static str {
    match vcs {
        VersionControl::Git => "git",
    }
}

fn write_build_system(generator: &ProjectGenerator, build_system: BuildSystem) -> Result<()> {
    match build_system {
        BuildSystem::Cmake => {
            let path = generator.directory.join("CMakeLists.txt");
            if path.exists() {
                return Ok(());
            }
            let content = format!(
                "cmake_minimum_required(VERSION 3.10)\nproject({})\n",
                generator.name
            );
            fs::write(&path, content)
                .map_err(|e| Error::io(format!("writing {}", path.display()), &e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let project = ProjectGenerator::new("demo", dir.path().to_path_buf())
            .generate()
            .get()
            .unwrap();
        assert_eq!(project.name(), "demo");

        let loaded = Project::load(dir.path()).unwrap();
        assert_eq!(loaded.package.version, Version::parse("0.0.1").unwrap());
    }

    #[test]
    fn test_generate_with_cmake_and_git() {
        let dir = tempfile::tempdir().unwrap();
        ProjectGenerator::new("demo", dir.path().to_path_buf())
            .build_system(Some(BuildSystem::Cmake))
            .vcs(Some(VersionControl::Git))
            .generate()
            .get()
            .unwrap();

        assert!(dir.path().join("CMakeLists.txt").exists());
        assert!(dir.path().join(".git").exists());
        assert!(dir.path().join(".gitignore").exists());

        let loaded = Project::load(dir.path()).unwrap();
        assert_eq!(loaded.package.build_system.as_deref(), Some("cmake"));
        assert_eq!(loaded.package.vcs.as_deref(), Some("git"));
    }

    #[test]
    fn test_generate_refuses_existing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "{}").unwrap();
        let err = ProjectGenerator::new("demo", dir.path().to_path_buf())
            .generate()
            .get()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
