//! Command orchestration.
//!
//! One method per CLI verb: opens the databases it needs, resolves package
//! queries against the composed scope view, drives group and source
//! operations through the future engine, and prints progress while waiting.

use std::path::PathBuf;
use std::sync::Arc;

use ansi_term::{Color, Style};
use chrono::{SecondsFormat, Utc};

use crate::database::{
    database_path, DatabaseStack, PackageDatabase, PackageLookup, Scope,
};
use crate::error::{Error, ErrorKind, Result};
use crate::future::await_terminal;
use crate::package::{
    BuildSystem, PackageConfiguration, Project, ProjectGenerator, VersionControl,
};
use crate::query::query_package;
use crate::source::{CredentialsCallback, GitClient, LibGit, PackageSource};

/// Explicit runtime wiring, captured once at startup.
pub struct RuntimeConfig {
    /// Invoked when a transport needs authentication. Must be re-entrant
    /// and thread-safe.
    pub credentials: CredentialsCallback,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            credentials: crate::source::no_credentials(),
        }
    }
}

/// Per-invocation command context.
pub struct State {
    project_dir: PathBuf,
    git: Arc<dyn GitClient>,
}

impl State {
    pub fn new(project_dir: PathBuf, config: RuntimeConfig) -> Self {
        State {
            project_dir,
            git: Arc::new(LibGit::new(config.credentials)),
        }
    }

    /// Build a state around a specific transport; used by tests.
    pub fn with_git(project_dir: PathBuf, git: Arc<dyn GitClient>) -> Self {
        State { project_dir, git }
    }

    #[tracing::instrument(skip(self, packages, config_items))]
    pub fn install(
        &self,
        scope: Scope,
        packages: &[String],
        group: &str,
        config_items: &[String],
    ) -> Result<()> {
        let config = PackageConfiguration::from_items(config_items)?;
        let stack = self.open_stack(Some(scope))?;
        let database = Arc::clone(stack.scope(scope)?);
        let _lock = database.lock_exclusive()?;
        let view: Arc<dyn PackageLookup> = Arc::new(stack.clone());

        for query in packages {
            let candidate = query_package(&stack, query)?;
            let group = database.group(group)?;
            await_terminal(group.install(candidate, config.clone(), Arc::clone(&view)))?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, packages))]
    pub fn remove(&self, scope: Scope, packages: &[String], group: &str) -> Result<()> {
        let stack = self.open_stack(Some(scope))?;
        let database = Arc::clone(stack.scope(scope)?);
        let _lock = database.lock_exclusive()?;

        for query in packages {
            let candidate = query_package(&stack, query)?;
            let group = database.group(group)?;
            await_terminal(group.remove(&candidate.package))?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, packages))]
    pub fn check(&self, scope: Scope, packages: &[String], group: &str) -> Result<()> {
        let stack = self.open_stack(Some(scope))?;
        let database = Arc::clone(stack.scope(scope)?);
        let _lock = database.lock_shared()?;

        for query in packages {
            let candidate = query_package(&stack, query)?;
            let group = database.group(group)?;
            if !group.is_installed(&candidate.package)? {
                return Err(Error::new(
                    ErrorKind::NotInstalled,
                    format!("{} is not installed", candidate.package.name),
                ));
            }
            println!("{} is installed", candidate.package.spec());
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn search(&self, query: &str) -> Result<()> {
        let stack = self.open_stack(None)?;
        let _locks: Vec<_> = stack
            .databases()
            .iter()
            .filter_map(|db| db.lock_shared().ok())
            .collect();

        let needle = query.to_lowercase();
        for database in stack.databases() {
            for source in database.sources() {
                for package in &source.packages {
                    if needle.is_empty() || package.name.to_lowercase().contains(&needle) {
                        println!(
                            "{} ({} {})",
                            package.spec(),
                            database.scope(),
                            source.name
                        );
                    }
                }
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn list_sources(&self, scope: Scope) -> Result<()> {
        self.print_sources_of(scope, true)?;

        // Listing a narrower scope also shows the broader ones.
        let rest: &[Scope] = match scope {
            Scope::Project => &[Scope::User, Scope::System],
            Scope::User => &[Scope::System],
            Scope::System => &[],
        };
        for scope in rest {
            println!();
            self.print_sources_of(*scope, false)?;
        }
        Ok(())
    }

    fn print_sources_of(&self, scope: Scope, required: bool) -> Result<()> {
        let database = match self.open_database(scope) {
            Ok(database) => database,
            Err(e) if !required => {
                log::debug!("skipping {} database: {}", scope, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let _lock = database.lock_shared()?;

        println!(
            "{}",
            Style::new()
                .bold()
                .paint(format!("Package sources in the {} database:", scope))
        );
        let sources = database.sources();
        for source in &sources {
            println!(
                " * {} (type: {}, last updated: {})",
                source.name,
                source.kind,
                paint_freshness(source)
            );
        }
        if sources.is_empty() {
            println!("    Empty.\n    Use 'ralph sources add <name> <url>' to add a source!");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn add_source(&self, scope: Scope, name: &str, url: &str) -> Result<()> {
        if url.trim().is_empty() || url.contains(char::is_whitespace) {
            return Err(Error::new(
                ErrorKind::UsageError,
                format!("The given URL '{}' is not a valid URL", url),
            ));
        }
        let database = self.open_database(scope)?;
        let _lock = database.lock_exclusive()?;
        await_terminal(database.register_source(PackageSource::new(name, url)))?;
        println!(
            "New source {} successfully registered. You may want to run 'ralph sources update {}' now.",
            name, name
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_source(&self, scope: Scope, name: &str) -> Result<()> {
        let database = self.open_database(scope)?;
        let _lock = database.lock_exclusive()?;
        await_terminal(database.unregister_source(name))?;
        println!("Source {} was successfully removed.", name);
        Ok(())
    }

    #[tracing::instrument(skip(self, names))]
    pub fn update_sources(&self, scope: Scope, names: &[String]) -> Result<()> {
        let database = self.open_database(scope)?;
        let _lock = database.lock_exclusive()?;

        let sources = if names.is_empty() {
            database.sources()
        } else {
            names
                .iter()
                .map(|name| database.source(name))
                .collect::<Result<Vec<_>>>()?
        };

        for source in sources {
            println!(
                "Updating {} source {}...",
                source.kind,
                Color::Cyan.paint(&source.name)
            );
            await_terminal(database.update_source(&source.name))?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn show_source(&self, scope: Scope, name: &str) -> Result<()> {
        let database = self.open_database(scope)?;
        let _lock = database.lock_shared()?;
        let source = database.source(name)?;

        let bold = Style::new().bold();
        println!("{}{}", bold.paint("Name: "), source.name);
        println!("{}{}", bold.paint("Last updated: "), paint_freshness(&source));
        println!("{}{}", bold.paint("Type: "), source.kind);
        println!("{}{}", bold.paint("URL: "), source.url);
        println!("{}{}", bold.paint("Packages: "), source.packages.len());
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn new_project(
        &self,
        name: &str,
        build_system: Option<BuildSystem>,
        vcs: Option<VersionControl>,
    ) -> Result<()> {
        let generator = ProjectGenerator::new(name, self.project_dir.clone())
            .build_system(build_system)
            .vcs(vcs);
        let project = await_terminal(generator.generate())?;
        println!("The project {} was created successfully!", project.name());
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn verify_project(&self) -> Result<()> {
        let project = Project::load(&self.project_dir)?;
        println!(
            "The project {} in {} is valid!",
            Style::new().bold().paint(project.name()),
            self.project_dir.display()
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn info(&self) -> Result<()> {
        for scope in [Scope::System, Scope::User] {
            if let Some(path) = database_path(scope, &self.project_dir) {
                println!("Available database location: {} at {}", scope, path.display());
            }
        }
        Ok(())
    }

    fn open_database(&self, scope: Scope) -> Result<Arc<PackageDatabase>> {
        let root = database_path(scope, &self.project_dir).ok_or_else(|| {
            Error::new(
                ErrorKind::ConfigError,
                format!("the {} database is not available on this system", scope),
            )
        })?;
        await_terminal(PackageDatabase::open_or_create(
            root,
            scope,
            Arc::clone(&self.git),
        ))
    }

    /// Open every available scope in lookup order.
    ///
    /// The `required` scope (the one a command writes to) must open and its
    /// failure propagates; the other scopes are skipped when unavailable
    /// (for example, an unwritable system directory).
    fn open_stack(&self, required: Option<Scope>) -> Result<DatabaseStack> {
        let mut databases = Vec::new();
        for scope in Scope::LOOKUP_ORDER {
            match self.open_database(scope) {
                Ok(database) => databases.push(database),
                Err(e) if required == Some(scope) => return Err(e),
                Err(e) => log::debug!("skipping {} database: {}", scope, e),
            }
        }
        if databases.is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "no package database is available",
            ));
        }
        Ok(DatabaseStack::new(databases))
    }
}

fn paint_freshness(source: &PackageSource) -> String {
    let age = Utc::now().signed_duration_since(source.last_updated);
    let color = if age.num_days() < 1 {
        Color::Green
    } else if age.num_days() < 7 {
        Color::Yellow
    } else {
        Color::Red
    };
    color
        .paint(
            source
                .last_updated
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InstalledPackage;
    use crate::test_utils::{fixture_repo, manifest};
    use std::fs;

    fn state_in(dir: &std::path::Path) -> State {
        State::new(dir.to_path_buf(), RuntimeConfig::default())
    }

    /// Full flow against a local fixture repository: add a source, update
    /// it through the real transport, then install from it.
    #[test]
    fn test_add_update_install_flow() {
        let upstream = tempfile::tempdir().unwrap();
        fixture_repo(
            upstream.path(),
            &[
                ("foo/1.0/ralph.json", &manifest("foo", "1.0", &[])),
                ("foo/1.1/ralph.json", &manifest("foo", "1.1", &[])),
                ("foo/2.0/ralph.json", &manifest("foo", "2.0", &[])),
            ],
        );

        let project = tempfile::tempdir().unwrap();
        let state = state_in(project.path());
        let url = upstream.path().to_string_lossy().to_string();

        state.add_source(Scope::Project, "ex", &url).unwrap();
        state.update_sources(Scope::Project, &[]).unwrap();
        assert!(project.path().join("vendor/sources/ex/.git").exists());

        state
            .install(
                Scope::Project,
                &["foo@>=1.0".to_string()],
                "default",
                &[],
            )
            .unwrap();

        let records: Vec<InstalledPackage> =
            crate::jsonfile::read(&project.path().join("vendor/groups/default.json")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version.to_string(), "2.0");
        assert_eq!(records[0].source, "ex");

        state
            .check(Scope::Project, &["foo".to_string()], "default")
            .unwrap();
    }

    #[test]
    fn test_remove_source_protected_while_installed() {
        let upstream = tempfile::tempdir().unwrap();
        fixture_repo(
            upstream.path(),
            &[("foo/ralph.json", &manifest("foo", "1.0", &[]))],
        );

        let project = tempfile::tempdir().unwrap();
        let state = state_in(project.path());
        let url = upstream.path().to_string_lossy().to_string();

        state.add_source(Scope::Project, "ex", &url).unwrap();
        state.update_sources(Scope::Project, &[]).unwrap();
        state
            .install(Scope::Project, &["foo".to_string()], "default", &[])
            .unwrap();

        let err = state.remove_source(Scope::Project, "ex").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InUse);

        state
            .remove(Scope::Project, &["foo".to_string()], "default")
            .unwrap();
        state.remove_source(Scope::Project, "ex").unwrap();
    }

    #[test]
    fn test_update_failed_source_keeps_metadata() {
        let project = tempfile::tempdir().unwrap();
        let state = state_in(project.path());

        state
            .add_source(Scope::Project, "dead", "/nonexistent/repository")
            .unwrap();
        let before: serde_json::Value =
            crate::jsonfile::read(&project.path().join("vendor/sources.json")).unwrap();

        let err = state.update_sources(Scope::Project, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceUpdateFailed);

        let after: serde_json::Value =
            crate::jsonfile::read(&project.path().join("vendor/sources.json")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_check_not_installed() {
        let upstream = tempfile::tempdir().unwrap();
        fixture_repo(
            upstream.path(),
            &[("foo/ralph.json", &manifest("foo", "1.0", &[]))],
        );

        let project = tempfile::tempdir().unwrap();
        let state = state_in(project.path());
        let url = upstream.path().to_string_lossy().to_string();
        state.add_source(Scope::Project, "ex", &url).unwrap();
        state.update_sources(Scope::Project, &[]).unwrap();

        let err = state
            .check(Scope::Project, &["foo".to_string()], "default")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInstalled);
    }

    #[test]
    fn test_install_unknown_package_diagnostics() {
        let project = tempfile::tempdir().unwrap();
        let state = state_in(project.path());

        let err = state
            .install(Scope::Project, &["bar".to_string()], "default", &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownPackage);
        assert_eq!(err.to_string(), "No package found for bar");
    }

    #[test]
    fn test_project_new_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());

        state
            .new_project("demo", Some(BuildSystem::Cmake), Some(VersionControl::Git))
            .unwrap();
        assert!(dir.path().join("ralph.json").exists());
        assert!(dir.path().join("CMakeLists.txt").exists());

        state.verify_project().unwrap();
    }

    #[test]
    fn test_verify_project_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let err = state.verify_project().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn test_add_source_rejects_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let err = state
            .add_source(Scope::Project, "ex", "not a url")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UsageError);
        // Nothing was registered.
        assert!(!dir.path().join("vendor/sources.json").exists());
    }

    #[test]
    fn test_install_config_is_recorded() {
        let upstream = tempfile::tempdir().unwrap();
        fixture_repo(
            upstream.path(),
            &[("foo/ralph.json", &manifest("foo", "1.0", &[]))],
        );

        let project = tempfile::tempdir().unwrap();
        let state = state_in(project.path());
        let url = upstream.path().to_string_lossy().to_string();
        state.add_source(Scope::Project, "ex", &url).unwrap();
        state.update_sources(Scope::Project, &[]).unwrap();

        state
            .install(
                Scope::Project,
                &["foo".to_string()],
                "default",
                &["with-foo=on".to_string()],
            )
            .unwrap();

        let rendered =
            fs::read_to_string(project.path().join("vendor/groups/default.json")).unwrap();
        assert!(rendered.contains("with-foo"));
    }
}
