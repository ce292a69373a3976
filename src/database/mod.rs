//! Persistent package database.
//!
//! A database lives under one root directory:
//!
//! ```text
//! database.json        schema version and scope
//! sources.json         registered sources
//! sources/<name>/      clone working trees
//! groups/<group>.json  installed records
//! .lock                advisory inter-process lock
//! ```
//!
//! Registered sources and their ingested package caches are held in memory
//! behind a read-write lock; the long network phase of a source update runs
//! without it so lookups stay possible while downloads are in flight.

mod group;
mod lock;
mod scope;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::future::{self, Future, Notifier};
use crate::jsonfile;
use crate::package::Package;
use crate::source::{ingest_packages, GitClient, PackageSource};
use crate::version::VersionRequirement;

pub use group::{InstalledPackage, PackageGroup};
pub use lock::DatabaseLock;
pub use scope::{database_path, DatabaseStack, Scope};

const DATABASE_FILE: &str = "database.json";
const SOURCES_FILE: &str = "sources.json";
const SOURCES_DIR: &str = "sources";
const GROUPS_DIR: &str = "groups";
const SCHEMA_VERSION: u32 = 1;

/// Contents of `database.json`.
#[derive(Debug, Serialize, Deserialize)]
struct DatabaseFile {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    scope: Scope,
}

/// A package together with the scope and source that provide it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub scope: Scope,
    pub source: String,
    pub package: Package,
}

/// Read-only view answering "which packages match this name/requirement".
pub trait PackageLookup: Send + Sync {
    /// Matching packages sorted by ascending version.
    fn find_packages(&self, name: &str, requirement: Option<&VersionRequirement>)
        -> Vec<Candidate>;
}

/// One scope's package database.
pub struct PackageDatabase {
    root: PathBuf,
    scope: Scope,
    git: Arc<dyn GitClient>,
    sources: RwLock<Vec<PackageSource>>,
    update_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for PackageDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageDatabase")
            .field("root", &self.root)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl PackageDatabase {
    /// Open the database at `root`, creating the layout when missing.
    ///
    /// Orphaned clone directories left behind by failed registrations are
    /// garbage-collected here.
    pub fn open_or_create(
        root: PathBuf,
        scope: Scope,
        git: Arc<dyn GitClient>,
    ) -> Future<Arc<PackageDatabase>> {
        future::spawn(move |notifier| {
            for dir in [
                root.clone(),
                root.join(SOURCES_DIR),
                root.join(GROUPS_DIR),
            ] {
                fs::create_dir_all(&dir)
                    .map_err(|e| Error::io(format!("creating {}", dir.display()), &e))?;
            }

            let database_file = root.join(DATABASE_FILE);
            if database_file.exists() {
                let loaded: DatabaseFile = jsonfile::read(&database_file)?;
                if loaded.schema_version != SCHEMA_VERSION {
                    return Err(Error::new(
                        ErrorKind::IncompatibleDatabase,
                        format!(
                            "{} uses schema version {}, expected {}",
                            database_file.display(),
                            loaded.schema_version,
                            SCHEMA_VERSION
                        ),
                    ));
                }
                if loaded.scope != scope {
                    log::debug!(
                        "database at {} is marked as {} scope, opened as {}",
                        root.display(),
                        loaded.scope,
                        scope
                    );
                }
            } else {
                jsonfile::write_atomic(
                    &database_file,
                    &DatabaseFile {
                        schema_version: SCHEMA_VERSION,
                        scope,
                    },
                )?;
            }

            let sources_file = root.join(SOURCES_FILE);
            let mut sources: Vec<PackageSource> = if sources_file.exists() {
                jsonfile::read(&sources_file)?
            } else {
                Vec::new()
            };

            // Re-ingest the cached package lists from the clone trees.
            for source in sources.iter_mut() {
                let tree = root.join(SOURCES_DIR).join(&source.name);
                if !tree.join(".git").exists() {
                    continue;
                }
                match ingest_packages(&tree, notifier) {
                    Ok(packages) => source.packages = packages,
                    Err(e) if e.is_canceled() => return Err(e),
                    Err(e) => {
                        log::warn!("ingesting source '{}' failed: {}", source.name, e);
                        notifier.status(format!(
                            "Warning: could not read packages of source '{}': {}",
                            source.name, e
                        ))?;
                    }
                }
            }

            collect_orphaned_clones(&root, &sources);

            Ok(Arc::new(PackageDatabase {
                root,
                scope,
                git,
                sources: RwLock::new(sources),
                update_locks: Mutex::new(HashMap::new()),
            }))
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Take the advisory inter-process lock for a mutating command.
    pub fn lock_exclusive(&self) -> Result<DatabaseLock> {
        DatabaseLock::exclusive(&self.root)
    }

    /// Take the advisory inter-process lock for a read-only command.
    pub fn lock_shared(&self) -> Result<DatabaseLock> {
        DatabaseLock::shared(&self.root)
    }

    /// Register a new source and create its clone directory.
    pub fn register_source(self: &Arc<Self>, source: PackageSource) -> Future<()> {
        let database = Arc::clone(self);
        future::spawn(move |notifier| {
            let mut sources = database.sources.write().unwrap();
            if sources.iter().any(|s| s.name == source.name) {
                return Err(Error::new(
                    ErrorKind::DuplicateSource,
                    format!("a source named '{}' is already registered", source.name),
                ));
            }

            let clone_dir = database.source_dir(&source.name);
            fs::create_dir_all(&clone_dir)
                .map_err(|e| Error::io(format!("creating {}", clone_dir.display()), &e))?;

            notifier.status(format!("Registering source '{}'...", source.name))?;
            sources.push(source);
            database.persist_sources(&sources)
        })
    }

    /// Unregister a source, failing `InUse` while any group references it.
    pub fn unregister_source(self: &Arc<Self>, name: &str) -> Future<()> {
        let database = Arc::clone(self);
        let name = name.to_string();
        future::spawn(move |notifier| {
            let mut sources = database.sources.write().unwrap();
            if !sources.iter().any(|s| s.name == name) {
                return Err(database.unknown_source(&name));
            }
            if database.source_is_referenced(&name)? {
                return Err(Error::new(
                    ErrorKind::InUse,
                    format!(
                        "source '{}' still provides installed packages; remove them first",
                        name
                    ),
                ));
            }

            let clone_dir = database.source_dir(&name);
            if clone_dir.exists() {
                fs::remove_dir_all(&clone_dir)
                    .map_err(|e| Error::io(format!("removing {}", clone_dir.display()), &e))?;
            }

            notifier.status(format!("Removing source '{}'...", name))?;
            sources.retain(|s| s.name != name);
            database.persist_sources(&sources)
        })
    }

    /// Snapshot of one registered source.
    pub fn source(&self, name: &str) -> Result<PackageSource> {
        self.sources
            .read()
            .unwrap()
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| self.unknown_source(name))
    }

    /// Snapshot of every registered source, in registration order.
    pub fn sources(&self) -> Vec<PackageSource> {
        self.sources.read().unwrap().clone()
    }

    /// Distinct package names across all sources, sorted.
    pub fn package_names(&self) -> Vec<String> {
        let sources = self.sources.read().unwrap();
        let mut names: Vec<String> = sources
            .iter()
            .flat_map(|s| s.packages.iter().map(|p| p.name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Handle to a (lazily created) group.
    pub fn group(self: &Arc<Self>, name: &str) -> Result<PackageGroup> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(Error::new(
                ErrorKind::UsageError,
                format!("'{}' is not a valid group name", name),
            ));
        }
        Ok(PackageGroup::new(Arc::clone(self), name.to_string()))
    }

    /// Names of every group with at least one record on disk.
    pub fn group_names(&self) -> Result<Vec<String>> {
        let groups_dir = self.root.join(GROUPS_DIR);
        let mut names = Vec::new();
        if !groups_dir.exists() {
            return Ok(names);
        }
        let entries = fs::read_dir(&groups_dir)
            .map_err(|e| Error::io(format!("reading {}", groups_dir.display()), &e))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| Error::io(format!("reading {}", groups_dir.display()), &e))?;
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Update a source: clone or fetch, force-checkout, submodules, then
    /// re-ingest manifests and commit the new metadata.
    ///
    /// The network phase runs without the database lock; only the final
    /// commit takes it. On a fatal transport error neither the package
    /// cache nor `lastUpdated` changes.
    pub fn update_source(self: &Arc<Self>, name: &str) -> Future<()> {
        let database = Arc::clone(self);
        let name = name.to_string();
        future::spawn(move |notifier| database.update_source_body(&name, notifier))
    }

    #[tracing::instrument(skip(self, notifier))]
    fn update_source_body(&self, name: &str, notifier: &Notifier) -> Result<()> {
        let url = {
            let sources = self.sources.read().unwrap();
            sources
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.url.clone())
                .ok_or_else(|| self.unknown_source(name))?
        };

        // One update per source at a time; concurrent updates of other
        // sources proceed independently.
        let update_lock = {
            let mut locks = self.update_locks.lock().unwrap();
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        let _update_guard = update_lock.lock().unwrap();

        let tree = self.source_dir(name);

        // Each transport step is its own future awaited through the
        // notifier, so its progress and failure delegate into this update.
        if tree.join(".git").exists() {
            notifier.status("Fetching...")?;
            notifier.wait(self.git_step(name, &tree, |git, tree, n| git.fetch(tree, n)))?;
        } else {
            notifier.status(format!("Cloning {}...", url))?;
            if tree.exists() {
                // A half-created directory from an earlier failure; libgit2
                // insists on cloning into a fresh path.
                fs::remove_dir_all(&tree)
                    .map_err(|e| Error::io(format!("removing {}", tree.display()), &e))?;
            }
            let clone_url = url.clone();
            notifier.wait(self.git_step(name, &tree, move |git, tree, n| {
                git.clone_repo(&clone_url, tree, n)
            }))?;
        }

        notifier.status("Checking out...")?;
        notifier.wait(self.git_step(name, &tree, |git, tree, n| {
            git.checkout_default(tree, n)
        }))?;
        notifier.wait(self.git_step(name, &tree, |git, tree, n| {
            git.update_submodules(tree, n)
        }))?;

        notifier.status("Scanning manifests...")?;
        let ingested = match ingest_packages(&tree, notifier) {
            Ok(packages) => Some(packages),
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => {
                // The fetch succeeded; keep the previous cache and still
                // advance the timestamp.
                log::warn!("ingesting source '{}' failed: {}", name, e);
                notifier.status(format!("Warning: could not scan manifests: {}", e))?;
                None
            }
        };

        let mut sources = self.sources.write().unwrap();
        let source = sources
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| self.unknown_source(name))?;
        source.last_updated = Utc::now();
        if let Some(packages) = ingested {
            let count = packages.len();
            source.packages = packages;
            notifier.status(format!("Found {} package(s)", count))?;
        }
        self.persist_sources(&sources)
    }

    /// Run one transport step on the pool, wrapping its failure with the
    /// source name.
    fn git_step<F>(&self, name: &str, tree: &Path, step: F) -> Future<()>
    where
        F: FnOnce(&dyn GitClient, &Path, &Notifier) -> Result<()> + Send + 'static,
    {
        let git = Arc::clone(&self.git);
        let tree = tree.to_path_buf();
        let name = name.to_string();
        future::spawn(move |notifier| {
            step(git.as_ref(), &tree, notifier).map_err(|e| wrap_update_error(&name, e))
        })
    }

    pub(super) fn group_file(&self, group: &str) -> PathBuf {
        self.root.join(GROUPS_DIR).join(format!("{}.json", group))
    }

    pub(super) fn read_state(&self) -> RwLockReadGuard<'_, Vec<PackageSource>> {
        self.sources.read().unwrap()
    }

    pub(super) fn write_state(&self) -> RwLockWriteGuard<'_, Vec<PackageSource>> {
        self.sources.write().unwrap()
    }

    fn source_dir(&self, name: &str) -> PathBuf {
        self.root.join(SOURCES_DIR).join(name)
    }

    fn unknown_source(&self, name: &str) -> Error {
        Error::new(
            ErrorKind::UnknownSource,
            format!(
                "no source named '{}' in the {} database",
                name, self.scope
            ),
        )
    }

    fn persist_sources(&self, sources: &[PackageSource]) -> Result<()> {
        jsonfile::write_atomic(&self.root.join(SOURCES_FILE), &sources.to_vec())
    }

    /// Whether any group record references the source.
    fn source_is_referenced(&self, name: &str) -> Result<bool> {
        for group in self.group_names()? {
            let records = group::load_records(&self.group_file(&group))?;
            if records.iter().any(|record| record.source == name) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl PackageLookup for PackageDatabase {
    fn find_packages(
        &self,
        name: &str,
        requirement: Option<&VersionRequirement>,
    ) -> Vec<Candidate> {
        let sources = self.sources.read().unwrap();
        let mut candidates: Vec<Candidate> = sources
            .iter()
            .flat_map(|source| {
                source
                    .packages
                    .iter()
                    .filter(|p| p.name == name)
                    .filter(|p| requirement.map(|r| r.matches(&p.version)).unwrap_or(true))
                    .map(|p| Candidate {
                        scope: self.scope,
                        source: source.name.clone(),
                        package: p.clone(),
                    })
            })
            .collect();
        candidates.sort_by(|a, b| a.package.version.cmp(&b.package.version));
        candidates
    }
}

fn wrap_update_error(name: &str, err: Error) -> Error {
    match err.kind() {
        ErrorKind::Canceled | ErrorKind::AuthRequired | ErrorKind::AuthFailed => err,
        _ => Error::new(
            ErrorKind::SourceUpdateFailed,
            format!("updating source '{}' failed: {}", name, err),
        ),
    }
}

/// Remove clone directories that no registered source owns.
fn collect_orphaned_clones(root: &Path, sources: &[PackageSource]) {
    let sources_dir = root.join(SOURCES_DIR);
    let entries = match fs::read_dir(&sources_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let owned = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| sources.iter().any(|s| s.name == n))
            .unwrap_or(false);
        if !owned {
            log::debug!("removing orphaned clone directory {}", path.display());
            let _ = fs::remove_dir_all(&path);
        }
    }
}
