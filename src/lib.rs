pub mod database;
pub mod error;
pub mod future;
pub mod jsonfile;
pub mod package;
pub mod query;
pub mod source;
pub mod state;
pub mod version;

/// Test fixtures shared between unit tests.
#[cfg(test)]
pub mod test_utils {
    use std::fs;
    use std::path::Path;

    /// Render a manifest JSON string.
    pub fn manifest(name: &str, version: &str, dependencies: &[(&str, &str)]) -> String {
        let deps = dependencies
            .iter()
            .map(|(dep, req)| format!(r#"["{}", "{}"]"#, dep, req))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            r#"{{"name": "{}", "version": "{}", "dependencies": [{}]}}"#,
            name, version, deps
        )
    }

    /// Build a local git repository with one commit containing the given
    /// files (paths relative to the repository root).
    pub fn fixture_repo(dir: &Path, files: &[(&str, &str)]) {
        let repo = git2::Repository::init(dir).unwrap();
        for (name, content) in files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, content).unwrap();
        }
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let signature = git2::Signature::now("tester", "tester@example.invalid").unwrap();
        repo.commit(Some("HEAD"), &signature, &signature, "init", &tree, &[])
            .unwrap();
    }
}
