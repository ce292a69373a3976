use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");

    println!("cargo:rustc-env=RALPH_VERSION={}", version_string());
}

/// The string reported by `ralph --version`.
///
/// Prefers `git describe` so builds from a checkout identify their exact
/// commit; release tarballs and other git-less builds fall back to the crate
/// version plus a build timestamp.
fn version_string() -> String {
    git_describe().unwrap_or_else(|| {
        let built_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        format!("{}+{}", env!("CARGO_PKG_VERSION"), built_at)
    })
}

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty=+"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim().trim_start_matches('v');
    if described.is_empty() {
        None
    } else {
        Some(described.to_string())
    }
}
