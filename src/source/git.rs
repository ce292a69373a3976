//! Git transport.
//!
//! Wraps libgit2 clone/fetch/checkout/submodule operations behind the
//! [`GitClient`] trait so the update pipeline can be exercised without a
//! network. Checkouts are forced with prefer-theirs semantics (mirror
//! behavior), and transfer counters are forwarded through the caller's
//! [`Notifier`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, RemoteCallbacks, Repository};

use crate::error::{Error, ErrorKind, Result};
use crate::future::Notifier;

/// Credential mechanisms the transport is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Default,
    Username,
    UsernamePassword,
    SshKey,
    SshCustom,
    SshInteractive,
}

/// A request for credentials, handed to the registered callback.
#[derive(Debug, Clone)]
pub struct CredentialQuery {
    pub allowed: Vec<CredentialKind>,
    pub url: String,
    pub username_from_url: Option<String>,
}

impl CredentialQuery {
    pub fn allows(&self, kind: CredentialKind) -> bool {
        self.allowed.contains(&kind)
    }
}

/// The callback's answer.
#[derive(Debug, Clone)]
pub enum CredentialResponse {
    UsernamePassword {
        username: String,
        password: String,
    },
    Username(String),
    SshKey {
        username: String,
        public_key: Option<PathBuf>,
        private_key: PathBuf,
        passphrase: Option<String>,
    },
    Default,
    /// No credential of the allowed kinds is available; the transport may
    /// try another mechanism.
    Invalid,
    /// Abort the operation with an authentication failure.
    Error,
}

/// Credential callback type. Must be re-entrant and thread-safe.
pub type CredentialsCallback = Arc<dyn Fn(&CredentialQuery) -> CredentialResponse + Send + Sync>;

/// A callback that declines every credential request.
pub fn no_credentials() -> CredentialsCallback {
    Arc::new(|_query| CredentialResponse::Invalid)
}

/// Remote clone/fetch/checkout capability used by the source update
/// pipeline.
#[cfg_attr(test, mockall::automock)]
pub trait GitClient: Send + Sync {
    /// Clone `url` into `target`, which must not yet contain a repository.
    fn clone_repo(&self, url: &str, target: &Path, notifier: &Notifier) -> Result<()>;

    /// Fetch from `origin` into an existing clone.
    fn fetch(&self, workdir: &Path, notifier: &Notifier) -> Result<()>;

    /// Force-checkout the fetched default branch, preferring their side.
    fn checkout_default(&self, workdir: &Path, notifier: &Notifier) -> Result<()>;

    /// Recursively initialize and update submodules.
    fn update_submodules(&self, workdir: &Path, notifier: &Notifier) -> Result<()>;
}

/// libgit2-backed implementation.
pub struct LibGit {
    credentials: CredentialsCallback,
}

impl LibGit {
    pub fn new(credentials: CredentialsCallback) -> Self {
        LibGit { credentials }
    }

    fn remote_callbacks<'cb>(
        &self,
        notifier: &Notifier,
        auth_failure: &Arc<Mutex<Option<Error>>>,
    ) -> RemoteCallbacks<'cb> {
        let mut callbacks = RemoteCallbacks::new();

        let credentials = Arc::clone(&self.credentials);
        let auth = Arc::clone(auth_failure);
        callbacks.credentials(move |url, username_from_url, allowed_types| {
            let query = CredentialQuery {
                allowed: kinds_from(allowed_types),
                url: url.to_string(),
                username_from_url: username_from_url.map(String::from),
            };
            match credentials(&query) {
                CredentialResponse::UsernamePassword { username, password } => {
                    Cred::userpass_plaintext(&username, &password)
                }
                CredentialResponse::Username(username) => Cred::username(&username),
                CredentialResponse::SshKey {
                    username,
                    public_key,
                    private_key,
                    passphrase,
                } => Cred::ssh_key(
                    &username,
                    public_key.as_deref(),
                    &private_key,
                    passphrase.as_deref(),
                ),
                CredentialResponse::Default => Cred::default(),
                CredentialResponse::Invalid => {
                    *auth.lock().unwrap() = Some(Error::new(
                        ErrorKind::AuthRequired,
                        format!("authentication required for {}", query.url),
                    ));
                    Err(git2::Error::new(
                        ErrorCode::Auth,
                        ErrorClass::Callback,
                        "no usable credentials",
                    ))
                }
                CredentialResponse::Error => {
                    *auth.lock().unwrap() = Some(Error::new(
                        ErrorKind::AuthFailed,
                        format!("authentication failed for {}", query.url),
                    ));
                    Err(git2::Error::new(
                        ErrorCode::Auth,
                        ErrorClass::Callback,
                        "credential callback aborted",
                    ))
                }
            }
        });

        let progress_notifier = notifier.clone();
        callbacks.transfer_progress(move |stats| {
            progress_notifier
                .progress(stats.received_objects() as u64, stats.total_objects() as u64)
                .is_ok()
        });

        callbacks
    }

    fn checkout_builder<'cb>(&self, notifier: &Notifier) -> CheckoutBuilder<'cb> {
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        checkout.use_theirs(true);
        let progress_notifier = notifier.clone();
        checkout.progress(move |_path, current, total| {
            let _ = progress_notifier.progress(current as u64, total as u64);
        });
        checkout
    }

    fn convert(
        &self,
        err: git2::Error,
        notifier: &Notifier,
        auth_failure: &Arc<Mutex<Option<Error>>>,
    ) -> Error {
        if notifier.is_canceled() {
            return Error::canceled();
        }
        if let Some(auth) = auth_failure.lock().unwrap().take() {
            return auth;
        }
        Error::new(ErrorKind::SourceUpdateFailed, err.message().to_string())
    }
}

impl GitClient for LibGit {
    fn clone_repo(&self, url: &str, target: &Path, notifier: &Notifier) -> Result<()> {
        let auth_failure = Arc::new(Mutex::new(None));
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(self.remote_callbacks(notifier, &auth_failure));

        RepoBuilder::new()
            .fetch_options(fetch_options)
            .with_checkout(self.checkout_builder(notifier))
            .clone(url, target)
            .map(|_repo| ())
            .map_err(|e| self.convert(e, notifier, &auth_failure))
    }

    fn fetch(&self, workdir: &Path, notifier: &Notifier) -> Result<()> {
        let auth_failure = Arc::new(Mutex::new(None));
        let result = (|| {
            let repo = Repository::open(workdir)?;
            let mut remote = repo.find_remote("origin")?;
            let mut fetch_options = FetchOptions::new();
            fetch_options.remote_callbacks(self.remote_callbacks(notifier, &auth_failure));
            // Empty refspec list fetches the remote's configured refspecs.
            remote.fetch(&[] as &[&str], Some(&mut fetch_options), None)
        })();
        result.map_err(|e| self.convert(e, notifier, &auth_failure))
    }

    fn checkout_default(&self, workdir: &Path, notifier: &Notifier) -> Result<()> {
        let auth_failure = Arc::new(Mutex::new(None));
        let result = (|| {
            let repo = Repository::open(workdir)?;
            let target = repo
                .revparse_single("FETCH_HEAD")
                .or_else(|_| repo.revparse_single("refs/remotes/origin/HEAD"))
                .or_else(|_| repo.revparse_single("HEAD"))?;
            let mut checkout = self.checkout_builder(notifier);
            repo.checkout_tree(&target, Some(&mut checkout))?;
            repo.set_head_detached(target.id())
        })();
        result.map_err(|e| self.convert(e, notifier, &auth_failure))
    }

    fn update_submodules(&self, workdir: &Path, notifier: &Notifier) -> Result<()> {
        let auth_failure = Arc::new(Mutex::new(None));
        let result = (|| {
            let repo = Repository::open(workdir)?;
            for mut submodule in repo.submodules()? {
                let mut fetch_options = FetchOptions::new();
                fetch_options.remote_callbacks(self.remote_callbacks(notifier, &auth_failure));
                let mut options = git2::SubmoduleUpdateOptions::new();
                options
                    .fetch(fetch_options)
                    .checkout(self.checkout_builder(notifier));
                submodule.update(true, Some(&mut options))?;
            }
            Ok(())
        })();
        result.map_err(|e| self.convert(e, notifier, &auth_failure))
    }
}

fn kinds_from(allowed: CredentialType) -> Vec<CredentialKind> {
    let mut kinds = Vec::new();
    if allowed.contains(CredentialType::DEFAULT) {
        kinds.push(CredentialKind::Default);
    }
    if allowed.contains(CredentialType::USERNAME) {
        kinds.push(CredentialKind::Username);
    }
    if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
        kinds.push(CredentialKind::UsernamePassword);
    }
    if allowed.contains(CredentialType::SSH_KEY) {
        kinds.push(CredentialKind::SshKey);
    }
    if allowed.contains(CredentialType::SSH_CUSTOM) {
        kinds.push(CredentialKind::SshCustom);
    }
    if allowed.contains(CredentialType::SSH_INTERACTIVE) {
        kinds.push(CredentialKind::SshInteractive);
    }
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future;
    use crate::test_utils::fixture_repo;

    fn with_notifier<F: FnOnce(&Notifier) + Send + 'static>(f: F) {
        future::spawn(move |notifier| {
            f(notifier);
            Ok(())
        })
        .get()
        .unwrap();
    }

    #[test]
    fn test_clone_and_fetch_local_repo() {
        let upstream = tempfile::tempdir().unwrap();
        fixture_repo(upstream.path(), &[("README", "hello")]);

        let checkout = tempfile::tempdir().unwrap();
        let target = checkout.path().join("clone");
        let url = upstream.path().to_string_lossy().to_string();

        with_notifier(move |notifier| {
            let git = LibGit::new(no_credentials());
            git.clone_repo(&url, &target, notifier).unwrap();
            assert!(target.join("README").exists());

            git.fetch(&target, notifier).unwrap();
            git.checkout_default(&target, notifier).unwrap();
            git.update_submodules(&target, notifier).unwrap();
        });
    }

    #[test]
    fn test_clone_missing_remote_fails() {
        let checkout = tempfile::tempdir().unwrap();
        let target = checkout.path().join("clone");

        with_notifier(move |notifier| {
            let git = LibGit::new(no_credentials());
            let err = git
                .clone_repo("/nonexistent/repository", &target, notifier)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SourceUpdateFailed);
        });
    }

    #[test]
    fn test_credential_query_allows() {
        let query = CredentialQuery {
            allowed: vec![CredentialKind::UsernamePassword],
            url: "https://example.invalid/repo.git".into(),
            username_from_url: Some("alice".into()),
        };
        assert!(query.allows(CredentialKind::UsernamePassword));
        assert!(!query.allows(CredentialKind::SshKey));
    }
}
