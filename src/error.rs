//! Error taxonomy for all core operations.
//!
//! Every failure surfaces through a [`Error`] carrying a stable [`ErrorKind`]
//! plus a human-readable message. Futures store and re-raise these values, so
//! the type is cheap to clone.

use std::fmt;

/// Stable classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No package with the queried name exists in any registered source.
    UnknownPackage,
    /// The name exists, but no version satisfies the requirement.
    NoVersionMatches,
    /// A version string did not parse.
    MalformedVersion,
    /// A version requirement string did not parse.
    MalformedRequirement,
    /// No source registered under the given name.
    UnknownSource,
    /// A source with the given name is already registered.
    DuplicateSource,
    /// The source is still referenced by an installed package.
    InUse,
    /// A source update failed; the message carries the cause.
    SourceUpdateFailed,
    /// The remote requires credentials and none were supplied.
    AuthRequired,
    /// The remote rejected the supplied credentials.
    AuthFailed,
    /// The package is not installed in the group.
    NotInstalled,
    /// The package is already installed in the group.
    AlreadyInstalled,
    /// A declared dependency cannot be satisfied by the registered sources.
    UnsatisfiedDependency,
    /// The on-disk database uses an unknown schema version.
    IncompatibleDatabase,
    /// An on-disk file failed to parse.
    Corrupt,
    /// An underlying I/O operation failed.
    Io,
    /// The operation was canceled.
    Canceled,
    /// The command line was invalid.
    UsageError,
    /// The runtime configuration was invalid.
    ConfigError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnknownPackage => "unknown package",
            ErrorKind::NoVersionMatches => "no version matches",
            ErrorKind::MalformedVersion => "malformed version",
            ErrorKind::MalformedRequirement => "malformed requirement",
            ErrorKind::UnknownSource => "unknown source",
            ErrorKind::DuplicateSource => "duplicate source",
            ErrorKind::InUse => "source in use",
            ErrorKind::SourceUpdateFailed => "source update failed",
            ErrorKind::AuthRequired => "authentication required",
            ErrorKind::AuthFailed => "authentication failed",
            ErrorKind::NotInstalled => "not installed",
            ErrorKind::AlreadyInstalled => "already installed",
            ErrorKind::UnsatisfiedDependency => "unsatisfied dependency",
            ErrorKind::IncompatibleDatabase => "incompatible database",
            ErrorKind::Corrupt => "corrupt file",
            ErrorKind::Io => "i/o error",
            ErrorKind::Canceled => "canceled",
            ErrorKind::UsageError => "usage error",
            ErrorKind::ConfigError => "configuration error",
        };
        f.write_str(name)
    }
}

/// An error with a stable kind and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn canceled() -> Self {
        Error::new(ErrorKind::Canceled, "the operation was canceled")
    }

    pub fn io(context: impl fmt::Display, cause: &std::io::Error) -> Self {
        Error::new(ErrorKind::Io, format!("{}: {}", context, cause))
    }

    pub fn corrupt(file: impl fmt::Display, detail: impl fmt::Display) -> Self {
        Error::new(ErrorKind::Corrupt, format!("{}: {}", file, detail))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_canceled(&self) -> bool {
        self.kind == ErrorKind::Canceled
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_carries_kind_and_message() {
        let err = Error::new(ErrorKind::UnknownSource, "no source named 'ex'");
        assert_eq!(err.kind(), ErrorKind::UnknownSource);
        assert_eq!(err.to_string(), "no source named 'ex'");
    }

    #[test]
    fn test_canceled_helper() {
        assert!(Error::canceled().is_canceled());
        assert!(!Error::new(ErrorKind::Io, "x").is_canceled());
    }
}
