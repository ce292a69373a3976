//! Version and version-requirement model.
//!
//! A [`Version`] is a list of numeric components plus an optional pre-release
//! tag, totally ordered. A [`VersionRequirement`] is a conjunction of
//! `(operator, version)` clauses parsed from strings like `">=1.2,<2"`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, ErrorKind, Result};

/// A parsed version: numeric components plus an optional pre-release tag.
///
/// Ordering is lexicographic over the components (the shorter list is padded
/// with zeros), and a pre-release tag orders before the same version without
/// one. Tags compare lexicographically between themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    components: Vec<u64>,
    prerelease: Option<String>,
}

impl Version {
    /// Parse a version from `"N(.N)*(-tag)?"`.
    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || {
            Error::new(
                ErrorKind::MalformedVersion,
                format!("'{}' is not a valid version", s),
            )
        };

        let (numbers, prerelease) = match s.split_once('-') {
            Some((head, tag)) if !tag.is_empty() => (head, Some(tag.to_string())),
            Some(_) => return Err(malformed()),
            None => (s, None),
        };

        if numbers.is_empty() {
            return Err(malformed());
        }

        let components = numbers
            .split('.')
            .map(|part| part.parse::<u64>().map_err(|_| malformed()))
            .collect::<Result<Vec<u64>>>()?;

        Ok(Version {
            components,
            prerelease,
        })
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    pub fn prerelease(&self) -> Option<&str> {
        self.prerelease.as_deref()
    }

    fn component(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        // Numerically equal: a pre-release tag orders before no tag.
        match (&self.prerelease, &other.prerelease) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numbers = self
            .components
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        match &self.prerelease {
            Some(tag) => write!(f, "{}-{}", numbers, tag),
            None => f.write_str(&numbers),
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A single requirement clause operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Tilde,
    Caret,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Tilde => "~",
            Op::Caret => "^",
        }
    }
}

/// A conjunction of version clauses.
///
/// The empty requirement matches every version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionRequirement {
    clauses: Vec<(Op, Version)>,
}

impl VersionRequirement {
    /// The requirement that matches all versions.
    pub fn any() -> Self {
        VersionRequirement::default()
    }

    /// Parse a comma-separated list of clauses, e.g. `">=1.2,<2"`.
    ///
    /// A bare version is an equality clause; the empty string is the
    /// match-all requirement.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(VersionRequirement::any());
        }

        let clauses = trimmed
            .split(',')
            .map(|clause| Self::parse_clause(clause.trim(), s))
            .collect::<Result<Vec<_>>>()?;
        Ok(VersionRequirement { clauses })
    }

    fn parse_clause(clause: &str, whole: &str) -> Result<(Op, Version)> {
        let malformed = || {
            Error::new(
                ErrorKind::MalformedRequirement,
                format!("'{}' is not a valid version requirement", whole),
            )
        };

        let (op, rest) = if let Some(rest) = clause.strip_prefix(">=") {
            (Op::Ge, rest)
        } else if let Some(rest) = clause.strip_prefix("<=") {
            (Op::Le, rest)
        } else if let Some(rest) = clause.strip_prefix("!=") {
            (Op::Ne, rest)
        } else if let Some(rest) = clause.strip_prefix('>') {
            (Op::Gt, rest)
        } else if let Some(rest) = clause.strip_prefix('<') {
            (Op::Lt, rest)
        } else if let Some(rest) = clause.strip_prefix('=') {
            (Op::Eq, rest)
        } else if let Some(rest) = clause.strip_prefix('~') {
            (Op::Tilde, rest)
        } else if let Some(rest) = clause.strip_prefix('^') {
            (Op::Caret, rest)
        } else {
            (Op::Eq, clause)
        };

        let version = Version::parse(rest.trim()).map_err(|_| malformed())?;
        Ok((op, version))
    }

    /// Whether every clause accepts the given version.
    pub fn matches(&self, version: &Version) -> bool {
        self.clauses
            .iter()
            .all(|(op, base)| Self::clause_matches(*op, base, version))
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    fn clause_matches(op: Op, base: &Version, version: &Version) -> bool {
        match op {
            Op::Eq => version == base,
            Op::Ne => version != base,
            Op::Lt => version < base,
            Op::Le => version <= base,
            Op::Gt => version > base,
            Op::Ge => version >= base,
            Op::Tilde => {
                // All but the last stated component must match exactly.
                if version < base {
                    return false;
                }
                let fixed = base.components.len().saturating_sub(1);
                (0..fixed).all(|i| version.component(i) == base.component(i))
            }
            Op::Caret => {
                // Components up to and including the first non-zero one must
                // match exactly.
                if version < base {
                    return false;
                }
                let pivot = base
                    .components
                    .iter()
                    .position(|&c| c != 0)
                    .unwrap_or(base.components.len().saturating_sub(1));
                (0..=pivot).all(|i| version.component(i) == base.component(i))
            }
        }
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .clauses
            .iter()
            .map(|(op, version)| format!("{}{}", op.symbol(), version))
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&rendered)
    }
}

impl FromStr for VersionRequirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VersionRequirement::parse(s)
    }
}

impl Serialize for VersionRequirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionRequirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VersionRequirement::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn req(s: &str) -> VersionRequirement {
        VersionRequirement::parse(s).unwrap()
    }

    #[test]
    fn test_parse_basic() {
        let version = v("1.2.3");
        assert_eq!(version.components(), &[1, 2, 3]);
        assert_eq!(version.prerelease(), None);
    }

    #[test]
    fn test_parse_prerelease() {
        let version = v("1.2-beta");
        assert_eq!(version.components(), &[1, 2]);
        assert_eq!(version.prerelease(), Some("beta"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "abc", "1.x", "1..2", "1.2-", "-beta", "1.2.3.4a"] {
            let err = Version::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedVersion, "input {:?}", bad);
        }
    }

    #[test]
    fn test_ordering() {
        assert!(v("1.0") < v("1.1"));
        assert!(v("1.9") < v("1.10"));
        assert!(v("2") > v("1.99.99"));
        assert_eq!(v("1.0"), v("1.0"));
    }

    #[test]
    fn test_ordering_pads_with_zeros() {
        assert_eq!(v("1.0").cmp(&v("1.0.0")), Ordering::Equal);
        assert!(v("1") < v("1.0.1"));
    }

    #[test]
    fn test_prerelease_orders_before_release() {
        assert!(v("1.2-beta") < v("1.2"));
        assert!(v("1.2-alpha") < v("1.2-beta"));
        assert!(v("1.2-beta") > v("1.1"));
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["1", "1.2.3", "0.4.0-rc1"] {
            assert_eq!(v(s).to_string(), s);
        }
    }

    #[test]
    fn test_requirement_empty_matches_all() {
        let any = req("");
        assert!(any.is_any());
        assert!(any.matches(&v("0.0.1")));
        assert!(any.matches(&v("99.99")));
    }

    #[test]
    fn test_requirement_operators() {
        assert!(req("=1.2").matches(&v("1.2")));
        assert!(!req("=1.2").matches(&v("1.2.1")));
        assert!(req("!=1.2").matches(&v("1.3")));
        assert!(req(">=1.2").matches(&v("1.2")));
        assert!(req(">1.2").matches(&v("1.2.1")));
        assert!(!req(">1.2").matches(&v("1.2")));
        assert!(req("<2").matches(&v("1.99")));
        assert!(req("<=2").matches(&v("2.0")));
    }

    #[test]
    fn test_requirement_bare_version_is_equality() {
        assert!(req("1.2").matches(&v("1.2")));
        assert!(!req("1.2").matches(&v("1.3")));
    }

    #[test]
    fn test_requirement_conjunction() {
        let range = req(">=1.2,<2");
        assert!(range.matches(&v("1.2")));
        assert!(range.matches(&v("1.9.9")));
        assert!(!range.matches(&v("2.0")));
        assert!(!range.matches(&v("1.1")));
    }

    #[test]
    fn test_requirement_tilde() {
        let tilde = req("~1.2.3");
        assert!(tilde.matches(&v("1.2.3")));
        assert!(tilde.matches(&v("1.2.9")));
        assert!(!tilde.matches(&v("1.3.0")));
        assert!(!tilde.matches(&v("1.2.2")));

        let two = req("~1.2");
        assert!(two.matches(&v("1.4")));
        assert!(!two.matches(&v("2.0")));
    }

    #[test]
    fn test_requirement_caret() {
        let caret = req("^1.2");
        assert!(caret.matches(&v("1.2")));
        assert!(caret.matches(&v("1.9")));
        assert!(!caret.matches(&v("2.0")));

        let zero = req("^0.3.1");
        assert!(zero.matches(&v("0.3.2")));
        assert!(!zero.matches(&v("0.4.0")));
    }

    #[test]
    fn test_requirement_rejects_garbage() {
        for bad in [">=", "foo", ">=1.2,", "==1.2"] {
            let err = VersionRequirement::parse(bad).unwrap_err();
            assert_eq!(
                err.kind(),
                ErrorKind::MalformedRequirement,
                "input {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_requirement_round_trip() {
        for s in ["", "=1.2", ">=1.2,<2", "~1.2.3", "^0.4", "!=2.0"] {
            let parsed = req(s);
            let reparsed = req(&parsed.to_string());
            assert_eq!(parsed, reparsed, "input {:?}", s);
            for candidate in ["0.4.1", "1.2", "1.5", "2.0", "3.0-rc1"] {
                assert_eq!(
                    parsed.matches(&v(candidate)),
                    reparsed.matches(&v(candidate)),
                    "req {:?} candidate {:?}",
                    s,
                    candidate
                );
            }
        }
    }
}
