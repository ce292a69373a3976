//! Package query resolution.
//!
//! A query is `name` or `name@requirement`. Resolution picks the candidate
//! with the highest version; when nothing matches, the diagnostics
//! distinguish "the name exists at other versions" from "the name is
//! unknown".

use crate::database::{Candidate, PackageLookup};
use crate::error::{Error, ErrorKind, Result};
use crate::version::VersionRequirement;

/// Split a query into its name and requirement parts.
pub fn parse_query(query: &str) -> Result<(String, VersionRequirement)> {
    let (name, requirement) = match query.split_once('@') {
        Some((name, requirement)) => (name, VersionRequirement::parse(requirement)?),
        None => (query, VersionRequirement::any()),
    };
    if name.is_empty() {
        return Err(Error::new(
            ErrorKind::UsageError,
            format!("'{}' is not a valid package query", query),
        ));
    }
    Ok((name.to_string(), requirement))
}

/// Resolve a query against a package view to the best single candidate.
pub fn query_package(view: &dyn PackageLookup, query: &str) -> Result<Candidate> {
    let (name, requirement) = parse_query(query)?;

    let mut candidates = view.find_packages(&name, Some(&requirement));
    match candidates.pop() {
        Some(best) => Ok(best),
        None => {
            let other_versions_exist = !view.find_packages(&name, None).is_empty();
            if other_versions_exist {
                Err(Error::new(
                    ErrorKind::NoVersionMatches,
                    format!(
                        "No package found for {}, but other versions are available",
                        query
                    ),
                ))
            } else {
                Err(Error::new(
                    ErrorKind::UnknownPackage,
                    format!("No package found for {}", query),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Scope;
    use crate::package::Package;
    use crate::test_utils::manifest;
    use crate::version::Version;

    struct FakeView {
        packages: Vec<Package>,
    }

    impl FakeView {
        fn with(specs: &[(&str, &str)]) -> Self {
            FakeView {
                packages: specs
                    .iter()
                    .map(|(name, version)| {
                        Package::parse_manifest(&manifest(name, version, &[])).unwrap()
                    })
                    .collect(),
            }
        }
    }

    impl PackageLookup for FakeView {
        fn find_packages(
            &self,
            name: &str,
            requirement: Option<&VersionRequirement>,
        ) -> Vec<Candidate> {
            let mut candidates: Vec<Candidate> = self
                .packages
                .iter()
                .filter(|p| p.name == name)
                .filter(|p| requirement.map(|r| r.matches(&p.version)).unwrap_or(true))
                .map(|p| Candidate {
                    scope: Scope::Project,
                    source: "fake".to_string(),
                    package: p.clone(),
                })
                .collect();
            candidates.sort_by(|a, b| a.package.version.cmp(&b.package.version));
            candidates
        }
    }

    #[test]
    fn test_parse_query_forms() {
        let (name, requirement) = parse_query("foo").unwrap();
        assert_eq!(name, "foo");
        assert!(requirement.is_any());

        let (name, requirement) = parse_query("foo@>=1.2,<2").unwrap();
        assert_eq!(name, "foo");
        assert!(requirement.matches(&Version::parse("1.5").unwrap()));
        assert!(!requirement.matches(&Version::parse("2.0").unwrap()));
    }

    #[test]
    fn test_parse_query_rejects_bad_forms() {
        assert_eq!(
            parse_query("@1.0").unwrap_err().kind(),
            ErrorKind::UsageError
        );
        assert_eq!(
            parse_query("foo@nonsense").unwrap_err().kind(),
            ErrorKind::MalformedRequirement
        );
    }

    #[test]
    fn test_query_picks_highest_version() {
        let view = FakeView::with(&[("foo", "1.0"), ("foo", "1.1"), ("foo", "2.0")]);
        let best = query_package(&view, "foo@>=1.0").unwrap();
        assert_eq!(best.package.version, Version::parse("2.0").unwrap());
    }

    #[test]
    fn test_query_prerelease_loses_tie() {
        let view = FakeView::with(&[
            ("foo", "1.0"),
            ("foo", "1.1"),
            ("foo", "1.2-beta"),
            ("foo", "1.2"),
        ]);
        let best = query_package(&view, "foo@^1.0").unwrap();
        assert_eq!(best.package.version, Version::parse("1.2").unwrap());
    }

    #[test]
    fn test_query_no_version_matches() {
        let view = FakeView::with(&[("foo", "1.0")]);
        let err = query_package(&view, "foo@>=2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoVersionMatches);
        assert_eq!(
            err.to_string(),
            "No package found for foo@>=2, but other versions are available"
        );
    }

    #[test]
    fn test_query_unknown_package() {
        let view = FakeView::with(&[("foo", "1.0")]);
        let err = query_package(&view, "bar").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownPackage);
        assert_eq!(err.to_string(), "No package found for bar");
    }
}
