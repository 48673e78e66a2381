//! Visit identifier resolution
//!
//! A visit looks like `cm00001-1`: a two letter proposal code prefix, the
//! proposal number, a dash and the session number. Its archive lives at
//! `<visits_root>/<proposal>/<visit>`. Resolution only checks existence and
//! never creates anything.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

static VISIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]{2}[0-9]+)-([0-9]+)$").expect("visit pattern compiles"));

/// Separator between the visit and the free text in a registry experiment name
pub const EXPERIMENT_NAME_SEPARATOR: char = '_';

/// Why a visit could not be resolved to an archive directory
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VisitError {
    /// Identifier does not match the visit pattern
    #[error("visit identifier {0:?} does not conform to expected pattern")]
    Malformed(String),

    /// Identifier is well formed but its directory is missing
    #[error("visit directory not found: {0}")]
    Absent(PathBuf),
}

/// Maps visit identifiers onto archive directories
#[derive(Debug, Clone)]
pub struct VisitResolver {
    visits_root: PathBuf,
}

impl VisitResolver {
    pub fn new(visits_root: impl Into<PathBuf>) -> Self {
        Self {
            visits_root: visits_root.into(),
        }
    }

    /// Archive subdirectory for a visit, relative to the visits root
    pub fn subdirectory(visit: &str) -> Result<PathBuf, VisitError> {
        let captures = VISIT_PATTERN
            .captures(visit)
            .ok_or_else(|| VisitError::Malformed(visit.to_string()))?;

        Ok(PathBuf::from(&captures[1]).join(visit))
    }

    /// Archive directory of an existing visit
    pub fn resolve(&self, visit: &str) -> Result<PathBuf, VisitError> {
        let directory = self.visits_root.join(Self::subdirectory(visit)?);

        if directory.is_dir() {
            Ok(directory)
        } else {
            Err(VisitError::Absent(directory))
        }
    }
}

/// Visit identifier carried by a registry experiment name
///
/// The visit is the text before the first separator, e.g.
/// `cm00001-1_something#else` → `cm00001-1`. A name with no separator, or whose
/// leading text is not a visit, is malformed.
pub fn derive_visit(experiment_name: &str) -> Result<String, VisitError> {
    let (visit, _) = experiment_name
        .split_once(EXPERIMENT_NAME_SEPARATOR)
        .ok_or_else(|| VisitError::Malformed(experiment_name.to_string()))?;

    if !VISIT_PATTERN.is_match(visit) {
        return Err(VisitError::Malformed(visit.to_string()));
    }

    Ok(visit.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_visit() {
        assert_eq!(derive_visit("cm00001-1_something#else").unwrap(), "cm00001-1");
        assert_eq!(derive_visit("lb32627-66_a_b").unwrap(), "lb32627-66");
        assert!(matches!(derive_visit("cm00001-1"), Err(VisitError::Malformed(_))));
        assert!(matches!(derive_visit("Xcm00001-1_otherstuff"), Err(VisitError::Malformed(_))));
        assert!(matches!(derive_visit("cm00001_1"), Err(VisitError::Malformed(_))));
        assert!(matches!(derive_visit("_cm00001-1"), Err(VisitError::Malformed(_))));
    }

    #[test]
    fn test_subdirectory() {
        assert_eq!(
            VisitResolver::subdirectory("cm00001-1").unwrap(),
            PathBuf::from("cm00001").join("cm00001-1")
        );
        assert!(VisitResolver::subdirectory("cm-1").is_err());
    }

    #[test]
    fn test_resolve_absent_and_present() {
        let root = tempfile::tempdir().unwrap();
        let resolver = VisitResolver::new(root.path());

        let err = resolver.resolve("cm00001-1").unwrap_err();
        assert!(matches!(err, VisitError::Absent(_)));
        // Resolution never creates the directory
        assert!(!root.path().join("cm00001").exists());

        std::fs::create_dir_all(root.path().join("cm00001/cm00001-1")).unwrap();
        let directory = resolver.resolve("cm00001-1").unwrap();
        assert_eq!(directory, root.path().join("cm00001/cm00001-1"));
    }

    #[test]
    fn test_malformed_message_is_distinct() {
        let malformed = VisitError::Malformed("x".into()).to_string();
        let absent = VisitError::Absent(PathBuf::from("/v")).to_string();
        assert!(malformed.contains("does not conform"));
        assert!(absent.contains("not found"));
        assert!(!absent.contains("does not conform"));
    }
}
