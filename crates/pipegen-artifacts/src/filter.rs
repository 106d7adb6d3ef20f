//! Glob filters over bundle keys.

use serde::{Deserialize, Serialize};
use wildmatch::WildMatch;

/// Exclude applied to every download so failed-job bundles are never consumed.
pub const FAILED_EXCLUDE: &str = "*-failed/*";

/// Include/exclude glob lists matched against full keys.
///
/// A key passes when the include list is empty or any include matches, and no
/// exclude matches. `*` and `?` match across `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl KeyFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    pub fn matches(&self, key: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|p| WildMatch::new(p).matches(key));
        included && !self.exclude.iter().any(|p| WildMatch::new(p).matches(key))
    }

    /// Add [`FAILED_EXCLUDE`] unless already present.
    pub fn excluding_failed(mut self) -> Self {
        if !self.exclude.iter().any(|p| p == FAILED_EXCLUDE) {
            self.exclude.push(FAILED_EXCLUDE.to_string());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str]) -> KeyFilter {
        KeyFilter::new(
            include.iter().map(|s| s.to_string()).collect(),
            exclude.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(KeyFilter::default().matches("1/build/build:centos7.tar.gz"));
    }

    #[test]
    fn test_include_platform_suffix() {
        let f = filter(&["*centos7.tar.gz"], &[]);
        assert!(f.matches("1/build/build:centos7.tar.gz"));
        assert!(!f.matches("1/build/build:ubuntu18_04.tar.gz"));
    }

    #[test]
    fn test_stage_and_failed_excludes() {
        let f = filter(&[], &["*/test/*", "*-failed/*"]);
        assert!(f.matches("1/build/build:centos7.tar.gz"));
        assert!(!f.matches("1/test/test:centos7.tar.gz"));
        assert!(!f.matches("1/build-failed/build:centos7.tar.gz"));
    }

    #[test]
    fn test_excluding_failed_is_idempotent() {
        let f = KeyFilter::default().excluding_failed().excluding_failed();
        assert_eq!(f.exclude, [FAILED_EXCLUDE]);
    }
}
