//! Paths served without a session

use std::collections::HashSet;

use regex::Regex;

use crate::{Error, Result};

/// Exact-match set plus an optional pattern anchored at the start of the path.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    exact: HashSet<String>,
    pattern: Option<Regex>,
}

impl PathMatcher {
    /// Build a matcher from configured paths and pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `pattern` is not a valid regex.
    pub fn new<I, S>(exact: I, pattern: Option<&str>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pattern = pattern
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::Config(format!("Invalid excluded path pattern: {e}")))?;

        Ok(Self {
            exact: exact.into_iter().map(Into::into).collect(),
            pattern,
        })
    }

    /// Returns `true` if `path` bypasses the login requirement.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        if self.exact.contains(path) {
            return true;
        }
        self.pattern
            .as_ref()
            .and_then(|re| re.find(path))
            .is_some_and(|m| m.start() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_paths_match_only_exactly() {
        let m = PathMatcher::new(["/", "/forbidden"], None).unwrap();
        assert!(m.matches("/"));
        assert!(m.matches("/forbidden"));
        assert!(!m.matches("/forbidden/"));
        assert!(!m.matches("/reports"));
    }

    #[test]
    fn pattern_is_anchored_at_start() {
        let m = PathMatcher::new(Vec::<String>::new(), Some("/static/")).unwrap();
        assert!(m.matches("/static/app.css"));
        assert!(!m.matches("/reports/static/app.css"));
    }

    #[test]
    fn exact_set_and_pattern_combine() {
        let m = PathMatcher::new(["/health"], Some(r"^/static/")).unwrap();
        assert!(m.matches("/health"));
        assert!(m.matches("/static/logo.png"));
        assert!(!m.matches("/whoami"));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = PathMatcher::new(["/"], Some("([")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn empty_matcher_matches_nothing() {
        assert!(!PathMatcher::default().matches("/"));
    }
}
