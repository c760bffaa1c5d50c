//! Glob path filter applied before authentication.

use glob::{MatchOptions, Pattern};

use crate::error::ProxyError;

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Blacklist and optional whitelist of path globs.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    whitelist: Vec<Pattern>,
    blacklist: Vec<Pattern>,
}

fn compile(kind: &str, patterns: &[String]) -> Result<Vec<Pattern>, ProxyError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| {
                ProxyError::Internal(format!("Invalid {} pattern '{}': {}", kind, p, e))
            })
        })
        .collect()
}

impl PathFilter {
    pub fn new(whitelist: &[String], blacklist: &[String]) -> Result<Self, ProxyError> {
        Ok(Self {
            whitelist: compile("whitelist", whitelist)?,
            blacklist: compile("blacklist", blacklist)?,
        })
    }

    /// Whether `path` may be proxied. A blacklist match always wins; a
    /// non-empty whitelist must match.
    pub fn allows(&self, path: &str) -> bool {
        if self.blacklist.iter().any(|p| p.matches_with(path, MATCH)) {
            return false;
        }
        self.whitelist.is_empty() || self.whitelist.iter().any(|p| p.matches_with(path, MATCH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_allows_all() {
        let filter = PathFilter::default();
        assert!(filter.allows("/me"));
        assert!(filter.allows("/admin/users"));
    }

    #[test]
    fn test_blacklist() {
        let filter = PathFilter::new(&[], &patterns(&["/admin/*"])).unwrap();
        assert!(!filter.allows("/admin/users"));
        assert!(!filter.allows("/admin/users/42"));
        assert!(filter.allows("/users"));
    }

    #[test]
    fn test_blacklist_beats_whitelist() {
        let filter =
            PathFilter::new(&patterns(&["/users*", "/me"]), &patterns(&["/users/*/secrets"]))
                .unwrap();
        assert!(filter.allows("/me"));
        assert!(filter.allows("/users/7"));
        assert!(!filter.allows("/users/7/secrets"));
        assert!(!filter.allows("/groups"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(PathFilter::new(&patterns(&["[abc"]), &[]).is_err());
    }
}
