//! Path predicates selecting which routes a guard governs.

use std::fmt;

/// A test applied to a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePredicate {
    /// Matches the path itself and anything below it on a segment boundary.
    ///
    /// `/bebidas` matches `/bebidas`, `/bebidas/` and `/bebidas/3`, but not
    /// `/bebidasx`. The prefix `/` matches every path.
    Prefix(String),
    /// Matches one path exactly.
    Exact(String),
}

impl RoutePredicate {
    /// Creates a prefix predicate, dropping any trailing slash.
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            Self::Prefix("/".to_string())
        } else {
            Self::Prefix(trimmed.to_string())
        }
    }

    /// Creates an exact-match predicate.
    #[must_use]
    pub fn exact(path: impl Into<String>) -> Self {
        Self::Exact(path.into())
    }

    /// Returns `true` if `path` satisfies this predicate.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::Prefix(prefix) if prefix == "/" => path.starts_with('/'),
            Self::Prefix(prefix) => path
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/')),
        }
    }
}

impl fmt::Display for RoutePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(prefix) => write!(f, "{prefix}/**"),
            Self::Exact(path) => f.write_str(path),
        }
    }
}

/// A set of predicates; a path is governed if any predicate matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSet {
    predicates: Vec<RoutePredicate>,
}

impl RouteSet {
    /// Creates a set from explicit predicates.
    #[must_use]
    pub fn new(predicates: Vec<RoutePredicate>) -> Self {
        Self { predicates }
    }

    /// Creates a set of prefix predicates.
    #[must_use]
    pub fn prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(prefixes.into_iter().map(RoutePredicate::prefix).collect())
    }

    /// Returns `true` if any predicate matches `path`.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.predicates.iter().any(|p| p.matches(path))
    }

    /// Returns the predicates in this set.
    #[must_use]
    pub fn predicates(&self) -> &[RoutePredicate] {
        &self.predicates
    }

    /// Returns `true` if the set governs nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}
