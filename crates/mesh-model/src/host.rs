//! Hostname algebra for service matching.
//!
//! A [`Hostname`] is a DNS name that may carry a single leading `*.`
//! wildcard. Matching is longest-suffix: `*.example.com` covers both
//! `foo.example.com` and `example.com` itself. [`most_specific_host_match`]
//! selects a deterministic winner from a set of candidate hostnames
//! regardless of input order.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A possibly-wildcarded DNS hostname.
///
/// # Example
///
/// ```rust
/// use mesh_model::Hostname;
///
/// let wild = Hostname::new("*.example.com");
/// assert!(wild.matches(&Hostname::new("foo.example.com")));
/// assert!(wild.matches(&Hostname::new("example.com")));
/// assert!(!wild.matches(&Hostname::new("example.org")));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hostname(String);

impl Hostname {
    /// Create a hostname from a string.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    /// Get the hostname as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this hostname starts with the `*.` wildcard, or is the
    /// bare `*`.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0 == "*" || self.0.starts_with("*.")
    }

    /// The suffix a wildcard hostname covers. For literal hostnames this
    /// is the name itself.
    fn suffix(&self) -> &str {
        self.0.strip_prefix("*.").unwrap_or(&self.0)
    }

    /// Check whether this hostname covers `other`.
    ///
    /// A literal hostname matches only itself. A wildcard `*.x` matches
    /// any name ending in `.x`, and `x` itself. The bare `*` matches
    /// everything.
    #[must_use]
    pub fn matches(&self, other: &Hostname) -> bool {
        if self.0 == other.0 {
            return true;
        }
        if self.0 == "*" {
            return true;
        }
        if let Some(suffix) = self.0.strip_prefix("*.") {
            return other.0 == suffix || other.0.ends_with(&self.0[1..]);
        }
        false
    }

    /// Compare two hostnames by match specificity: literal names sort
    /// before wildcards, longer suffixes before shorter ones, and equal
    /// specificity falls back to lexicographic order so that sorting is
    /// total and stable across runs.
    #[must_use]
    pub fn cmp_specificity(&self, other: &Hostname) -> Ordering {
        match (self.is_wildcard(), other.is_wildcard()) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            _ => other
                .suffix()
                .len()
                .cmp(&self.suffix().len())
                .then_with(|| self.0.cmp(&other.0)),
        }
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Hostname {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Hostname {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Find the most specific hostname in `stack` that covers `needle`.
///
/// The stack is ordered by [`Hostname::cmp_specificity`] before scanning,
/// so the result does not depend on the order of `stack`. Returns `None`
/// if nothing matches.
#[must_use]
pub fn most_specific_host_match<'a>(
    needle: &Hostname,
    stack: &'a [Hostname],
) -> Option<&'a Hostname> {
    let mut sorted: Vec<&Hostname> = stack.iter().collect();
    sorted.sort_by(|a, b| a.cmp_specificity(b));
    sorted.into_iter().find(|h| h.matches(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        let h = Hostname::new("foo.example.com");
        assert!(h.matches(&Hostname::new("foo.example.com")));
        assert!(!h.matches(&Hostname::new("bar.example.com")));
    }

    #[test]
    fn wildcard_match_suffix_and_base() {
        let h = Hostname::new("*.example.com");
        assert!(h.matches(&Hostname::new("foo.example.com")));
        assert!(h.matches(&Hostname::new("a.b.example.com")));
        assert!(h.matches(&Hostname::new("example.com")));
        assert!(!h.matches(&Hostname::new("example.org")));
        assert!(!h.matches(&Hostname::new("fooexample.com")));
    }

    #[test]
    fn bare_wildcard_matches_all() {
        let h = Hostname::new("*");
        assert!(h.matches(&Hostname::new("anything.at.all")));
    }

    #[test]
    fn literal_does_not_match_wider() {
        // matching is not symmetric under wildcarding
        let literal = Hostname::new("foo.example.com");
        assert!(!literal.matches(&Hostname::new("*.example.com")));
    }

    #[test]
    fn most_specific_prefers_literal() {
        let stack = vec![
            Hostname::new("*.example.com"),
            Hostname::new("foo.example.com"),
        ];
        let found = most_specific_host_match(&Hostname::new("foo.example.com"), &stack);
        assert_eq!(found, Some(&Hostname::new("foo.example.com")));
    }

    #[test]
    fn most_specific_prefers_longer_suffix() {
        let stack = vec![Hostname::new("*.com"), Hostname::new("*.example.com")];
        let found = most_specific_host_match(&Hostname::new("foo.example.com"), &stack);
        assert_eq!(found, Some(&Hostname::new("*.example.com")));
    }

    #[test]
    fn most_specific_stable_under_reordering() {
        let a = Hostname::new("*.example.com");
        let b = Hostname::new("*.com");
        let c = Hostname::new("foo.example.com");
        let needle = Hostname::new("foo.example.com");

        let forward = vec![a.clone(), b.clone(), c.clone()];
        let reverse = vec![c, b, a];
        assert_eq!(
            most_specific_host_match(&needle, &forward),
            most_specific_host_match(&needle, &reverse),
        );
    }

    #[test]
    fn most_specific_no_match() {
        let stack = vec![Hostname::new("*.example.com")];
        assert!(most_specific_host_match(&Hostname::new("foo.org"), &stack).is_none());
    }
}
