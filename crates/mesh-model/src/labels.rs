//! Workload label sets and the subset tests used by routing predicates.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A set of workload labels.
///
/// Backed by a `BTreeMap` so iteration order, and therefore any derived
/// output, is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Create an empty label set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label, returning self for chaining in tests and builders.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no labels are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get a label value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Pointwise inclusion: every key/value pair of `self` is present in
    /// `other`. The empty set is a subset of everything.
    #[must_use]
    pub fn subset_of(&self, other: &Labels) -> bool {
        self.0
            .iter()
            .all(|(k, v)| other.0.get(k).is_some_and(|ov| ov == v))
    }

    /// Exact equality of the two label maps.
    #[must_use]
    pub fn equals(&self, other: &Labels) -> bool {
        self.0 == other.0
    }

    /// Iterate over key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Labels {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A collection of label sets, one per workload instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelsCollection(Vec<Labels>);

impl LabelsCollection {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label set to the collection.
    pub fn push(&mut self, labels: Labels) {
        self.0.push(labels);
    }

    /// True if the collection has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True iff some member of the collection contains every key/value of
    /// `selector`. An empty collection is a superset only of the empty
    /// selector.
    #[must_use]
    pub fn is_superset_of(&self, selector: &Labels) -> bool {
        if self.0.is_empty() {
            return selector.is_empty();
        }
        self.0.iter().any(|member| selector.subset_of(member))
    }

    /// True iff some member of the collection is a subset of `labels`.
    /// This is the instance-side test: a workload satisfies a selector
    /// collection when one selector's labels are all present on it.
    #[must_use]
    pub fn has_subset_of(&self, labels: &Labels) -> bool {
        self.0.iter().any(|member| member.subset_of(labels))
    }

    /// Iterate over the member label sets.
    pub fn iter(&self) -> impl Iterator<Item = &Labels> {
        self.0.iter()
    }
}

impl From<Vec<Labels>> for LabelsCollection {
    fn from(v: Vec<Labels>) -> Self {
        Self(v)
    }
}

impl FromIterator<Labels> for LabelsCollection {
    fn from_iter<I: IntoIterator<Item = Labels>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_subset_of_anything() {
        let empty = Labels::new();
        let some = Labels::new().with("app", "reviews");
        assert!(empty.subset_of(&some));
        assert!(empty.subset_of(&empty));
        assert!(!some.subset_of(&empty));
    }

    #[test]
    fn subset_requires_matching_values() {
        let selector = Labels::new().with("version", "v1");
        let workload = Labels::new().with("app", "reviews").with("version", "v1");
        let other = Labels::new().with("app", "reviews").with("version", "v2");
        assert!(selector.subset_of(&workload));
        assert!(!selector.subset_of(&other));
    }

    #[test]
    fn collection_superset() {
        let collection: LabelsCollection = vec![
            Labels::new().with("app", "reviews").with("version", "v1"),
            Labels::new().with("app", "ratings"),
        ]
        .into();

        assert!(collection.is_superset_of(&Labels::new().with("app", "ratings")));
        assert!(collection.is_superset_of(&Labels::new().with("version", "v1")));
        assert!(!collection.is_superset_of(&Labels::new().with("version", "v3")));
    }

    #[test]
    fn empty_collection_superset_of_empty_only() {
        let empty = LabelsCollection::new();
        assert!(empty.is_superset_of(&Labels::new()));
        assert!(!empty.is_superset_of(&Labels::new().with("app", "x")));
    }

    #[test]
    fn has_subset_matches_instances_with_extra_labels() {
        let selectors: LabelsCollection = vec![Labels::new().with("version", "v1")].into();
        let instance = Labels::new()
            .with("app", "reviews")
            .with("version", "v1")
            .with("pod", "reviews-v1-abc");

        assert!(selectors.has_subset_of(&instance));
        assert!(!selectors.has_subset_of(&Labels::new().with("version", "v2")));
    }
}
