//! Segment matching: which customers a newsletter targets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The attributes of a customer that segment filters look at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentKey {
    pub operator_code: String,
    pub tag: String,
}

impl SegmentKey {
    pub fn new(operator_code: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            operator_code: operator_code.into(),
            tag: tag.into(),
        }
    }
}

/// A newsletter's targeting filter. Both sets must contain the customer's
/// value for the customer to match; an empty set matches nobody.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFilter {
    pub operator_codes: BTreeSet<String>,
    pub tags: BTreeSet<String>,
}

/// True iff the customer's operator code and tag are both in the filter.
pub fn matches(key: &SegmentKey, filter: &SegmentFilter) -> bool {
    filter.operator_codes.contains(&key.operator_code) && filter.tags.contains(&key.tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(codes: &[&str], tags: &[&str]) -> SegmentFilter {
        SegmentFilter {
            operator_codes: codes.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn both_attributes_must_match() {
        let f = filter(&["990", "991"], &["gamer"]);
        assert!(matches(&SegmentKey::new("990", "gamer"), &f));
        assert!(matches(&SegmentKey::new("991", "gamer"), &f));
        assert!(!matches(&SegmentKey::new("992", "gamer"), &f));
        assert!(!matches(&SegmentKey::new("990", "programmer"), &f));
    }

    #[test]
    fn empty_filter_matches_nobody() {
        let f = SegmentFilter::default();
        assert!(!matches(&SegmentKey::new("990", "gamer"), &f));

        let only_codes = filter(&["990"], &[]);
        assert!(!matches(&SegmentKey::new("990", "gamer"), &only_codes));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let f = filter(&["990"], &["gamer"]);
        assert!(!matches(&SegmentKey::new("990", "Gamer"), &f));
    }
}
