//! Node equality used by the edit-distance search.

use crate::error::GedError;
use crate::label::{MatchKey, NodeLabel, segments};

/// Decides whether two nodes from different trees count as equal.
///
/// Split nodes are equal when they test the same feature, whatever the
/// threshold. Leaves are equal when they predict the same majority class.
/// A split never equals a leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeMatcher;

impl NodeMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// The part of `label` that matching reads. Two labels match exactly
    /// when their keys are equal, so the edit-distance search interns these
    /// once per tree instead of comparing labels pair by pair.
    #[must_use]
    pub fn key(&self, label: &NodeLabel) -> MatchKey {
        label.match_key()
    }

    /// Compare two decoded labels.
    #[must_use]
    pub fn matches(&self, a: &NodeLabel, b: &NodeLabel) -> bool {
        self.key(a) == self.key(b)
    }

    /// Compare two raw label texts.
    ///
    /// Labels with different segment counts are unequal without being
    /// decoded further.
    ///
    /// # Errors
    ///
    /// Returns [`GedError::LabelParse`] when both labels share a segment
    /// count other than 3 or 4, or either fails to decode.
    pub fn matches_text(&self, a: &str, b: &str) -> Result<bool, GedError> {
        if segments(a).len() != segments(b).len() {
            return Ok(false);
        }
        Ok(self.matches(&NodeLabel::parse(a)?, &NodeLabel::parse(b)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: [&str; 6] = [
        r"petal width <= 0.800\ngini = 0.665\nsamples = 105\nvalue = [33, 34, 38]",
        r"petal width <= 1.750\ngini = 0.500\nsamples = 72\nvalue = [0, 34, 38]",
        r"petal length <= 4.950\ngini = 0.500\nsamples = 72\nvalue = [0, 34, 38]",
        r"gini = 0.000\nsamples = 33\nvalue = [33, 0, 0]",
        r"gini = 0.100\nsamples = 20\nvalue = [19, 1, 0]",
        r"gini = 0.200\nsamples = 40\nvalue = [0, 4, 36]",
    ];

    #[test]
    fn splits_compare_feature_not_threshold() {
        let m = NodeMatcher::new();
        assert!(m.matches_text(LABELS[0], LABELS[1]).unwrap());
        assert!(!m.matches_text(LABELS[1], LABELS[2]).unwrap());
    }

    #[test]
    fn leaves_compare_majority_class() {
        let m = NodeMatcher::new();
        assert!(m.matches_text(LABELS[3], LABELS[4]).unwrap());
        assert!(!m.matches_text(LABELS[3], LABELS[5]).unwrap());
    }

    #[test]
    fn split_never_equals_leaf() {
        assert!(!NodeMatcher::new().matches_text(LABELS[0], LABELS[3]).unwrap());
    }

    #[test]
    fn matching_is_symmetric() {
        let m = NodeMatcher::new();
        for a in LABELS {
            for b in LABELS {
                assert_eq!(
                    m.matches_text(a, b).unwrap(),
                    m.matches_text(b, a).unwrap(),
                    "asymmetric on {a} / {b}"
                );
            }
        }
    }

    #[test]
    fn keys_are_equal_exactly_when_labels_match() {
        let m = NodeMatcher::new();
        let labels: Vec<NodeLabel> = LABELS.iter().map(|t| NodeLabel::parse(t).unwrap()).collect();
        for a in &labels {
            for b in &labels {
                assert_eq!(m.key(a) == m.key(b), m.matches(a, b));
            }
        }
        assert_eq!(m.key(&labels[0]), MatchKey::Feature("petal width".to_string()));
        assert_eq!(m.key(&labels[5]), MatchKey::Class(2));
    }

    #[test]
    fn unknown_shape_with_equal_counts_is_an_error() {
        let odd = r"a\nb";
        assert!(matches!(
            NodeMatcher::new().matches_text(odd, odd),
            Err(GedError::LabelParse { .. })
        ));
    }

    #[test]
    fn unknown_shape_with_different_counts_is_unequal() {
        assert!(!NodeMatcher::new().matches_text(r"a\nb", LABELS[3]).unwrap());
    }
}
