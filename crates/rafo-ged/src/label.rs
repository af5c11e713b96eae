//! Node label grammar.
//!
//! A node is rendered as `\n`-joined segments, where `\n` is the two-character
//! Graphviz line-break escape (a backslash followed by `n`), not a newline:
//!
//! ```text
//! split: <feature> <= <threshold>\n<criterion> = <impurity>\nsamples = <N>\nvalue = [c1, c2, ...]
//! leaf:  <criterion> = <impurity>\nsamples = <N>\nvalue = [c1, c2, ...]
//! ```
//!
//! Decoding splits on the backslash, so a split label has 4 segments and a
//! leaf label has 3. Any other count is rejected. This grammar is version
//! [`LABEL_GRAMMAR_VERSION`]; any change to it must bump the version.

use std::fmt::Write as _;

use crate::error::GedError;

/// Version of the label grammar accepted by [`NodeLabel::parse`].
pub const LABEL_GRAMMAR_VERSION: u32 = 1;

/// Segment separator in rendered labels.
pub(crate) const SEGMENT_BREAK: &str = "\\n";

/// Impurity and class histogram shared by split and leaf labels.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStats {
    /// Criterion name, e.g. `gini`.
    pub criterion: String,
    pub impurity: f64,
    pub samples: usize,
    /// Per-class sample counts.
    pub value: Vec<f64>,
}

impl NodeStats {
    /// Index of the largest class count; the first one wins on ties.
    #[must_use]
    pub fn majority_class(&self) -> usize {
        let mut best = 0;
        for (i, v) in self.value.iter().enumerate() {
            if *v > self.value[best] {
                best = i;
            }
        }
        best
    }
}

/// Decoded node label.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeLabel {
    Split {
        feature: String,
        threshold: f64,
        stats: NodeStats,
    },
    Leaf {
        stats: NodeStats,
    },
}

/// The part of a label that node equality looks at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchKey {
    /// Split nodes compare by feature name only; thresholds are ignored.
    Feature(String),
    /// Leaves compare by majority class.
    Class(usize),
}

impl NodeLabel {
    #[must_use]
    pub fn stats(&self) -> &NodeStats {
        match self {
            NodeLabel::Split { stats, .. } | NodeLabel::Leaf { stats } => stats,
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeLabel::Leaf { .. })
    }

    #[must_use]
    pub fn match_key(&self) -> MatchKey {
        match self {
            NodeLabel::Split { feature, .. } => MatchKey::Feature(feature.clone()),
            NodeLabel::Leaf { stats } => MatchKey::Class(stats.majority_class()),
        }
    }

    /// Render the label text. Thresholds and impurities are printed with
    /// three decimals, class counts as integers when they are whole.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let NodeLabel::Split {
            feature, threshold, ..
        } = self
        {
            let _ = write!(out, "{feature} <= {threshold:.3}{SEGMENT_BREAK}");
        }
        let stats = self.stats();
        let value = stats
            .value
            .iter()
            .map(|v| {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    format!("{}", *v as i64)
                } else {
                    format!("{v:.3}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(
            out,
            "{} = {:.3}{SEGMENT_BREAK}samples = {}{SEGMENT_BREAK}value = [{value}]",
            stats.criterion, stats.impurity, stats.samples
        );
        out
    }

    /// Decode label text.
    ///
    /// # Errors
    ///
    /// Returns [`GedError::LabelParse`] when the segment count is neither
    /// 3 nor 4, or a segment does not have the expected `name = value` or
    /// `feature <= threshold` shape.
    pub fn parse(text: &str) -> Result<Self, GedError> {
        let segments = segments(text);
        match segments.as_slice() {
            [test, impurity, samples, value] => {
                let (feature, threshold) = test
                    .rsplit_once(" <= ")
                    .ok_or_else(|| parse_error(text, "split segment lacks ` <= `"))?;
                let threshold = threshold
                    .trim()
                    .parse()
                    .map_err(|_| parse_error(text, "threshold is not a number"))?;
                Ok(NodeLabel::Split {
                    feature: feature.to_string(),
                    threshold,
                    stats: parse_stats(text, impurity, samples, value)?,
                })
            }
            [impurity, samples, value] => Ok(NodeLabel::Leaf {
                stats: parse_stats(text, impurity, samples, value)?,
            }),
            other => Err(parse_error(
                text,
                &format!("expected 3 or 4 segments, found {}", other.len()),
            )),
        }
    }
}

/// Split label text on the backslash, dropping the `n` that the
/// line-break escape leaves at the start of every following segment.
pub(crate) fn segments(text: &str) -> Vec<&str> {
    let mut parts = text.split('\\');
    let mut out: Vec<&str> = parts.next().into_iter().collect();
    out.extend(parts.map(|s| s.strip_prefix('n').unwrap_or(s)));
    out
}

fn parse_stats(
    text: &str,
    impurity: &str,
    samples: &str,
    value: &str,
) -> Result<NodeStats, GedError> {
    let (criterion, impurity) = assignment(text, impurity)?;
    let impurity = impurity
        .parse()
        .map_err(|_| parse_error(text, "impurity is not a number"))?;

    let (name, samples) = assignment(text, samples)?;
    if name != "samples" {
        return Err(parse_error(text, "missing `samples` segment"));
    }
    let samples = samples
        .parse()
        .map_err(|_| parse_error(text, "sample count is not an integer"))?;

    let (name, list) = assignment(text, value)?;
    if name != "value" {
        return Err(parse_error(text, "missing `value` segment"));
    }
    let inner = list
        .strip_prefix('[')
        .and_then(|l| l.strip_suffix(']'))
        .ok_or_else(|| parse_error(text, "value is not a bracketed list"))?;
    let value = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|_| parse_error(text, "value entry is not a number")))
        .collect::<Result<Vec<_>, _>>()?;
    if value.is_empty() {
        return Err(parse_error(text, "value list is empty"));
    }

    Ok(NodeStats {
        criterion: criterion.to_string(),
        impurity,
        samples,
        value,
    })
}

fn assignment<'a>(text: &str, segment: &'a str) -> Result<(&'a str, &'a str), GedError> {
    segment
        .split_once(" = ")
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| parse_error(text, &format!("segment {segment:?} is not `name = value`")))
}

fn parse_error(text: &str, reason: &str) -> GedError {
    GedError::LabelParse {
        label: text.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPLIT: &str =
        r"petal width (cm) <= 0.800\ngini = 0.665\nsamples = 105\nvalue = [33, 34, 38]";
    const LEAF: &str = r"gini = 0.000\nsamples = 33\nvalue = [33, 0, 0]";

    #[test]
    fn parses_split_label() {
        let label = NodeLabel::parse(SPLIT).unwrap();
        let NodeLabel::Split {
            feature,
            threshold,
            stats,
        } = &label
        else {
            panic!("expected a split, got {label:?}");
        };
        assert_eq!(feature, "petal width (cm)");
        assert_eq!(*threshold, 0.8);
        assert_eq!(stats.criterion, "gini");
        assert_eq!(stats.samples, 105);
        assert_eq!(stats.value, vec![33.0, 34.0, 38.0]);
    }

    #[test]
    fn parses_leaf_label() {
        let label = NodeLabel::parse(LEAF).unwrap();
        assert!(label.is_leaf());
        assert_eq!(label.stats().samples, 33);
        assert_eq!(label.match_key(), MatchKey::Class(0));
    }

    #[test]
    fn render_reproduces_text() {
        assert_eq!(NodeLabel::parse(SPLIT).unwrap().render(), SPLIT);
        assert_eq!(NodeLabel::parse(LEAF).unwrap().render(), LEAF);
    }

    #[test]
    fn segment_count_is_checked() {
        let err = NodeLabel::parse(r"samples = 3\nvalue = [3]").unwrap_err();
        assert!(matches!(err, GedError::LabelParse { .. }), "two segments must fail");
        let err =
            NodeLabel::parse(r"a <= 1\ngini = 0\nx = 1\nsamples = 3\nvalue = [3]").unwrap_err();
        assert!(matches!(err, GedError::LabelParse { .. }), "five segments must fail");
    }

    #[test]
    fn malformed_segments_fail() {
        for bad in [
            r"petal 0.8\ngini = 0.5\nsamples = 4\nvalue = [2, 2]",
            r"gini = 0.5\nsamples = four\nvalue = [2, 2]",
            r"gini = 0.5\nsamples = 4\nvalue = 2, 2",
            r"gini = 0.5\nsamples = 4\nvalue = []",
            r"gini = 0.5\ncount = 4\nvalue = [2, 2]",
        ] {
            assert!(NodeLabel::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn majority_class_takes_first_maximum() {
        let label = NodeLabel::parse(r"gini = 0.5\nsamples = 4\nvalue = [1, 3, 3]").unwrap();
        assert_eq!(label.match_key(), MatchKey::Class(1));
    }

    #[test]
    fn fractional_values_survive() {
        let label =
            NodeLabel::parse(r"entropy = 1.000\nsamples = 2\nvalue = [0.500, 0.500]").unwrap();
        assert_eq!(label.stats().value, vec![0.5, 0.5]);
        assert_eq!(label.render(), r"entropy = 1.000\nsamples = 2\nvalue = [0.500, 0.500]");
    }
}
