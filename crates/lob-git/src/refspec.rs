//! Refspec parsing: single refs, `..` ranges, and `...` symmetric
//! differences.

use std::fmt;

/// The range operator joining two refs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// `..`: commits reachable from the second ref but not the first.
    Range,
    /// `...`: symmetric difference.
    SymmetricDiff,
}

impl RangeOp {
    fn as_str(self) -> &'static str {
        match self {
            RangeOp::Range => "..",
            RangeOp::SymmetricDiff => "...",
        }
    }
}

/// A parsed refspec: either a single ref or a two-ref range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    /// First (or only) ref.
    pub ref1: String,
    /// Range operator, when present.
    pub op: Option<RangeOp>,
    /// Second ref of a range.
    pub ref2: Option<String>,
}

impl RefSpec {
    /// Parse a refspec. The first occurrence of `...` wins over `..`;
    /// input without either operator is a single ref.
    pub fn parse(s: &str) -> Self {
        if let Some(idx) = s.find("...") {
            return Self {
                ref1: s[..idx].to_string(),
                op: Some(RangeOp::SymmetricDiff),
                ref2: Some(s[idx + 3..].to_string()),
            };
        }
        if let Some(idx) = s.find("..") {
            return Self {
                ref1: s[..idx].to_string(),
                op: Some(RangeOp::Range),
                ref2: Some(s[idx + 2..].to_string()),
            };
        }
        Self {
            ref1: s.to_string(),
            op: None,
            ref2: None,
        }
    }

    /// Whether this refspec names a range with both ends present.
    pub fn is_range(&self) -> bool {
        self.op.is_some()
            && !self.ref1.is_empty()
            && self.ref2.as_deref().is_some_and(|r| !r.is_empty())
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.op, self.ref2.as_deref()) {
            (Some(op), Some(ref2)) => write!(f, "{}{}{}", self.ref1, op.as_str(), ref2),
            _ => write!(f, "{}", self.ref1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_ref() {
        let r = RefSpec::parse("master");
        assert_eq!(
            r,
            RefSpec {
                ref1: "master".to_string(),
                op: None,
                ref2: None
            }
        );
        assert!(!r.is_range());

        let r = RefSpec::parse("79a32558d986e35c080dd3000fb4c7608b67fb46");
        assert_eq!(r.ref1, "79a32558d986e35c080dd3000fb4c7608b67fb46");
        assert_eq!(r.op, None);
    }

    #[test]
    fn test_parse_double_dot_range() {
        let r = RefSpec::parse("feature1..master");
        assert_eq!(r.ref1, "feature1");
        assert_eq!(r.op, Some(RangeOp::Range));
        assert_eq!(r.ref2.as_deref(), Some("master"));
        assert!(r.is_range());

        let r = RefSpec::parse("0de56..HEAD^1");
        assert_eq!(r.ref1, "0de56");
        assert_eq!(r.ref2.as_deref(), Some("HEAD^1"));

        let r = RefSpec::parse(
            "40940fde248a07aadf414500db594107f7d5499d..e84486d69ef5c960c5ed4b0912da919a6d2d74d8",
        );
        assert_eq!(r.ref1, "40940fde248a07aadf414500db594107f7d5499d");
        assert_eq!(r.op, Some(RangeOp::Range));
    }

    #[test]
    fn test_parse_triple_dot_range() {
        let r = RefSpec::parse("feature1...master");
        assert_eq!(r.ref1, "feature1");
        assert_eq!(r.op, Some(RangeOp::SymmetricDiff));
        assert_eq!(r.ref2.as_deref(), Some("master"));
        assert!(r.is_range());
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["master", "feature1..master", "feature1...master"] {
            assert_eq!(RefSpec::parse(s).to_string(), s);
        }
    }
}
