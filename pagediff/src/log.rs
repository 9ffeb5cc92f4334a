//! Bounded, typed collector of differences.

use crate::{debug, trace};
use crate::style::StyleDiff;
use facet::Facet;
use indextree::NodeId;

/// Default cap on recorded differences.
pub const DEFAULT_MAX_DIFFERENCES: usize = 25;

/// What kind of difference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Facet)]
#[repr(u8)]
pub enum DifferenceKind {
    /// Same element, different tag name
    Tag,
    /// Same element, different attributes
    Attr,
    /// Element only present in A
    Removed,
    /// Element only present in B
    Added,
    /// Same element, different text
    Text,
    /// Element relocated
    Moved,
    /// Significant whitespace changed
    Space,
    /// Resolved style changed
    Style,
}

impl DifferenceKind {
    /// Every kind, in report order.
    pub const ALL: [DifferenceKind; 8] = [
        DifferenceKind::Tag,
        DifferenceKind::Attr,
        DifferenceKind::Removed,
        DifferenceKind::Added,
        DifferenceKind::Text,
        DifferenceKind::Moved,
        DifferenceKind::Space,
        DifferenceKind::Style,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DifferenceKind::Tag => "tag",
            DifferenceKind::Attr => "attr",
            DifferenceKind::Removed => "removed",
            DifferenceKind::Added => "added",
            DifferenceKind::Text => "text",
            DifferenceKind::Moved => "moved",
            DifferenceKind::Space => "space",
            DifferenceKind::Style => "style",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for DifferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A style difference and how many element pairs share it.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct StyleChange {
    /// Tag signature of the first A element showing this change
    pub tag_signature: String,
    pub diff: StyleDiff,
    /// Number of element pairs with this exact change
    pub affected: usize,
}

/// One reported difference. Nodes are identified by arena index.
#[derive(Debug, Clone, PartialEq)]
pub struct Difference {
    pub kind: DifferenceKind,
    pub a: Option<NodeId>,
    pub b: Option<NodeId>,
    /// Only set for [`DifferenceKind::Style`]
    pub style: Option<StyleChange>,
}

/// The difference cap was reached. Not an error: the log keeps what it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitReached;

impl std::fmt::Display for LimitReached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("max number of differences reached")
    }
}

/// Differences grouped by kind, with a running total and a cap.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceLog {
    by_kind: [Vec<Difference>; 8],
    total: usize,
    cap: usize,
    stopped_at_max: bool,
}

impl Default for DifferenceLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIFFERENCES)
    }
}

impl DifferenceLog {
    /// A log holding at most `cap` differences (at least one).
    pub fn new(cap: usize) -> Self {
        DifferenceLog {
            by_kind: Default::default(),
            total: 0,
            cap: cap.max(1),
            stopped_at_max: false,
        }
    }

    /// Record a difference. Returns `Err(LimitReached)` once the cap is hit.
    pub fn record(
        &mut self,
        kind: DifferenceKind,
        a: Option<NodeId>,
        b: Option<NodeId>,
    ) -> Result<(), LimitReached> {
        self.push(Difference {
            kind,
            a,
            b,
            style: None,
        })
    }

    /// Record a new style difference with an affected count of one.
    pub fn record_style(
        &mut self,
        a: NodeId,
        b: NodeId,
        tag_signature: String,
        diff: StyleDiff,
    ) -> Result<(), LimitReached> {
        self.push(Difference {
            kind: DifferenceKind::Style,
            a: Some(a),
            b: Some(b),
            style: Some(StyleChange {
                tag_signature,
                diff,
                affected: 1,
            }),
        })
    }

    fn push(&mut self, difference: Difference) -> Result<(), LimitReached> {
        if self.stopped_at_max {
            return Err(LimitReached);
        }

        trace!(kind = %difference.kind, a = ?difference.a, b = ?difference.b, "difference");
        self.by_kind[difference.kind as usize].push(difference);
        self.total += 1;

        if self.total >= self.cap {
            debug!(cap = self.cap, "difference cap reached");
            self.stopped_at_max = true;
            return Err(LimitReached);
        }
        Ok(())
    }

    /// A previously recorded style change with the same tag signature and payload.
    pub fn find_style_mut(&mut self, tag_signature: &str, diff: &StyleDiff) -> Option<&mut StyleChange> {
        self.by_kind[DifferenceKind::Style as usize]
            .iter_mut()
            .filter_map(|d| d.style.as_mut())
            .find(|s| s.tag_signature == tag_signature && &s.diff == diff)
    }

    pub fn of_kind(&self, kind: DifferenceKind) -> &[Difference] {
        &self.by_kind[kind as usize]
    }

    pub fn count(&self, kind: DifferenceKind) -> usize {
        self.by_kind[kind as usize].len()
    }

    /// All differences, grouped in [`DifferenceKind::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = &Difference> {
        self.by_kind.iter().flatten()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn stopped_at_max(&self) -> bool {
        self.stopped_at_max
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    #[test]
    fn records_by_kind_in_order() {
        let mut doc = Document::new("body");
        let x = doc.append_element(doc.root, "x", []);
        let y = doc.append_element(doc.root, "y", []);

        let mut log = DifferenceLog::new(10);
        log.record(DifferenceKind::Moved, Some(x), Some(y)).expect("under cap");
        log.record(DifferenceKind::Removed, Some(y), None).expect("under cap");
        log.record(DifferenceKind::Moved, Some(y), Some(x)).expect("under cap");

        assert_eq!(log.total(), 3);
        assert_eq!(log.count(DifferenceKind::Moved), 2);
        assert_eq!(log.of_kind(DifferenceKind::Moved)[0].a, Some(x));
        let kinds: Vec<_> = log.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            [DifferenceKind::Removed, DifferenceKind::Moved, DifferenceKind::Moved]
        );
    }

    #[test]
    fn cap_sets_stopped_flag() {
        let mut log = DifferenceLog::new(2);
        assert_eq!(log.record(DifferenceKind::Added, None, None), Ok(()));
        assert_eq!(log.record(DifferenceKind::Added, None, None), Err(LimitReached));
        assert!(log.stopped_at_max());

        assert_eq!(log.record(DifferenceKind::Added, None, None), Err(LimitReached));
        assert_eq!(log.total(), 2);
    }

    #[test]
    fn cap_is_at_least_one() {
        let mut log = DifferenceLog::new(0);
        assert_eq!(log.record(DifferenceKind::Text, None, None), Err(LimitReached));
        assert_eq!(log.total(), 1);
    }

    #[test]
    fn kind_names_roundtrip() {
        for kind in DifferenceKind::ALL {
            assert_eq!(DifferenceKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(DifferenceKind::from_name("bogus"), None);
    }
}
