//! Relocation detection.
//!
//! One lock-step pass over both element lists. Where the signature keys at the
//! two cursors disagree, each key is parked in a "seen on the other side" map;
//! when a parked key later turns up on the opposite side, the element has moved.
//!
//! Greedy and single-pass: several elements swapping places at once can be
//! over-reported.

use crate::{debug, trace};
use crate::log::{DifferenceKind, DifferenceLog, LimitReached};
use crate::matching::{TreeIndex, Trees};
use indextree::NodeId;
use rapidhash::RapidHashMap as HashMap;

/// Movement pass settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveDetection {
    /// Suppress a move when the elements following both ends of it agree,
    /// i.e. the lists have realigned and only a neighbour was displaced.
    pub follow_check: bool,
}

impl Default for MoveDetection {
    fn default() -> Self {
        MoveDetection { follow_check: true }
    }
}

/// A key seen on one side, waiting for the other.
#[derive(Debug, Clone, Copy)]
struct Pending {
    position: usize,
    node: NodeId,
}

fn key_at(index: &TreeIndex, position: usize) -> Option<usize> {
    index.at(position).map(|e| e.key)
}

fn current(index: &TreeIndex, position: usize) -> Option<(NodeId, usize)> {
    index.at(position).map(|e| (e.node, e.key))
}

/// Report elements that appear at a different place in B than in A.
///
/// Elements already reported removed or added are skipped.
pub fn detect_moves(
    trees: &mut Trees,
    settings: MoveDetection,
    log: &mut DifferenceLog,
) -> Result<(), LimitReached> {
    // Keys seen in B, waiting for A
    let mut missing_a: HashMap<usize, Pending> = HashMap::default();
    // Keys seen in A, waiting for B
    let mut missing_b: HashMap<usize, Pending> = HashMap::default();
    let (mut ia, mut ib) = (0usize, 0usize);

    loop {
        let cur_a = current(&trees.a, ia);
        let cur_b = current(&trees.b, ib);

        match (cur_a, cur_b) {
            (None, None) => break,
            (Some((_, ka)), Some((_, kb))) if ka == kb => {
                ia += 1;
                ib += 1;
                continue;
            }
            _ => {}
        }

        if let Some((na, _)) = cur_a
            && trees.a.is_dropped(na)
        {
            ia += 1;
            continue;
        }
        if let Some((nb, _)) = cur_b
            && trees.b.is_dropped(nb)
        {
            ib += 1;
            continue;
        }

        let seen_a = cur_a.filter(|(_, k)| missing_a.contains_key(k));
        let seen_b = cur_b.filter(|(_, k)| missing_b.contains_key(k));

        if seen_a.is_none() && seen_b.is_none() {
            match (cur_a, cur_b) {
                (Some((na, ka)), Some((nb, kb))) => {
                    missing_a.entry(kb).or_insert(Pending {
                        position: ib,
                        node: nb,
                    });
                    missing_b.entry(ka).or_insert(Pending {
                        position: ia,
                        node: na,
                    });
                    ia += 1;
                    ib += 1;
                }
                (Some(_), None) => ia += 1,
                (None, Some(_)) => ib += 1,
                (None, None) => break,
            }
            continue;
        }

        if let Some((na, ka)) = seen_a
            && let Some(pending) = missing_a.remove(&ka)
        {
            let realigned = settings.follow_check
                && key_at(&trees.a, ia + 1) == key_at(&trees.b, pending.position + 1);
            if realigned {
                trace!(?na, "displacement resolved by following element");
            } else {
                trees.a.mark(na, DifferenceKind::Moved);
                trees.b.mark(pending.node, DifferenceKind::Moved);
                log.record(DifferenceKind::Moved, Some(na), Some(pending.node))?;
            }
            ia += 1;
        }

        if let Some((nb, kb)) = seen_b
            && let Some(pending) = missing_b.remove(&kb)
        {
            let realigned = settings.follow_check
                && key_at(&trees.a, pending.position + 1) == key_at(&trees.b, ib + 1);
            if realigned {
                trace!(?nb, "displacement resolved by following element");
            } else {
                trees.a.mark(pending.node, DifferenceKind::Moved);
                trees.b.mark(nb, DifferenceKind::Moved);
                log.record(DifferenceKind::Moved, Some(pending.node), Some(nb))?;
            }
            ib += 1;
        }
    }

    debug!(moves = log.count(DifferenceKind::Moved), "movement pass done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Document, parse};
    use crate::exclusion::ExclusionRules;
    use crate::matching::MismatchReporting;

    fn run(a: &str, b: &str, settings: MoveDetection) -> (Document, Document, DifferenceLog) {
        let doc_a = parse(a);
        let doc_b = parse(b);
        let rules = ExclusionRules::default();
        let mut trees = Trees::build(
            &doc_a,
            doc_a.body().expect("body"),
            &doc_b,
            doc_b.body().expect("body"),
            &rules,
        );
        let mut log = DifferenceLog::default();
        trees
            .resolve_imbalances(&doc_a, &doc_b, &rules, MismatchReporting::Dominant, &mut log)
            .expect("under cap");
        detect_moves(&mut trees, settings, &mut log).expect("under cap");
        (doc_a, doc_b, log)
    }

    #[test]
    fn swap_reports_both_elements() {
        let (doc_a, doc_b, log) = run(
            "<html><body><div><span>x</span><em>y</em></div></body></html>",
            "<html><body><div><em>y</em><span>x</span></div></body></html>",
            MoveDetection::default(),
        );

        assert_eq!(log.total(), 2);
        let mut moved: Vec<(&str, &str)> = log
            .of_kind(DifferenceKind::Moved)
            .iter()
            .map(|d| {
                (
                    d.a.and_then(|n| doc_a.tag(n)).unwrap_or_default(),
                    d.b.and_then(|n| doc_b.tag(n)).unwrap_or_default(),
                )
            })
            .collect();
        moved.sort_unstable();
        assert_eq!(moved, [("em", "em"), ("span", "span")]);
    }

    #[test]
    fn single_relocation_reports_one_move() {
        let (doc_a, _, log) = run(
            "<html><body><p>a</p><p>b</p><p>c</p><p>d</p></body></html>",
            "<html><body><p>b</p><p>c</p><p>d</p><p>a</p></body></html>",
            MoveDetection::default(),
        );

        assert_eq!(log.total(), 1);
        let moved = &log.of_kind(DifferenceKind::Moved)[0];
        let a = moved.a.expect("a side");
        let text = doc_a.children(a).next().and_then(|t| doc_a.text(t));
        assert_eq!(text, Some("a"));
    }

    #[test]
    fn without_follow_check_displaced_neighbours_are_reported() {
        let (_, _, log) = run(
            "<html><body><p>a</p><p>b</p><p>c</p><p>d</p></body></html>",
            "<html><body><p>b</p><p>c</p><p>d</p><p>a</p></body></html>",
            MoveDetection {
                follow_check: false,
            },
        );
        assert!(log.count(DifferenceKind::Moved) > 1);
    }

    #[test]
    fn added_elements_are_not_moves() {
        let (_, _, log) = run(
            "<html><body><p>a</p><p>b</p></body></html>",
            "<html><body><em>new</em><p>a</p><p>b</p></body></html>",
            MoveDetection::default(),
        );
        assert_eq!(log.count(DifferenceKind::Added), 1);
        assert_eq!(log.count(DifferenceKind::Moved), 0);
    }
}
