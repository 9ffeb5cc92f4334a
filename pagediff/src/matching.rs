//! Signature map construction and imbalance resolution.
//!
//! Every element of both trees is indexed under its signature. Signatures that occur
//! equally often on both sides are assumed to pair up. The rest are "imbalanced":
//! each imbalanced A element looks for a B element that agrees on at least two of
//! tag, attributes and text. A non-identical match is reported as a tag, attribute
//! or text change and the B element takes over the A element's signature so later
//! passes treat the pair as one logical element. Leftovers become removals and
//! additions.
//!
//! This is a heuristic. It does not compute a minimal edit script.

use crate::{debug, trace};
use crate::dom::Document;
use crate::exclusion::ExclusionRules;
use crate::log::{DifferenceKind, DifferenceLog, LimitReached};
use crate::signature::{Signature, Similarity};
use crate::traversal::{NodeFilter, SubtreeFilter, Walker};
use indexmap::IndexMap;
use indextree::NodeId;
use rapidhash::RapidHashMap as HashMap;

/// Which document a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

/// How a matched pair with differing aspects is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MismatchReporting {
    /// One difference per pair: tag over attr over text
    #[default]
    Dominant,
    /// One difference per differing aspect
    EachAspect,
}

/// Nodes sharing one signature, per side.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    pub a: Vec<NodeId>,
    pub b: Vec<NodeId>,
}

/// Signature text to the nodes carrying it. A signature's key is its position.
#[derive(Debug, Clone, Default)]
pub struct SignatureMap {
    buckets: IndexMap<String, Bucket>,
}

impl SignatureMap {
    /// Add a node under a signature, returning the signature's key.
    pub fn insert(&mut self, signature: &str, side: Side, node: NodeId) -> usize {
        let entry = self.buckets.entry(signature.to_owned());
        let key = entry.index();
        let bucket = entry.or_default();
        match side {
            Side::A => bucket.a.push(node),
            Side::B => bucket.b.push(node),
        }
        key
    }

    /// Buckets whose A and B counts differ.
    pub fn imbalanced(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values().filter(|b| b.a.len() != b.b.len())
    }
}

/// Engine-private annotations of one indexed element.
#[derive(Debug, Clone)]
pub struct Entry {
    pub node: NodeId,
    /// Signature as computed from the node
    pub signature: Signature,
    /// Current signature key; for matched B nodes this is the A node's key
    pub key: usize,
    /// Last difference recorded against the node
    pub difference: Option<DifferenceKind>,
}

/// Elements of one tree in traversal order, with their annotations.
#[derive(Debug, Clone, Default)]
pub struct TreeIndex {
    entries: Vec<Entry>,
    positions: HashMap<NodeId, usize>,
}

impl TreeIndex {
    /// Index `root` and every element below it that `filter` keeps.
    pub fn build<F>(doc: &Document, root: NodeId, filter: &F, side: Side, map: &mut SignatureMap) -> Self
    where
        F: SubtreeFilter + ?Sized,
    {
        let mut index = TreeIndex::default();
        let nodes = std::iter::once(root).chain(Walker::new(doc, root, NodeFilter::Elements, filter));

        for node in nodes {
            let signature = Signature::compute(doc, node);
            let key = map.insert(&signature.full, side, node);
            index.positions.insert(node, index.entries.len());
            index.entries.push(Entry {
                node,
                signature,
                key,
                difference: None,
            });
        }

        debug!(?side, elements = index.entries.len(), "indexed tree");
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn at(&self, position: usize) -> Option<&Entry> {
        self.entries.get(position)
    }

    pub fn get(&self, node: NodeId) -> Option<&Entry> {
        self.position(node).and_then(|p| self.entries.get(p))
    }

    fn get_mut(&mut self, node: NodeId) -> Option<&mut Entry> {
        let position = self.position(node)?;
        self.entries.get_mut(position)
    }

    /// Traversal position of an indexed element.
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.positions.get(&node).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|e| e.node)
    }

    /// Tag a node with the difference it was reported for.
    pub fn mark(&mut self, node: NodeId, kind: DifferenceKind) {
        if let Some(entry) = self.get_mut(node) {
            entry.difference = Some(kind);
        }
    }

    /// Whether the node was reported removed or added.
    pub fn is_dropped(&self, node: NodeId) -> bool {
        self.get(node).is_some_and(|e| {
            matches!(
                e.difference,
                Some(DifferenceKind::Removed | DifferenceKind::Added)
            )
        })
    }

    fn set_key(&mut self, node: NodeId, key: usize) {
        if let Some(entry) = self.get_mut(node) {
            entry.key = key;
        }
    }
}

/// Both tree indexes and their shared signature map.
#[derive(Debug, Clone)]
pub struct Trees {
    pub a: TreeIndex,
    pub b: TreeIndex,
    pub signatures: SignatureMap,
}

/// A B candidate for an imbalanced A node.
struct Candidate {
    pool_position: usize,
    similarity: Similarity,
    distance: usize,
}

impl Trees {
    /// Index both trees, leaving out subtrees excluded by `rules`.
    pub fn build(doc_a: &Document, root_a: NodeId, doc_b: &Document, root_b: NodeId, rules: &ExclusionRules) -> Self {
        let mut signatures = SignatureMap::default();
        let a = TreeIndex::build(doc_a, root_a, rules, Side::A, &mut signatures);
        let b = TreeIndex::build(doc_b, root_b, rules, Side::B, &mut signatures);
        Trees { a, b, signatures }
    }

    /// Pair up imbalanced signatures, reporting what could not be paired exactly.
    pub fn resolve_imbalances(
        &mut self,
        doc_a: &Document,
        doc_b: &Document,
        rules: &ExclusionRules,
        reporting: MismatchReporting,
        log: &mut DifferenceLog,
    ) -> Result<(), LimitReached> {
        let mut pool_a: Vec<NodeId> = Vec::new();
        let mut pool_b: Vec<NodeId> = Vec::new();
        for bucket in self.signatures.imbalanced() {
            pool_a.extend(&bucket.a);
            pool_b.extend(&bucket.b);
        }
        pool_a.sort_by_key(|&n| self.a.position(n));
        pool_b.sort_by_key(|&n| self.b.position(n));

        debug!(a = pool_a.len(), b = pool_b.len(), "resolving imbalances");

        for node_a in pool_a {
            let Some(candidate) = self.find_match(node_a, &pool_b) else {
                self.a.mark(node_a, DifferenceKind::Removed);
                log.record(DifferenceKind::Removed, Some(node_a), None)?;
                continue;
            };

            let node_b = pool_b.remove(candidate.pool_position);
            if let Some(key) = self.a.get(node_a).map(|e| e.key) {
                self.b.set_key(node_b, key);
            }
            trace!(?node_a, ?node_b, distance = candidate.distance, "matched imbalanced element");

            if candidate.similarity.is_identical() {
                continue;
            }

            for kind in mismatch_kinds(candidate.similarity, reporting) {
                if kind == DifferenceKind::Attr && rules.allows_change(doc_a, node_a, doc_b, node_b) {
                    trace!(?node_a, "attribute change excluded");
                    continue;
                }
                self.a.mark(node_a, kind);
                self.b.mark(node_b, kind);
                log.record(kind, Some(node_a), Some(node_b))?;
            }
        }

        for node_b in pool_b {
            self.b.mark(node_b, DifferenceKind::Added);
            log.record(DifferenceKind::Added, None, Some(node_b))?;
        }

        Ok(())
    }

    /// Closest B node agreeing with `node_a` on at least two aspects.
    ///
    /// Identical candidates beat similar ones; among equals the first one wins.
    fn find_match(&self, node_a: NodeId, pool_b: &[NodeId]) -> Option<Candidate> {
        let entry_a = self.a.get(node_a)?;
        let index_a = self.a.position(node_a)?;

        let candidates: Vec<Candidate> = pool_b
            .iter()
            .enumerate()
            .filter_map(|(pool_position, &node_b)| {
                let entry_b = self.b.get(node_b)?;
                let similarity = entry_a.signature.similarity(&entry_b.signature);
                (similarity.score() >= 2).then(|| Candidate {
                    pool_position,
                    similarity,
                    distance: index_a.abs_diff(self.b.position(node_b).unwrap_or(usize::MAX)),
                })
            })
            .collect();

        let found_identical = candidates.iter().any(|c| c.similarity.is_identical());
        candidates
            .into_iter()
            .filter(|c| !found_identical || c.similarity.is_identical())
            .min_by_key(|c| c.distance)
    }
}

fn mismatch_kinds(similarity: Similarity, reporting: MismatchReporting) -> Vec<DifferenceKind> {
    let differing = [
        (!similarity.tag, DifferenceKind::Tag),
        (!similarity.attrs, DifferenceKind::Attr),
        (!similarity.text, DifferenceKind::Text),
    ]
    .into_iter()
    .filter_map(|(differs, kind)| differs.then_some(kind));

    match reporting {
        MismatchReporting::Dominant => differing.take(1).collect(),
        MismatchReporting::EachAspect => differing.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse;

    fn trees(a: &str, b: &str) -> (Document, Document, Trees) {
        let doc_a = parse(a);
        let doc_b = parse(b);
        let root_a = doc_a.body().expect("body");
        let root_b = doc_b.body().expect("body");
        let trees = Trees::build(&doc_a, root_a, &doc_b, root_b, &ExclusionRules::default());
        (doc_a, doc_b, trees)
    }

    #[test]
    fn index_starts_at_root() {
        let (doc_a, _, trees) = trees(
            "<html><body><div><p>x</p></div></body></html>",
            "<html><body></body></html>",
        );
        let first = trees.a.at(0).expect("root entry");
        assert_eq!(doc_a.tag(first.node), Some("body"));
        assert_eq!(trees.a.len(), 3);
        assert_eq!(trees.b.len(), 1);
    }

    #[test]
    fn balanced_signatures_share_keys() {
        let (_, _, trees) = trees(
            "<html><body><p>x</p><p>x</p></body></html>",
            "<html><body><p>x</p><p>x</p></body></html>",
        );
        assert_eq!(trees.signatures.imbalanced().count(), 0);
        let keys_a: Vec<_> = (0..trees.a.len()).filter_map(|i| trees.a.at(i)).map(|e| e.key).collect();
        let keys_b: Vec<_> = (0..trees.b.len()).filter_map(|i| trees.b.at(i)).map(|e| e.key).collect();
        assert_eq!(keys_a, keys_b);
    }

    #[test]
    fn attribute_change_is_matched_and_unified() {
        let (doc_a, doc_b, mut trees) = trees(
            r#"<html><body><p id="one">x</p></body></html>"#,
            r#"<html><body><p id="two">x</p></body></html>"#,
        );
        let mut log = DifferenceLog::default();
        trees
            .resolve_imbalances(&doc_a, &doc_b, &ExclusionRules::default(), MismatchReporting::Dominant, &mut log)
            .expect("under cap");

        assert_eq!(log.total(), 1);
        let diff = &log.of_kind(DifferenceKind::Attr)[0];
        let (a, b) = (diff.a.expect("a side"), diff.b.expect("b side"));
        assert_eq!(trees.a.get(a).map(|e| e.key), trees.b.get(b).map(|e| e.key));
        assert_eq!(
            trees.b.get(b).map(|e| e.signature.full.as_str()),
            Some(r#"<p id="two">x</p>"#)
        );
    }

    #[test]
    fn closest_candidate_wins() {
        let (doc_a, doc_b, mut trees) = trees(
            r#"<html><body><i>a</i><b>k</b><i>c</i><i>d</i><p class="x">z</p></body></html>"#,
            r#"<html><body><p class="y">z</p><i>a</i><b>k</b><i>c</i><i>d</i><p class="y">z</p></body></html>"#,
        );
        let mut log = DifferenceLog::default();
        trees
            .resolve_imbalances(&doc_a, &doc_b, &ExclusionRules::default(), MismatchReporting::Dominant, &mut log)
            .expect("under cap");

        let attr = &log.of_kind(DifferenceKind::Attr)[0];
        let b = attr.b.expect("b side");
        assert_eq!(trees.b.position(b), Some(6));
        assert_eq!(log.count(DifferenceKind::Added), 1);
        assert!(trees.b.is_dropped(log.of_kind(DifferenceKind::Added)[0].b.expect("added")));
    }

    #[test]
    fn identical_candidate_beats_closer_similar_one() {
        let (doc_a, doc_b, mut trees) = trees(
            r#"<html><body><i>a</i><i>b</i><i>c</i><i>d</i><i>e</i><i>f</i><p class="x">z</p></body></html>"#,
            r#"<html><body><p class="x">z</p><p class="x">z</p><i>a</i><i>b</i><i>c</i><i>d</i><p class="y">z</p></body></html>"#,
        );
        let mut log = DifferenceLog::default();
        trees
            .resolve_imbalances(&doc_a, &doc_b, &ExclusionRules::default(), MismatchReporting::Dominant, &mut log)
            .expect("under cap");

        assert_eq!(log.count(DifferenceKind::Attr), 0);
        assert_eq!(log.count(DifferenceKind::Removed), 2);
        let added: Vec<_> = log
            .of_kind(DifferenceKind::Added)
            .iter()
            .filter_map(|d| d.b.and_then(|b| trees.b.position(b)))
            .collect();
        assert_eq!(added, [1, 7]);
    }

    #[test]
    fn equidistant_candidates_go_to_the_first_one() {
        let (doc_a, doc_b, mut trees) = trees(
            r#"<html><body><i>a</i><p class="x">z</p></body></html>"#,
            r#"<html><body><p class="y">z</p><i>a</i><p class="w">z</p></body></html>"#,
        );
        let mut log = DifferenceLog::default();
        trees
            .resolve_imbalances(&doc_a, &doc_b, &ExclusionRules::default(), MismatchReporting::Dominant, &mut log)
            .expect("under cap");

        let attr = &log.of_kind(DifferenceKind::Attr)[0];
        assert_eq!(trees.a.position(attr.a.expect("a side")), Some(2));
        assert_eq!(trees.b.position(attr.b.expect("b side")), Some(1));
        let added = log.of_kind(DifferenceKind::Added)[0].b.expect("added");
        assert_eq!(trees.b.position(added), Some(3));
        assert_eq!(log.total(), 2);
    }

    #[test]
    fn unmatched_nodes_are_removed_and_added() {
        let (doc_a, doc_b, mut trees) = trees(
            "<html><body><p>x</p></body></html>",
            "<html><body><em>y</em></body></html>",
        );
        let mut log = DifferenceLog::default();
        trees
            .resolve_imbalances(&doc_a, &doc_b, &ExclusionRules::default(), MismatchReporting::Dominant, &mut log)
            .expect("under cap");

        assert_eq!(log.count(DifferenceKind::Removed), 1);
        assert_eq!(log.count(DifferenceKind::Added), 1);
        let removed = log.of_kind(DifferenceKind::Removed)[0].a.expect("a side");
        assert!(trees.a.is_dropped(removed));
        assert_eq!(doc_a.tag(removed), Some("p"));
    }

    #[test]
    fn mismatch_kinds_follow_reporting_mode() {
        let sim = Similarity {
            tag: false,
            attrs: false,
            text: true,
        };
        assert_eq!(mismatch_kinds(sim, MismatchReporting::Dominant), [DifferenceKind::Tag]);
        assert_eq!(
            mismatch_kinds(sim, MismatchReporting::EachAspect),
            [DifferenceKind::Tag, DifferenceKind::Attr]
        );
    }
}
