//! Pre-order stepping through a document.
//!
//! [`forward`] looks down (first child), then along (next sibling), then up (the
//! next sibling of the closest ancestor that has one), never leaving the subtree
//! rooted at `stop`. Elements rejected by a [`SubtreeFilter`] are stepped over
//! together with their descendants.

use crate::trace;
use crate::dom::{Document, NodeKind};
use crate::exclusion::ExclusionRules;
use indextree::NodeId;

/// Which node kinds a traversal visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFilter {
    /// Elements only; text and comments are invisible
    Elements,
    /// Every node kind
    All,
}

/// Decides whether an element's subtree is skipped.
pub trait SubtreeFilter {
    fn excludes(&self, doc: &Document, id: NodeId) -> bool;
}

impl<F> SubtreeFilter for F
where
    F: Fn(&Document, NodeId) -> bool,
{
    fn excludes(&self, doc: &Document, id: NodeId) -> bool {
        self(doc, id)
    }
}

impl SubtreeFilter for ExclusionRules {
    fn excludes(&self, doc: &Document, id: NodeId) -> bool {
        self.excludes_subtree(doc, id)
    }
}

/// A filter that keeps everything.
pub fn keep_all(_doc: &Document, _id: NodeId) -> bool {
    false
}

impl NodeFilter {
    fn accepts(self, doc: &Document, id: NodeId) -> bool {
        match self {
            NodeFilter::All => true,
            NodeFilter::Elements => matches!(doc.get(id).kind, NodeKind::Element(_)),
        }
    }

    fn first_child(self, doc: &Document, id: NodeId) -> Option<NodeId> {
        doc.children(id).find(|&c| self.accepts(doc, c))
    }

    fn last_child(self, doc: &Document, id: NodeId) -> Option<NodeId> {
        id.reverse_children(&doc.arena).find(|&c| self.accepts(doc, c))
    }

    fn next_sibling(self, doc: &Document, id: NodeId) -> Option<NodeId> {
        id.following_siblings(&doc.arena)
            .skip(1)
            .find(|&s| self.accepts(doc, s))
    }

    fn previous_sibling(self, doc: &Document, id: NodeId) -> Option<NodeId> {
        id.preceding_siblings(&doc.arena)
            .skip(1)
            .find(|&s| self.accepts(doc, s))
    }
}

/// Next node after `last` in pre-order, staying inside `stop`.
///
/// `last == None` starts the walk and returns the first descendant of `stop`.
pub fn forward<F>(
    doc: &Document,
    last: Option<NodeId>,
    stop: NodeId,
    nodes: NodeFilter,
    filter: &F,
) -> Option<NodeId>
where
    F: SubtreeFilter + ?Sized,
{
    let mut current = last.unwrap_or(stop);
    let mut descend = true;

    loop {
        let next = step_forward(doc, current, stop, nodes, descend)?;
        if doc.is_element(next) && filter.excludes(doc, next) {
            trace!(?next, "skipping excluded subtree");
            current = next;
            descend = false;
            continue;
        }
        return Some(next);
    }
}

fn step_forward(
    doc: &Document,
    last: NodeId,
    stop: NodeId,
    nodes: NodeFilter,
    descend: bool,
) -> Option<NodeId> {
    // Down
    if descend && let Some(child) = nodes.first_child(doc, last) {
        return Some(child);
    }

    if last == stop {
        return None;
    }

    // Along
    if let Some(sibling) = nodes.next_sibling(doc, last) {
        return Some(sibling);
    }

    // Up
    let mut current = last;
    loop {
        current = doc.parent(current)?;
        if current == stop {
            return None;
        }
        if let Some(sibling) = nodes.next_sibling(doc, current) {
            return Some(sibling);
        }
    }
}

/// Mirror of [`forward`]: last child, then previous sibling, then up.
///
/// Not used by the comparison passes.
pub fn step_back(
    doc: &Document,
    last: Option<NodeId>,
    stop: NodeId,
    nodes: NodeFilter,
) -> Option<NodeId> {
    let last = last.unwrap_or(stop);

    if let Some(child) = nodes.last_child(doc, last) {
        return Some(child);
    }

    if last == stop {
        return None;
    }

    if let Some(sibling) = nodes.previous_sibling(doc, last) {
        return Some(sibling);
    }

    let mut current = last;
    loop {
        current = doc.parent(current)?;
        if current == stop {
            return None;
        }
        if let Some(sibling) = nodes.previous_sibling(doc, current) {
            return Some(sibling);
        }
    }
}

/// Iterator over the nodes [`forward`] visits below `stop` (excluding `stop`).
pub struct Walker<'a, F: ?Sized> {
    doc: &'a Document,
    stop: NodeId,
    nodes: NodeFilter,
    filter: &'a F,
    last: Option<NodeId>,
    done: bool,
}

impl<'a, F> Walker<'a, F>
where
    F: SubtreeFilter + ?Sized,
{
    pub fn new(doc: &'a Document, stop: NodeId, nodes: NodeFilter, filter: &'a F) -> Self {
        Walker {
            doc,
            stop,
            nodes,
            filter,
            last: None,
            done: false,
        }
    }
}

impl<F> Iterator for Walker<'_, F>
where
    F: SubtreeFilter + ?Sized,
{
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.done {
            return None;
        }
        let next = forward(self.doc, self.last, self.stop, self.nodes, self.filter);
        match next {
            Some(id) => self.last = Some(id),
            None => self.done = true,
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse;
    use crate::exclusion::ExclusionSpec;

    fn tags(doc: &Document, ids: impl Iterator<Item = NodeId>) -> Vec<String> {
        ids.map(|id| match doc.tag(id) {
            Some(tag) => tag.to_owned(),
            None => format!("#{}", doc.text(id).unwrap_or("?")),
        })
        .collect()
    }

    const HTML: &str = "<html><body><div><p>one</p><span>two</span></div><em>three</em></body></html>";

    #[test]
    fn elements_in_preorder() {
        let doc = parse(HTML);
        let body = doc.body().expect("body");
        let walked = tags(&doc, Walker::new(&doc, body, NodeFilter::Elements, &keep_all));
        assert_eq!(walked, ["div", "p", "span", "em"]);
    }

    #[test]
    fn all_kinds_include_text() {
        let doc = parse(HTML);
        let body = doc.body().expect("body");
        let walked = tags(&doc, Walker::new(&doc, body, NodeFilter::All, &keep_all));
        assert_eq!(walked, ["div", "p", "#one", "span", "#two", "em", "#three"]);
    }

    #[test]
    fn never_leaves_stop() {
        let doc = parse(HTML);
        let body = doc.body().expect("body");
        let div = doc.children(body).next().expect("div");
        let walked = tags(&doc, Walker::new(&doc, div, NodeFilter::Elements, &keep_all));
        assert_eq!(walked, ["p", "span"]);

        let p = doc.children(div).next().expect("p");
        assert_eq!(forward(&doc, Some(p), p, NodeFilter::Elements, &keep_all), None);
    }

    #[test]
    fn excluded_subtree_is_skipped() {
        let doc = parse(HTML);
        let body = doc.body().expect("body");
        let rules = ExclusionRules::compile(&[ExclusionSpec::tag("div")]).expect("rules");
        let walked = tags(&doc, Walker::new(&doc, body, NodeFilter::All, &rules));
        assert_eq!(walked, ["em", "#three"]);
    }

    #[test]
    fn closure_filter() {
        let doc = parse(HTML);
        let body = doc.body().expect("body");
        let skip_p = |d: &Document, id: NodeId| d.tag(id) == Some("p");
        let walked = tags(&doc, Walker::new(&doc, body, NodeFilter::Elements, &skip_p));
        assert_eq!(walked, ["div", "span", "em"]);
    }

    #[test]
    fn step_back_mirrors_forward() {
        let doc = parse(HTML);
        let body = doc.body().expect("body");
        let first = step_back(&doc, None, body, NodeFilter::Elements).expect("last child");
        assert_eq!(doc.tag(first), Some("em"));
        let second = step_back(&doc, Some(first), body, NodeFilter::Elements).expect("previous");
        assert_eq!(doc.tag(second), Some("div"));
    }
}
