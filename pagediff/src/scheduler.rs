//! Cooperative stepping of the visual pass.
//!
//! Style resolution is the expensive part of a comparison, so the visual pass runs
//! as a resumable cursor over both trees. Each call handles a bounded batch of
//! paired nodes and hands control back; whoever owns the comparison decides when
//! to call again (a timer, a task queue, a plain loop).

use crate::trace;
use crate::compare::Snapshot;
use crate::dom::{Document, NodeKind};
use crate::exclusion::ExclusionRules;
use crate::log::{DifferenceKind, DifferenceLog, LimitReached};
use crate::matching::{TreeIndex, Trees};
use crate::signature::{Signature, same_ignoring_spaces};
use crate::specificity::SpecificityCalculator;
use crate::style::{elems_differ, preserves_whitespace};
use crate::traversal::{NodeFilter, SubtreeFilter, forward};
use indextree::NodeId;

/// Paired nodes handled per call.
pub const DEFAULT_BATCH_SIZE: usize = 15;

/// Calls after which a still-running visual pass is considered runaway.
pub const DEFAULT_MAX_CALLS: usize = 2000;

/// When the visual pass runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VisualPass {
    #[default]
    Always,
    /// Only when the structural passes found nothing
    WhenStructurallyEqual,
    Never,
}

/// Result of one scheduler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More work remains; call again on a later turn
    InProgress { percent: u8 },
    Complete,
}

/// Node kinds as the visual pass sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Element,
    Text,
    Other,
}

fn kind_of(doc: &Document, id: NodeId) -> Kind {
    match doc.get(id).kind {
        NodeKind::Element(_) => Kind::Element,
        NodeKind::Text(_) => Kind::Text,
        NodeKind::Comment(_) | NodeKind::Document => Kind::Other,
    }
}

/// Skips excluded subtrees and nodes reported removed or added.
struct PassFilter<'a> {
    rules: &'a ExclusionRules,
    index: &'a TreeIndex,
}

impl SubtreeFilter for PassFilter<'_> {
    fn excludes(&self, doc: &Document, id: NodeId) -> bool {
        self.index.is_dropped(id) || self.rules.excludes_subtree(doc, id)
    }
}

/// Everything a batch reads.
pub(crate) struct VisualContext<'a> {
    pub a: &'a Snapshot,
    pub b: &'a Snapshot,
    pub trees: &'a Trees,
    pub rules: &'a ExclusionRules,
    pub specificity: &'a dyn SpecificityCalculator,
    pub batch_size: usize,
}

impl VisualContext<'_> {
    fn filter_a(&self) -> PassFilter<'_> {
        PassFilter {
            rules: self.rules,
            index: &self.trees.a,
        }
    }

    fn filter_b(&self) -> PassFilter<'_> {
        PassFilter {
            rules: self.rules,
            index: &self.trees.b,
        }
    }
}

/// Position of the visual pass in both trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualCursor {
    pub a: Option<NodeId>,
    pub b: Option<NodeId>,
    /// Scheduler calls made so far
    pub calls: usize,
    pub percent: u8,
    /// Element list positions last seen by each cursor
    index_a: usize,
    index_b: usize,
}

impl VisualCursor {
    pub(crate) fn start(ctx: &VisualContext<'_>) -> Self {
        VisualCursor {
            a: forward(&ctx.a.document, None, ctx.a.root, NodeFilter::All, &ctx.filter_a()),
            b: forward(&ctx.b.document, None, ctx.b.root, NodeFilter::All, &ctx.filter_b()),
            calls: 0,
            percent: 0,
            index_a: 0,
            index_b: 0,
        }
    }

    /// Whether either tree has been fully walked.
    pub fn is_exhausted(&self) -> bool {
        self.a.is_none() || self.b.is_none()
    }

    /// Handle up to `batch_size` paired nodes.
    pub(crate) fn run_batch(
        &mut self,
        ctx: &VisualContext<'_>,
        log: &mut DifferenceLog,
    ) -> Result<(), LimitReached> {
        let doc_a = &ctx.a.document;
        let doc_b = &ctx.b.document;
        let filter_a = ctx.filter_a();
        let filter_b = ctx.filter_b();

        for _ in 0..ctx.batch_size {
            let (Some(na), Some(nb)) = (self.a, self.b) else {
                break;
            };
            let kind_a = kind_of(doc_a, na);
            let kind_b = kind_of(doc_b, nb);

            if kind_a == Kind::Element
                && let Some(p) = ctx.trees.a.position(na)
            {
                self.index_a = p;
            }
            if kind_b == Kind::Element
                && let Some(p) = ctx.trees.b.position(nb)
            {
                self.index_b = p;
            }

            let (mut forward_a, mut forward_b) = (true, true);
            match (kind_a, kind_b) {
                (Kind::Element, Kind::Element) => compare_elements(ctx, na, nb, log)?,
                (Kind::Text, Kind::Text) => compare_texts(ctx, na, nb, log)?,
                (Kind::Other, Kind::Other) => {}
                // A text node was added or removed: move the text side along
                (Kind::Element, Kind::Text) => forward_a = false,
                (Kind::Text, Kind::Element) => forward_b = false,
                // Skip past whatever is not an element or text
                (_, Kind::Other) => forward_a = false,
                (Kind::Other, _) => forward_b = false,
            }

            if forward_a {
                self.a = forward(doc_a, Some(na), ctx.a.root, NodeFilter::All, &filter_a);
            }
            if forward_b {
                self.b = forward(doc_b, Some(nb), ctx.b.root, NodeFilter::All, &filter_b);
            }
        }

        self.update_percent(ctx.trees.a.len(), ctx.trees.b.len());
        Ok(())
    }

    fn update_percent(&mut self, total_a: usize, total_b: usize) {
        if self.is_exhausted() {
            self.percent = 100;
        } else if self.index_a != 0 && self.index_b != 0 {
            let done = 50.0
                * (self.index_a as f64 / total_a.max(1) as f64
                    + self.index_b as f64 / total_b.max(1) as f64);
            self.percent = (done.round() as u8).min(99);
        }
    }
}

fn compare_elements(
    ctx: &VisualContext<'_>,
    na: NodeId,
    nb: NodeId,
    log: &mut DifferenceLog,
) -> Result<(), LimitReached> {
    let Some(diff) = elems_differ(ctx.a.styles.as_ref(), na, ctx.b.styles.as_ref(), nb, ctx.specificity)
    else {
        return Ok(());
    };

    let tag_signature = match ctx.trees.a.get(na) {
        Some(entry) => entry.signature.tag_signature.clone(),
        None => Signature::compute(&ctx.a.document, na).tag_signature,
    };

    if let Some(previous) = log.find_style_mut(&tag_signature, &diff) {
        previous.affected += 1;
        trace!(?na, affected = previous.affected, "style change already reported");
        return Ok(());
    }

    log.record_style(na, nb, tag_signature, diff)
}

fn compare_texts(
    ctx: &VisualContext<'_>,
    na: NodeId,
    nb: NodeId,
    log: &mut DifferenceLog,
) -> Result<(), LimitReached> {
    let (Some(text_a), Some(text_b)) = (ctx.a.document.text(na), ctx.b.document.text(nb)) else {
        return Ok(());
    };
    if text_a == text_b || !same_ignoring_spaces(text_a, text_b) {
        return Ok(());
    }

    let preserved_a = ctx
        .a
        .document
        .parent(na)
        .is_some_and(|p| preserves_whitespace(ctx.a.styles.as_ref(), p));
    let preserved_b = ctx
        .b
        .document
        .parent(nb)
        .is_some_and(|p| preserves_whitespace(ctx.b.styles.as_ref(), p));

    if preserved_a || preserved_b {
        log.record(DifferenceKind::Space, Some(na), Some(nb))?;
    }
    Ok(())
}
