//! The comparison session.
//!
//! [`Comparison::new`] compiles the exclusion rules and runs the structural passes
//! (signature indexing, imbalance resolution, movement detection) to completion.
//! The visual pass is then driven one batch at a time through
//! [`Comparison::step`], or all at once with [`Comparison::run_to_completion`].

use crate::{debug, trace};
use crate::dom::{self, Document};
use crate::exclusion::{ExclusionRules, ExclusionSpec};
use crate::log::{DEFAULT_MAX_DIFFERENCES, DifferenceLog, LimitReached};
use crate::matching::{MismatchReporting, Side, Trees};
use crate::movement::{MoveDetection, detect_moves};
use crate::scheduler::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_CALLS, Step, VisualContext, VisualCursor, VisualPass};
use crate::signature::collapse_whitespace;
use crate::specificity::{SelectorSpecificity, SpecificityCalculator};
use crate::style::{NoStyles, StyleSource};
use facet::Facet;
use indextree::NodeId;

/// Errors that stop a comparison.
#[derive(Facet, Debug)]
#[facet(derive(Error))]
#[repr(u8)]
pub enum CompareError {
    /// invalid exclusion rules: {message}
    InvalidRulesJson { message: String },

    /// invalid pattern for attribute {attribute} ({pattern}): {message}
    InvalidPattern {
        attribute: String,
        pattern: String,
        message: String,
    },

    /// visual comparison still running after {limit} scheduler calls
    IterationLimit { limit: usize },
}

/// One side of a comparison: a document, the element to compare from, and its styles.
pub struct Snapshot {
    pub document: Document,
    pub root: NodeId,
    pub styles: Box<dyn StyleSource>,
}

impl Snapshot {
    /// Compare from `root`, without style information.
    pub fn new(document: Document, root: NodeId) -> Self {
        Snapshot {
            document,
            root,
            styles: Box::new(NoStyles),
        }
    }

    /// Parse HTML and compare from `<body>` (or the document root when there is none).
    pub fn from_html(html: &str) -> Self {
        let document = dom::parse(html);
        let root = document.body().unwrap_or(document.root);
        Self::new(document, root)
    }

    pub fn with_styles(mut self, styles: impl StyleSource + 'static) -> Self {
        self.styles = Box::new(styles);
        self
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("root", &self.root)
            .field("nodes", &self.document.arena.count())
            .finish_non_exhaustive()
    }
}

/// Comparison settings.
pub struct CompareOptions {
    /// Stop after this many differences (at least one)
    pub max_differences: usize,
    pub exclusions: Vec<ExclusionSpec>,
    pub movement: MoveDetection,
    pub mismatch: MismatchReporting,
    pub visual: VisualPass,
    /// Paired nodes per scheduler call
    pub batch_size: usize,
    /// Scheduler calls before the visual pass is abandoned
    pub max_calls: usize,
    pub specificity: Box<dyn SpecificityCalculator>,
}

impl Default for CompareOptions {
    fn default() -> Self {
        CompareOptions {
            max_differences: DEFAULT_MAX_DIFFERENCES,
            exclusions: Vec::new(),
            movement: MoveDetection::default(),
            mismatch: MismatchReporting::default(),
            visual: VisualPass::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_calls: DEFAULT_MAX_CALLS,
            specificity: Box::new(SelectorSpecificity),
        }
    }
}

impl CompareOptions {
    /// Default options with exclusion rules parsed from JSON.
    pub fn with_exclusions_json(json: &str) -> Result<Self, CompareError> {
        Ok(CompareOptions {
            exclusions: ExclusionSpec::list_from_json(json)?,
            ..Default::default()
        })
    }
}

impl std::fmt::Debug for CompareOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompareOptions")
            .field("max_differences", &self.max_differences)
            .field("exclusions", &self.exclusions)
            .field("movement", &self.movement)
            .field("mismatch", &self.mismatch)
            .field("visual", &self.visual)
            .field("batch_size", &self.batch_size)
            .field("max_calls", &self.max_calls)
            .finish_non_exhaustive()
    }
}

/// Final difference log of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Complete(DifferenceLog),
    /// The difference cap was reached; the log is partial
    StoppedAtMax(DifferenceLog),
}

impl Outcome {
    pub fn log(&self) -> &DifferenceLog {
        match self {
            Outcome::Complete(log) | Outcome::StoppedAtMax(log) => log,
        }
    }

    pub fn into_log(self) -> DifferenceLog {
        match self {
            Outcome::Complete(log) | Outcome::StoppedAtMax(log) => log,
        }
    }

    pub fn stopped_at_max(&self) -> bool {
        matches!(self, Outcome::StoppedAtMax(_))
    }
}

/// A comparison of two snapshots.
pub struct Comparison {
    a: Snapshot,
    b: Snapshot,
    options: CompareOptions,
    rules: ExclusionRules,
    trees: Trees,
    log: DifferenceLog,
    /// `None` once the visual pass is done, skipped, or the cap was reached
    cursor: Option<VisualCursor>,
}

impl Comparison {
    /// Compile the rules and run the structural passes.
    pub fn new(a: Snapshot, b: Snapshot, options: CompareOptions) -> Result<Self, CompareError> {
        let rules = ExclusionRules::compile(&options.exclusions)?;
        let mut log = DifferenceLog::new(options.max_differences);
        let mut trees = Trees::build(&a.document, a.root, &b.document, b.root, &rules);

        if structural_passes(&mut trees, &a, &b, &rules, &options, &mut log).is_err() {
            debug!(total = log.total(), "stopped at max during structural passes");
        }

        let visual = !log.stopped_at_max()
            && match options.visual {
                VisualPass::Always => true,
                VisualPass::WhenStructurallyEqual => log.is_empty(),
                VisualPass::Never => false,
            };

        let mut comparison = Comparison {
            a,
            b,
            options,
            rules,
            trees,
            log,
            cursor: None,
        };

        if visual {
            let cursor = VisualCursor::start(&comparison.context());
            comparison.cursor = (!cursor.is_exhausted()).then_some(cursor);
        }

        debug!(
            structural = comparison.log.total(),
            visual, "structural passes done"
        );
        Ok(comparison)
    }

    /// Parse two HTML documents and compare them from `<body>`.
    pub fn from_html(a: &str, b: &str, options: CompareOptions) -> Result<Self, CompareError> {
        Self::new(Snapshot::from_html(a), Snapshot::from_html(b), options)
    }

    fn context(&self) -> VisualContext<'_> {
        VisualContext {
            a: &self.a,
            b: &self.b,
            trees: &self.trees,
            rules: &self.rules,
            specificity: self.options.specificity.as_ref(),
            batch_size: self.options.batch_size.max(1),
        }
    }

    /// Run one batch of the visual pass.
    pub fn step(&mut self) -> Result<Step, CompareError> {
        let Some(mut cursor) = self.cursor else {
            return Ok(Step::Complete);
        };

        if cursor.calls >= self.options.max_calls {
            return Err(CompareError::IterationLimit {
                limit: self.options.max_calls,
            });
        }
        cursor.calls += 1;

        let ctx = VisualContext {
            a: &self.a,
            b: &self.b,
            trees: &self.trees,
            rules: &self.rules,
            specificity: self.options.specificity.as_ref(),
            batch_size: self.options.batch_size.max(1),
        };
        let result = cursor.run_batch(&ctx, &mut self.log);

        if result.is_err() || cursor.is_exhausted() {
            trace!(calls = cursor.calls, total = self.log.total(), "visual pass finished");
            self.cursor = None;
            return Ok(Step::Complete);
        }

        self.cursor = Some(cursor);
        Ok(Step::InProgress {
            percent: cursor.percent,
        })
    }

    /// Step until the visual pass is done.
    pub fn run_to_completion(mut self) -> Result<Outcome, CompareError> {
        while let Step::InProgress { .. } = self.step()? {}
        Ok(self.into_outcome())
    }

    /// The log as it stands.
    pub fn into_outcome(self) -> Outcome {
        if self.log.stopped_at_max() {
            Outcome::StoppedAtMax(self.log)
        } else {
            Outcome::Complete(self.log)
        }
    }

    pub fn log(&self) -> &DifferenceLog {
        &self.log
    }

    pub fn is_finished(&self) -> bool {
        self.cursor.is_none()
    }

    /// Percentage of the visual pass done.
    pub fn progress(&self) -> u8 {
        self.cursor.map_or(100, |c| c.percent)
    }

    pub fn snapshot(&self, side: Side) -> &Snapshot {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub fn trees(&self) -> &Trees {
        &self.trees
    }

    /// Signature of an indexed element as computed from the node, before any unification.
    pub fn original_signature(&self, side: Side, node: NodeId) -> Option<&str> {
        let index = match side {
            Side::A => &self.trees.a,
            Side::B => &self.trees.b,
        };
        index.get(node).map(|e| e.signature.full.as_str())
    }

    /// Short human-readable description of a node for reports.
    pub fn describe(&self, side: Side, node: NodeId) -> String {
        if let Some(signature) = self.original_signature(side, node) {
            return signature.to_owned();
        }
        let doc = &self.snapshot(side).document;
        match doc.text(node) {
            Some(text) => collapse_whitespace(text),
            None => doc.outer_html(node),
        }
    }
}

impl std::fmt::Debug for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comparison")
            .field("options", &self.options)
            .field("total", &self.log.total())
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

fn structural_passes(
    trees: &mut Trees,
    a: &Snapshot,
    b: &Snapshot,
    rules: &ExclusionRules,
    options: &CompareOptions,
    log: &mut DifferenceLog,
) -> Result<(), LimitReached> {
    trees.resolve_imbalances(&a.document, &b.document, rules, options.mismatch, log)?;
    detect_moves(trees, options.movement, log)
}
