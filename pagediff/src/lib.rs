//! Structural and visual comparison of two rendered HTML snapshots.
//!
//! pagediff answers "did this page change?" after an edit or a migration:
//! - **Structure**: elements are matched by signature; tag, attribute and text
//!   changes, additions, removals and relocations are reported
//! - **Style**: matched element pairs are compared by resolved style, explained by
//!   the stylesheet rules that caused the change, deduplicated across the page
//! - **Exclusions**: whole subtrees, or specific attribute changes, can be ignored
//! - **Bounded**: at most N differences are collected, and the visual pass runs in
//!   small cooperative batches
//!
//! Matching is heuristic. It is fast and usually right, not a minimal tree edit.
//!
//! # Example
//!
//! ```rust
//! use pagediff::{CompareOptions, Comparison, DifferenceKind};
//!
//! let a = "<html><body><div><span>x</span><em>y</em></div></body></html>";
//! let b = "<html><body><div><em>y</em><span>x</span></div></body></html>";
//!
//! let outcome = Comparison::from_html(a, b, CompareOptions::default())
//!     .unwrap()
//!     .run_to_completion()
//!     .unwrap();
//!
//! assert_eq!(outcome.log().count(DifferenceKind::Moved), 2);
//! assert!(!outcome.stopped_at_max());
//! ```

mod tracing_macros;

pub mod compare;
pub mod dom;
pub mod exclusion;
pub mod log;
pub mod matching;
pub mod movement;
pub mod scheduler;
pub mod signature;
pub mod specificity;
pub mod style;
pub mod traversal;

pub(crate) use tracing_macros::{debug, trace};

// Re-export the session API at crate root for convenience
pub use compare::{CompareError, CompareOptions, Comparison, Outcome, Snapshot};
pub use dom::{Document, parse};
pub use exclusion::{ExclusionRules, ExclusionSpec};
pub use log::{Difference, DifferenceKind, DifferenceLog, LimitReached, StyleChange};
pub use matching::{MismatchReporting, Side};
pub use movement::MoveDetection;
pub use scheduler::{Step, VisualPass};
pub use signature::Signature;
pub use specificity::{SelectorSpecificity, Specificity, SpecificityCalculator};
pub use style::{ComputedStyle, NoStyles, PropertySource, RuleDeclaration, StyleDiff, StyleSnapshot, StyleSource};

// Arena node handles
pub use indextree::NodeId;
