//! Session driver for pagediff comparisons.
//!
//! `ComparisonServer` owns in-flight comparisons keyed by a caller-chosen id. Each
//! call to [`ComparisonServer::step`] runs one batch of the visual pass and returns a
//! `ComparisonEvent` that can be serialized with postcard and sent over any transport
//! (a worker channel, a WebSocket, etc.).
//!
//! Cancelling is just not stepping again; [`ComparisonServer::cancel`] drops the
//! session's state.

use std::collections::HashMap;

use facet::Facet;
use pagediff::{CompareOptions, Comparison, DifferenceKind, Side, Snapshot, Step, StyleDiff};

#[cfg(feature = "tracing")]
use tracing::debug;

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($tt:tt)*) => {};
}

/// Events produced while driving a comparison.
#[derive(Debug, Clone, PartialEq, Facet)]
#[repr(u8)]
pub enum ComparisonEvent {
    /// The visual pass is still running.
    Progress { id: String, percent: u8 },
    /// No differences at all.
    Identical { id: String },
    /// The final difference log.
    Differences {
        id: String,
        total: u32,
        /// The cap was hit, so `total` is a lower bound.
        stopped_at_max: bool,
        entries: Vec<DifferenceSummary>,
    },
    /// The session could not be created or was abandoned.
    Failed { id: String, reason: String },
}

/// A difference with its nodes rendered as short descriptions.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct DifferenceSummary {
    pub kind: DifferenceKind,
    pub a: Option<String>,
    pub b: Option<String>,
    /// Element pairs sharing this difference (always 1 outside of style changes).
    pub affected: u32,
    pub style: Option<StyleDiff>,
}

impl ComparisonEvent {
    /// Serialize this event to postcard bytes.
    pub fn to_postcard(&self) -> Vec<u8> {
        facet_postcard::to_vec(self).expect("ComparisonEvent serialization should not fail")
    }

    /// Deserialize a `ComparisonEvent` from postcard bytes.
    pub fn from_postcard(
        bytes: &[u8],
    ) -> Result<Self, facet_postcard::DeserializeError<facet_postcard::PostcardError>> {
        facet_postcard::from_slice(bytes)
    }

    pub fn id(&self) -> &str {
        match self {
            ComparisonEvent::Progress { id, .. }
            | ComparisonEvent::Identical { id }
            | ComparisonEvent::Differences { id, .. }
            | ComparisonEvent::Failed { id, .. } => id,
        }
    }

    /// Whether the session is over once this event is delivered.
    pub fn is_final(&self) -> bool {
        !matches!(self, ComparisonEvent::Progress { .. })
    }

    /// One-line status text, e.g. `identical` or `25+ difference(s) found`.
    pub fn status(&self) -> String {
        match self {
            ComparisonEvent::Progress { percent, .. } => format!("comparing... {percent}%"),
            ComparisonEvent::Identical { .. } => "identical".to_owned(),
            ComparisonEvent::Differences {
                total,
                stopped_at_max,
                ..
            } => {
                let plus = if *stopped_at_max { "+" } else { "" };
                format!("{total}{plus} difference(s) found")
            }
            ComparisonEvent::Failed { reason, .. } => format!("failed: {reason}"),
        }
    }
}

/// In-flight comparisons keyed by id.
///
/// Transport-agnostic: callers decide when to step and where events go.
pub struct ComparisonServer {
    sessions: HashMap<String, Comparison>,
}

impl ComparisonServer {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Start comparing two HTML documents from `<body>`, with optional JSON exclusion rules.
    ///
    /// Returns the verdict right away when there is no visual work to do.
    pub fn start(
        &mut self,
        id: &str,
        a_html: &str,
        b_html: &str,
        exclusions_json: Option<&str>,
    ) -> ComparisonEvent {
        let options = match exclusions_json {
            Some(json) => CompareOptions::with_exclusions_json(json),
            None => Ok(CompareOptions::default()),
        };
        match options {
            Ok(options) => self.start_with(id, Snapshot::from_html(a_html), Snapshot::from_html(b_html), options),
            Err(e) => {
                debug!(id, error = %e, "rejected exclusion rules");
                failed(id, &e)
            }
        }
    }

    /// Start comparing two prepared snapshots (e.g. carrying style information).
    ///
    /// A session already running under `id` is replaced.
    pub fn start_with(
        &mut self,
        id: &str,
        a: Snapshot,
        b: Snapshot,
        options: CompareOptions,
    ) -> ComparisonEvent {
        let comparison = match Comparison::new(a, b, options) {
            Ok(comparison) => comparison,
            Err(e) => {
                debug!(id, error = %e, "could not create comparison");
                self.sessions.remove(id);
                return failed(id, &e);
            }
        };

        if comparison.is_finished() {
            self.sessions.remove(id);
            return verdict(id, &comparison);
        }

        let percent = comparison.progress();
        if self.sessions.insert(id.to_owned(), comparison).is_some() {
            debug!(id, "replaced running comparison");
        }
        ComparisonEvent::Progress {
            id: id.to_owned(),
            percent,
        }
    }

    /// Run one batch of the session's visual pass. `None` for an unknown id.
    pub fn step(&mut self, id: &str) -> Option<ComparisonEvent> {
        let comparison = self.sessions.get_mut(id)?;

        match comparison.step() {
            Ok(Step::InProgress { percent }) => Some(ComparisonEvent::Progress {
                id: id.to_owned(),
                percent,
            }),
            Ok(Step::Complete) => {
                let comparison = self.sessions.remove(id)?;
                debug!(id, total = comparison.log().total(), "comparison complete");
                Some(verdict(id, &comparison))
            }
            Err(e) => {
                debug!(id, error = %e, "comparison abandoned");
                self.sessions.remove(id);
                Some(failed(id, &e))
            }
        }
    }

    /// Step until the verdict, collecting every event along the way.
    pub fn drain(&mut self, id: &str) -> Vec<ComparisonEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.step(id) {
            let done = event.is_final();
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    /// Drop a running session. Returns false if there was none.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Ids of sessions still running.
    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

impl Default for ComparisonServer {
    fn default() -> Self {
        Self::new()
    }
}

fn failed(id: &str, error: &impl std::fmt::Display) -> ComparisonEvent {
    ComparisonEvent::Failed {
        id: id.to_owned(),
        reason: error.to_string(),
    }
}

fn verdict(id: &str, comparison: &Comparison) -> ComparisonEvent {
    let log = comparison.log();
    if log.is_empty() {
        return ComparisonEvent::Identical { id: id.to_owned() };
    }

    let entries = log
        .iter()
        .map(|d| DifferenceSummary {
            kind: d.kind,
            a: d.a.map(|node| comparison.describe(Side::A, node)),
            b: d.b.map(|node| comparison.describe(Side::B, node)),
            affected: d.style.as_ref().map_or(1, |s| s.affected as u32),
            style: d.style.as_ref().map(|s| s.diff.clone()),
        })
        .collect();

    ComparisonEvent::Differences {
        id: id.to_owned(),
        total: log.total() as u32,
        stopped_at_max: log.stopped_at_max(),
        entries,
    }
}
