//! Resolved-style comparison of a matched element pair.
//!
//! Computed styles say *whether* two elements look different; matching stylesheet
//! rules say *why*. A pair is reported only when a rule-level difference explains
//! a computed difference, so a parent's width change does not also get blamed on
//! every child whose used width followed it.
//!
//! Style resolution belongs to the environment that rendered the documents. The
//! engine sees it through [`StyleSource`].

use crate::trace;
use crate::specificity::{Specificity, SpecificityCalculator};
use facet::Facet;
use indexmap::IndexMap;
use indextree::NodeId;
use rapidhash::RapidHashMap as HashMap;
use std::collections::BTreeMap;

/// Resolved property values of one element, in resolution order.
pub type ComputedStyle = IndexMap<String, String>;

/// Where a winning property value came from.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct PropertySource {
    pub value: String,
    pub selector: String,
    /// Stylesheet identifier (usually its URL, empty for inline sheets)
    pub source: String,
    pub specificity: Specificity,
}

/// Rule-level differences of an element pair, per side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct StyleDiff {
    pub a: BTreeMap<String, PropertySource>,
    pub b: BTreeMap<String, PropertySource>,
}

impl StyleDiff {
    pub fn is_empty(&self) -> bool {
        self.a.is_empty() && self.b.is_empty()
    }
}

/// A stylesheet rule that matches an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDeclaration {
    pub selector: String,
    pub source: String,
    /// Property name and value, in declaration order
    pub declarations: Vec<(String, String)>,
}

impl RuleDeclaration {
    pub fn new<I, K, V>(selector: impl Into<String>, source: impl Into<String>, declarations: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        RuleDeclaration {
            selector: selector.into(),
            source: source.into(),
            declarations: declarations
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Style resolution for the nodes of one document.
pub trait StyleSource {
    /// Full computed style of an element.
    fn computed_style(&self, node: NodeId) -> Option<&ComputedStyle>;

    /// Rules matching an element, in cascade (declaration) order.
    fn matching_rules(&self, node: NodeId) -> &[RuleDeclaration];

    /// Document origin (`scheme://host[:port]`), stripped from values before comparing.
    fn origin(&self) -> Option<&str> {
        None
    }
}

/// No style information: every element pair looks the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStyles;

impl StyleSource for NoStyles {
    fn computed_style(&self, _node: NodeId) -> Option<&ComputedStyle> {
        None
    }

    fn matching_rules(&self, _node: NodeId) -> &[RuleDeclaration] {
        &[]
    }
}

/// Styles captured ahead of time, keyed by node.
#[derive(Debug, Clone, Default)]
pub struct StyleSnapshot {
    origin: Option<String>,
    computed: HashMap<NodeId, ComputedStyle>,
    rules: HashMap<NodeId, Vec<RuleDeclaration>>,
}

impl StyleSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the document origin. A full URL is cut down to `scheme://host[:port]`.
    pub fn with_origin(mut self, url: &str) -> Self {
        self.origin = Some(origin_of(url).to_owned());
        self
    }

    /// Set (or extend) the computed style of a node.
    pub fn set_computed<I, K, V>(&mut self, node: NodeId, properties: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.computed
            .entry(node)
            .or_default()
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Append a matching rule for a node.
    pub fn add_rule(&mut self, node: NodeId, rule: RuleDeclaration) {
        self.rules.entry(node).or_default().push(rule);
    }
}

impl StyleSource for StyleSnapshot {
    fn computed_style(&self, node: NodeId) -> Option<&ComputedStyle> {
        self.computed.get(&node)
    }

    fn matching_rules(&self, node: NodeId) -> &[RuleDeclaration] {
        self.rules.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }
}

/// The first three `/`-separated parts of a URL.
fn origin_of(url: &str) -> &str {
    match url.match_indices('/').nth(2) {
        Some((i, _)) => &url[..i],
        None => url,
    }
}

fn strip_origin<'a>(value: &'a str, origin: Option<&str>) -> std::borrow::Cow<'a, str> {
    match origin {
        Some(origin) if !origin.is_empty() && value.contains(origin) => {
            std::borrow::Cow::Owned(value.replacen(origin, "", 1))
        }
        _ => std::borrow::Cow::Borrowed(value),
    }
}

/// Some engines report `foo-value` for `foo`.
fn uniform_name(name: &str) -> &str {
    name.strip_suffix("-value").unwrap_or(name)
}

/// Properties whose computed values differ, origin differences aside.
pub fn computed_differences(
    styles_a: &dyn StyleSource,
    a: NodeId,
    styles_b: &dyn StyleSource,
    b: NodeId,
) -> Vec<String> {
    let empty = ComputedStyle::new();
    let computed_a = styles_a.computed_style(a).unwrap_or(&empty);
    let computed_b = styles_b.computed_style(b).unwrap_or(&empty);

    let mut differing = Vec::new();
    for (name, value_a) in computed_a {
        let value_a = strip_origin(value_a, styles_a.origin());
        let value_b = computed_b
            .get(name)
            .map(|v| strip_origin(v, styles_b.origin()));
        if value_b.as_deref() != Some(value_a.as_ref()) {
            differing.push(name.clone());
        }
    }
    for name in computed_b.keys() {
        if !computed_a.contains_key(name) {
            differing.push(name.clone());
        }
    }
    differing
}

/// Winning declaration per property. Equal specificity goes to the later rule.
pub fn resolve_rules(
    rules: &[RuleDeclaration],
    specificity: &dyn SpecificityCalculator,
) -> IndexMap<String, PropertySource> {
    let mut winners: IndexMap<String, PropertySource> = IndexMap::new();

    for rule in rules {
        let spec = specificity.specificity(&rule.selector);
        for (name, value) in &rule.declarations {
            let name = uniform_name(name);
            if winners.get(name).is_some_and(|w| spec < w.specificity) {
                continue;
            }
            winners.insert(
                name.to_owned(),
                PropertySource {
                    value: value.clone(),
                    selector: rule.selector.clone(),
                    source: rule.source.clone(),
                    specificity: spec,
                },
            );
        }
    }

    winners
}

/// A property set on at least one side with differing values.
struct RuleDifference {
    a: Option<PropertySource>,
    b: Option<PropertySource>,
}

fn rule_differences(
    rules_a: IndexMap<String, PropertySource>,
    mut rules_b: IndexMap<String, PropertySource>,
) -> IndexMap<String, RuleDifference> {
    let mut differences = IndexMap::new();

    for (name, source_a) in rules_a {
        let source_b = rules_b.shift_remove(&name);
        if source_b.as_ref().map(|s| s.value.as_str()) == Some(source_a.value.as_str()) {
            continue;
        }
        differences.insert(
            name,
            RuleDifference {
                a: Some(source_a),
                b: source_b.filter(|s| !s.value.is_empty()),
            },
        );
    }
    for (name, source_b) in rules_b {
        differences.insert(
            name,
            RuleDifference {
                a: None,
                b: Some(source_b),
            },
        );
    }

    differences
}

/// Compare the resolved styles of a matched element pair.
///
/// Returns `None` when the elements look the same, or when no rule difference
/// explains the computed difference.
pub fn elems_differ(
    styles_a: &dyn StyleSource,
    a: NodeId,
    styles_b: &dyn StyleSource,
    b: NodeId,
    specificity: &dyn SpecificityCalculator,
) -> Option<StyleDiff> {
    let computed = computed_differences(styles_a, a, styles_b, b);
    if computed.is_empty() {
        return None;
    }

    let differences = rule_differences(
        resolve_rules(styles_a.matching_rules(a), specificity),
        resolve_rules(styles_b.matching_rules(b), specificity),
    );

    let mut shared = StyleDiff::default();
    let mut shared_count = 0usize;
    for (name, difference) in differences {
        if !computed.iter().any(|c| c.starts_with(name.as_str())) {
            continue;
        }
        if let Some(source) = difference.a {
            shared.a.insert(name.clone(), source);
        }
        if let Some(source) = difference.b {
            shared.b.insert(name, source);
        }
        shared_count += 1;
    }

    if shared_count == 0 {
        trace!(?a, ?b, computed = computed.len(), "computed difference without a rule cause");
        return None;
    }

    merge_shorthands(&mut shared.a);
    merge_shorthands(&mut shared.b);
    Some(shared)
}

const SHORTHANDS: [&str; 2] = ["margin", "padding"];
const SIDES: [&str; 4] = ["top", "right", "bottom", "left"];

/// Collapse `margin-*` / `padding-*` into the shorthand when all four sides come
/// from the same rule.
pub fn merge_shorthands(side: &mut BTreeMap<String, PropertySource>) {
    for rule in SHORTHANDS {
        let prefix = format!("{rule}-");
        if side.keys().filter(|k| k.starts_with(&prefix)).count() != 4 {
            continue;
        }

        let names = SIDES.map(|s| format!("{rule}-{s}"));
        let merged = {
            let [Some(top), Some(right), Some(bottom), Some(left)] = names.each_ref().map(|n| side.get(n))
            else {
                continue;
            };
            let same_rule = [right, bottom, left]
                .iter()
                .all(|p| p.source == top.source && p.selector == top.selector);
            if !same_rule {
                continue;
            }
            PropertySource {
                value: shorthand_value(&top.value, &right.value, &bottom.value, &left.value),
                ..top.clone()
            }
        };

        for name in &names {
            side.remove(name);
        }
        side.insert(rule.to_owned(), merged);
    }
}

fn shorthand_value(top: &str, right: &str, bottom: &str, left: &str) -> String {
    if top == right && right == bottom && bottom == left {
        top.to_owned()
    } else if left == right {
        if top == bottom {
            format!("{top} {left}")
        } else {
            format!("{top} {left} {bottom}")
        }
    } else {
        format!("{top} {right} {bottom} {left}")
    }
}

/// `white-space` values that preserve whitespace.
const PRESERVING_WHITE_SPACE: &[&str] = &["pre", "pre-wrap", "pre-line", "break-spaces"];

/// Whether whitespace inside `element` is rendered as written.
pub fn preserves_whitespace(styles: &dyn StyleSource, element: NodeId) -> bool {
    styles
        .computed_style(element)
        .and_then(|s| s.get("white-space"))
        .is_some_and(|v| PRESERVING_WHITE_SPACE.contains(&v.trim()))
}
