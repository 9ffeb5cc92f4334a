//! Exclusion rules.
//!
//! A rule without an `ignore` section removes every matching element (and its
//! subtree) from the comparison. A rule with an `ignore` section keeps the element
//! but allows some of its changes to go unreported.
//!
//! Rules arrive as JSON:
//!
//! ```json
//! [
//!   {"match": {"tag": "script"}},
//!   {"match": {"tag": "a"}, "ignore": {"attributes": {"class": "*", "href": "\\?v=(\\d+)"}}}
//! ]
//! ```
//!
//! `"ignore": "*"` is the same as leaving `ignore` out. Inside `attributes`,
//! `"*"` ignores the attribute entirely. Any other value is a case-insensitive
//! regular expression; the captured groups (or the whole match, for a pattern
//! without groups) are removed from both values before they are compared.

use crate::debug;
use crate::compare::CompareError;
use crate::dom::Document;
use facet::Facet;
use indextree::NodeId;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;

/// Allowance value meaning "ignore this attribute entirely".
pub const IGNORE_ENTIRELY: &str = "*";

/// One exclusion rule as written by the user.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct ExclusionSpec {
    #[facet(rename = "match")]
    pub matcher: MatchSpec,
    #[facet(default)]
    pub ignore: Option<Ignore>,
}

/// The `ignore` section of a rule.
#[derive(Debug, Clone, PartialEq, Facet)]
#[facet(untagged)]
#[repr(u8)]
pub enum Ignore {
    /// Only `"*"` is accepted: exclude the whole subtree
    All(String),
    Changes(IgnoreSpec),
}

/// Which elements a rule applies to.
#[derive(Debug, Clone, Default, PartialEq, Facet)]
pub struct MatchSpec {
    /// Tag name, matched case-insensitively
    #[facet(default)]
    pub tag: Option<String>,
    /// Attribute values that must all be present and equal
    #[facet(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Which changes of a matched element go unreported.
#[derive(Debug, Clone, Default, PartialEq, Facet)]
pub struct IgnoreSpec {
    /// Attribute name to `"*"` or a pattern. Absent means every change is ignored.
    #[facet(default)]
    pub attributes: Option<BTreeMap<String, String>>,
}

impl ExclusionSpec {
    /// A rule excluding every element with this tag.
    pub fn tag(tag: impl Into<String>) -> Self {
        ExclusionSpec {
            matcher: MatchSpec {
                tag: Some(tag.into()),
                attributes: BTreeMap::new(),
            },
            ignore: None,
        }
    }

    /// Additionally require an attribute value.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.matcher.attributes.insert(name.into(), value.into());
        self
    }

    /// Turn this into a change exclusion allowing `name` to differ.
    ///
    /// `allowance` is `"*"` or a pattern.
    pub fn ignoring_attribute(mut self, name: impl Into<String>, allowance: impl Into<String>) -> Self {
        if !matches!(self.ignore, Some(Ignore::Changes(_))) {
            self.ignore = Some(Ignore::Changes(IgnoreSpec::default()));
        }
        if let Some(Ignore::Changes(ignore)) = &mut self.ignore {
            ignore
                .attributes
                .get_or_insert_with(BTreeMap::new)
                .insert(name.into(), allowance.into());
        }
        self
    }

    /// Parse a JSON array of rules.
    pub fn list_from_json(json: &str) -> Result<Vec<ExclusionSpec>, CompareError> {
        facet_json::from_str(json).map_err(|e| CompareError::InvalidRulesJson {
            message: e.to_string(),
        })
    }
}

/// How a change exclusion treats one attribute.
#[derive(Debug, Clone)]
pub enum AttributeAllowance {
    Any,
    Pattern(Regex),
}

#[derive(Debug, Clone)]
struct Predicate {
    tag: Option<String>,
    attributes: Vec<(String, String)>,
}

impl Predicate {
    fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let Some(tag) = doc.tag(id) else {
            return false;
        };
        if let Some(want) = &self.tag
            && !want.eq_ignore_ascii_case(tag)
        {
            return false;
        }
        self.attributes
            .iter()
            .all(|(name, value)| doc.attr(id, name) == Some(value.as_str()))
    }
}

#[derive(Debug, Clone)]
struct ChangeRule {
    predicate: Predicate,
    /// `None` ignores every change of a matched element
    attributes: Option<Vec<(String, AttributeAllowance)>>,
}

/// Compiled, immutable rule table.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    subtree: Vec<Predicate>,
    changes: Vec<ChangeRule>,
}

impl ExclusionRules {
    /// Compile rules, failing on the first invalid pattern.
    pub fn compile(specs: &[ExclusionSpec]) -> Result<Self, CompareError> {
        let mut rules = ExclusionRules::default();

        for spec in specs {
            let predicate = Predicate {
                tag: spec.matcher.tag.clone(),
                attributes: spec
                    .matcher
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                    .collect(),
            };

            let ignore = match &spec.ignore {
                None => {
                    rules.subtree.push(predicate);
                    continue;
                }
                Some(Ignore::All(all)) if all == IGNORE_ENTIRELY => {
                    rules.subtree.push(predicate);
                    continue;
                }
                Some(Ignore::All(other)) => {
                    return Err(CompareError::InvalidRulesJson {
                        message: format!("\"ignore\" must be \"*\" or an object, got {other:?}"),
                    });
                }
                Some(Ignore::Changes(ignore)) => ignore,
            };

            let attributes = match &ignore.attributes {
                None => None,
                Some(map) => {
                    let mut compiled = Vec::with_capacity(map.len());
                    for (name, allowance) in map {
                        compiled.push((name.to_ascii_lowercase(), compile_allowance(name, allowance)?));
                    }
                    Some(compiled)
                }
            };

            rules.changes.push(ChangeRule {
                predicate,
                attributes,
            });
        }

        debug!(
            subtree = rules.subtree.len(),
            changes = rules.changes.len(),
            "compiled exclusion rules"
        );
        Ok(rules)
    }

    /// Parse and compile a JSON rule list.
    pub fn from_json(json: &str) -> Result<Self, CompareError> {
        Self::compile(&ExclusionSpec::list_from_json(json)?)
    }

    /// Whether the element and its subtree are left out of the comparison.
    pub fn excludes_subtree(&self, doc: &Document, id: NodeId) -> bool {
        self.subtree.iter().any(|p| p.matches(doc, id))
    }

    /// Whether every difference between `a` and `b` is covered by a change rule
    /// that matches `a`.
    pub fn allows_change(&self, doc_a: &Document, a: NodeId, doc_b: &Document, b: NodeId) -> bool {
        self.changes.iter().any(|rule| {
            rule.predicate.matches(doc_a, a)
                && match &rule.attributes {
                    None => true,
                    Some(allowances) => !attrs_differ(doc_a, a, doc_b, b, allowances),
                }
        })
    }
}

fn compile_allowance(name: &str, allowance: &str) -> Result<AttributeAllowance, CompareError> {
    if allowance == IGNORE_ENTIRELY {
        return Ok(AttributeAllowance::Any);
    }
    RegexBuilder::new(allowance)
        .case_insensitive(true)
        .build()
        .map(AttributeAllowance::Pattern)
        .map_err(|e| CompareError::InvalidPattern {
            attribute: name.to_owned(),
            pattern: allowance.to_owned(),
            message: e.to_string(),
        })
}

fn allowance_for<'a>(
    allowances: &'a [(String, AttributeAllowance)],
    name: &str,
) -> Option<&'a AttributeAllowance> {
    allowances
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, allowance)| allowance)
}

/// Whether any attribute change between `a` and `b` is not covered by `allowances`.
fn attrs_differ(
    doc_a: &Document,
    a: NodeId,
    doc_b: &Document,
    b: NodeId,
    allowances: &[(String, AttributeAllowance)],
) -> bool {
    let (Some(elem_a), Some(elem_b)) = (doc_a.element(a), doc_b.element(b)) else {
        return true;
    };

    for (name, value_a) in &elem_a.attrs {
        let value_a = value_a.as_ref();
        let value_b = elem_b.attrs.get(name).map(|v| v.as_ref());
        if value_b == Some(value_a) {
            continue;
        }

        match (allowance_for(allowances, name), value_b) {
            (Some(AttributeAllowance::Any), _) => {}
            (Some(AttributeAllowance::Pattern(re)), Some(value_b)) => {
                if strip_matched(value_a, re) != strip_matched(value_b, re) {
                    return true;
                }
            }
            // Unknown attribute, or removed under a pattern allowance
            _ => return true,
        }
    }

    // Attributes only B has must be ignored entirely
    elem_b.attrs.keys().any(|name| {
        !elem_a.attrs.contains_key(name)
            && !matches!(allowance_for(allowances, name), Some(AttributeAllowance::Any))
    })
}

/// Remove the first match's captured groups (or the whole match) from `value`.
pub(crate) fn strip_matched(value: &str, re: &Regex) -> String {
    let Some(caps) = re.captures(value) else {
        return value.to_owned();
    };

    let mut spans: Vec<_> = if caps.len() == 1 {
        caps.get(0).map(|m| m.range()).into_iter().collect()
    } else {
        caps.iter().skip(1).flatten().map(|m| m.range()).collect()
    };
    spans.sort_by_key(|span| span.start);

    let mut out = String::with_capacity(value.len());
    let mut at = 0;
    for span in spans {
        // Nested groups overlap their parent
        if span.start < at {
            at = at.max(span.end);
            continue;
        }
        out.push_str(&value[at..span.start]);
        at = span.end;
    }
    out.push_str(&value[at..]);
    out
}
