//! Canonical node signatures.
//!
//! A signature is `<tag attrs>text</tag>` with attributes sorted by name and the
//! immediate text children joined and whitespace-collapsed. Two elements with the
//! same signature are treated as interchangeable when matching.

use crate::dom::Document;
use indextree::NodeId;

/// Attributes whose internal whitespace is insignificant.
pub const WHITESPACE_NORMALIZED_ATTRS: &[&str] = &["class"];

/// A computed signature and its cached sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// `<tag attrs>text</tag>`
    pub full: String,
    /// `<tag attrs>`, used for style-change deduplication
    pub tag_signature: String,
    /// Lowercase tag name
    pub tag: String,
    /// ` a="1" b="2"` (leading space per attribute, sorted)
    pub attr_section: String,
    /// Immediate text children, collapsed and trimmed
    pub text_section: String,
}

impl Signature {
    /// Compute the signature of an element. Non-elements get an empty tag.
    pub fn compute(doc: &Document, id: NodeId) -> Self {
        let tag = doc.tag(id).unwrap_or_default().to_ascii_lowercase();
        let attr_section = attr_section(doc, id);
        let text_section = text_section(doc, id);
        let tag_signature = format!("<{tag}{attr_section}>");
        let full = format!("{tag_signature}{text_section}</{tag}>");

        Signature {
            full,
            tag_signature,
            tag,
            attr_section,
            text_section,
        }
    }

    /// How many of tag, attributes and text agree with `other`.
    pub fn similarity(&self, other: &Signature) -> Similarity {
        Similarity {
            tag: self.tag == other.tag,
            attrs: self.attr_section == other.attr_section,
            text: self.text_section == other.text_section,
        }
    }
}

/// Per-aspect equality of two signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Similarity {
    pub tag: bool,
    pub attrs: bool,
    pub text: bool,
}

impl Similarity {
    pub fn score(self) -> u8 {
        self.tag as u8 + self.attrs as u8 + self.text as u8
    }

    pub fn is_identical(self) -> bool {
        self.score() == 3
    }
}

fn attr_section(doc: &Document, id: NodeId) -> String {
    let Some(elem) = doc.element(id) else {
        return String::new();
    };

    let mut names: Vec<&str> = elem.attrs.keys().map(String::as_str).collect();
    names.sort_unstable();

    let mut out = String::new();
    for name in names {
        let raw = elem.attrs.get(name).map(|v| v.as_ref()).unwrap_or_default();
        let value = if WHITESPACE_NORMALIZED_ATTRS.contains(&name) {
            collapse_whitespace(raw)
        } else {
            raw.to_owned()
        };
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&value);
        out.push('"');
    }
    out
}

fn text_section(doc: &Document, id: NodeId) -> String {
    let joined = doc
        .children(id)
        .filter_map(|child| doc.text(child))
        .collect::<Vec<_>>()
        .join(" ");
    collapse_whitespace(&joined)
}

/// Collapse runs of whitespace into a single space and trim both ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether two strings are equal once whitespace runs are collapsed.
pub fn same_ignoring_spaces(a: &str, b: &str) -> bool {
    a.split_whitespace().eq(b.split_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse;

    fn first_in_body(html: &str) -> (Document, NodeId) {
        let doc = parse(html);
        let body = doc.body().expect("body");
        let first = doc
            .children(body)
            .find(|&c| doc.is_element(c))
            .expect("element in body");
        (doc, first)
    }

    #[test]
    fn attributes_sorted_text_trimmed() {
        let (doc, foo) = first_in_body(
            r#"<html><body><div id="foo" class="bar"> before <b>x</b> after </div></body></html>"#,
        );
        let sig = Signature::compute(&doc, foo);

        assert_eq!(sig.full, r#"<div class="bar" id="foo">before after</div>"#);
        assert_eq!(sig.tag_signature, r#"<div class="bar" id="foo">"#);
        assert_eq!(sig.attr_section, r#" class="bar" id="foo""#);
        assert_eq!(sig.text_section, "before after");
    }

    #[test]
    fn class_whitespace_is_normalized() {
        let (a, ia) = first_in_body(r#"<html><body><p class="  x   y ">t</p></body></html>"#);
        let (b, ib) = first_in_body(r#"<html><body><p class="x y">t</p></body></html>"#);
        assert_eq!(Signature::compute(&a, ia), Signature::compute(&b, ib));
    }

    #[test]
    fn other_attribute_whitespace_is_kept() {
        let (a, ia) = first_in_body(r#"<html><body><p title="x  y">t</p></body></html>"#);
        let (b, ib) = first_in_body(r#"<html><body><p title="x y">t</p></body></html>"#);
        assert_ne!(Signature::compute(&a, ia).full, Signature::compute(&b, ib).full);
    }

    #[test]
    fn similarity_counts_aspects() {
        let (a, ia) = first_in_body(r#"<html><body><p id="a">t</p></body></html>"#);
        let (b, ib) = first_in_body(r#"<html><body><p id="b">t</p></body></html>"#);
        let sim = Signature::compute(&a, ia).similarity(&Signature::compute(&b, ib));
        assert_eq!(sim.score(), 2);
        assert!(!sim.attrs);
        assert!(!sim.is_identical());
    }

    #[test]
    fn whitespace_helpers() {
        assert_eq!(collapse_whitespace("  a \n\t b  "), "a b");
        assert!(same_ignoring_spaces("a b  c", " a b\nc "));
        assert!(!same_ignoring_spaces("a b", "ab"));
    }
}
