//! Arena-based DOM snapshot.
//!
//! Both sides of a comparison are stored as an [`indextree`] arena. Node identity is
//! the arena [`NodeId`], which is what every engine side-table is keyed by: two
//! elements that look identical are still two distinct entries.
//!
//! Documents come from [`parse`] (html5ever tree construction, browser-compatible
//! error recovery) or are assembled directly with [`Document::new`] and the
//! `append_*` builders.

use html5ever::tree_builder::{ElemName, ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{Attribute, LocalName, QualName, local_name, ns, parse_document};
use indexmap::IndexMap;
use indextree::{Arena, NodeId};
use std::borrow::Cow;
use std::cell::RefCell;
use tendril::{StrTendril, TendrilSink};

/// A read-only document snapshot.
#[derive(Debug, Clone)]
pub struct Document {
    /// Every node of the snapshot
    pub arena: Arena<NodeData>,

    /// The `<html>` element for parsed documents, the builder root otherwise
    pub root: NodeId,
}

impl Document {
    /// Create a document with a single root element.
    pub fn new(root_tag: &str) -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(NodeData::element(root_tag, std::iter::empty()));
        Document { arena, root }
    }

    /// Get immutable reference to node data
    pub fn get(&self, id: NodeId) -> &NodeData {
        self.arena[id].get()
    }

    /// Iterate children of a node
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.children(&self.arena)
    }

    /// Parent of a node, if it has one.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].parent()
    }

    /// Element data, if the node is an element.
    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.get(id).kind {
            NodeKind::Element(elem) => Some(elem),
            _ => None,
        }
    }

    /// Lowercase tag name, if the node is an element.
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|elem| elem.tag.as_ref())
    }

    /// Attribute value on an element.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)
            .and_then(|elem| elem.attrs.get(name))
            .map(|v| v.as_ref())
    }

    /// Text content, if the node is a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.get(id).kind {
            NodeKind::Text(t) => Some(t.as_ref()),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.get(id).kind, NodeKind::Element(_))
    }

    /// Get the `<body>` element if present
    pub fn body(&self) -> Option<NodeId> {
        self.child_element(self.root, "body")
    }

    fn child_element(&self, parent: NodeId, tag: &str) -> Option<NodeId> {
        parent
            .children(&self.arena)
            .find(|&id| self.tag(id) == Some(tag))
    }

    /// Append a new element under `parent`. Tag names are stored lowercase.
    pub fn append_element<'a, I>(&mut self, parent: NodeId, tag: &str, attrs: I) -> NodeId
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let node = self.arena.new_node(NodeData::element(tag, attrs));
        parent.append(node, &mut self.arena);
        node
    }

    /// Append a text node under `parent`.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let node = self.arena.new_node(NodeData {
            kind: NodeKind::Text(StrTendril::from(text)),
            ns: Namespace::Html,
        });
        parent.append(node, &mut self.arena);
        node
    }

    /// Append a comment node under `parent`.
    pub fn append_comment(&mut self, parent: NodeId, text: &str) -> NodeId {
        let node = self.arena.new_node(NodeData {
            kind: NodeKind::Comment(StrTendril::from(text)),
            ns: Namespace::Html,
        });
        parent.append(node, &mut self.arena);
        node
    }

    /// Serialize a node and its subtree.
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut output = String::new();
        self.serialize_node(&mut output, id);
        output
    }

    fn serialize_node(&self, out: &mut String, node_id: NodeId) {
        match &self.get(node_id).kind {
            NodeKind::Document => {
                for child_id in node_id.children(&self.arena) {
                    self.serialize_node(out, child_id);
                }
            }
            NodeKind::Element(elem) => self.serialize_element(out, node_id, elem),
            NodeKind::Text(text) => {
                for c in text.as_ref().chars() {
                    match c {
                        '&' => out.push_str("&amp;"),
                        '<' => out.push_str("&lt;"),
                        '>' => out.push_str("&gt;"),
                        _ => out.push(c),
                    }
                }
            }
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text.as_ref());
                out.push_str("-->");
            }
        }
    }

    fn serialize_element(&self, out: &mut String, node_id: NodeId, elem: &ElementData) {
        let tag = elem.tag.as_ref();

        out.push('<');
        out.push_str(tag);
        for (name, value) in &elem.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            for c in value.as_ref().chars() {
                match c {
                    '&' => out.push_str("&amp;"),
                    '"' => out.push_str("&quot;"),
                    '<' => out.push_str("&lt;"),
                    '>' => out.push_str("&gt;"),
                    _ => out.push(c),
                }
            }
            out.push('"');
        }
        out.push('>');

        if is_void_element(tag) {
            return;
        }

        for child_id in node_id.children(&self.arena) {
            self.serialize_node(out, child_id);
        }

        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
}

/// HTML5 void elements that never have closing tags
fn is_void_element(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

/// What goes in each arena slot
#[derive(Debug, Clone)]
pub struct NodeData {
    pub kind: NodeKind,
    pub ns: Namespace,
}

impl NodeData {
    fn element<'a, I>(tag: &str, attrs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        NodeData {
            kind: NodeKind::Element(ElementData {
                tag: StrTendril::from(tag.to_ascii_lowercase()),
                attrs: attrs
                    .into_iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), StrTendril::from(v)))
                    .collect(),
            }),
            ns: Namespace::Html,
        }
    }
}

/// Node types
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Document root (invisible, parent of `<html>`)
    Document,
    /// Element with tag and attributes
    Element(ElementData),
    /// Text content (StrTendril is refcounted - cheap to clone)
    Text(StrTendril),
    /// HTML comment
    Comment(StrTendril),
}

/// Element data (tag + attributes)
#[derive(Debug, Clone)]
pub struct ElementData {
    /// Lowercase tag name
    pub tag: StrTendril,

    /// Attributes in source order. Keys are String (to avoid clippy mutable_key_type).
    pub attrs: IndexMap<String, StrTendril>,
}

/// XML namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Html,
    Svg,
    MathMl,
}

impl Namespace {
    pub fn from_url(url: &str) -> Self {
        match url {
            "http://www.w3.org/2000/svg" => Namespace::Svg,
            "http://www.w3.org/1998/Math/MathML" => Namespace::MathMl,
            _ => Namespace::Html,
        }
    }
}

/// Parse an HTML document the way a browser would, recovering from errors.
pub fn parse(html: &str) -> Document {
    let sink = SnapshotSink::new();
    // html5ever creates subtendrils that share this buffer via refcounting
    let tendril = StrTendril::from(html);
    parse_document(sink, Default::default()).one(tendril)
}

/// Owned element name wrapper
#[derive(Debug, Clone)]
struct OwnedElemName(QualName);

impl ElemName for OwnedElemName {
    fn ns(&self) -> &html5ever::Namespace {
        &self.0.ns
    }

    fn local_name(&self) -> &LocalName {
        &self.0.local
    }
}

/// Writes html5ever tree construction straight into the arena.
struct SnapshotSink {
    arena: RefCell<Arena<NodeData>>,

    /// Document node (parent of `<html>`)
    document: NodeId,
}

impl SnapshotSink {
    fn new() -> Self {
        let mut arena = Arena::new();
        let document = arena.new_node(NodeData {
            kind: NodeKind::Document,
            ns: Namespace::Html,
        });

        SnapshotSink {
            arena: RefCell::new(arena),
            document,
        }
    }
}

impl TreeSink for SnapshotSink {
    type Handle = NodeId;
    type Output = Document;
    type ElemName<'a>
        = OwnedElemName
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        let arena = self.arena.into_inner();

        let root = self
            .document
            .children(&arena)
            .find(|&id| matches!(arena[id].get().kind, NodeKind::Element(_)))
            .unwrap_or(self.document);

        Document { arena, root }
    }

    fn parse_error(&self, _msg: Cow<'static, str>) {
        // html5ever recovers on its own
    }

    fn get_document(&self) -> Self::Handle {
        self.document
    }

    fn set_quirks_mode(&self, _mode: QuirksMode) {}

    fn same_node(&self, a: &Self::Handle, b: &Self::Handle) -> bool {
        a == b
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> OwnedElemName {
        let arena = self.arena.borrow();
        let node = arena[*target].get();

        if let NodeKind::Element(elem) = &node.kind {
            let ns = match node.ns {
                Namespace::Html => ns!(html),
                Namespace::Svg => ns!(svg),
                Namespace::MathMl => ns!(mathml),
            };

            OwnedElemName(QualName {
                prefix: None,
                ns,
                local: LocalName::from(elem.tag.as_ref()),
            })
        } else {
            OwnedElemName(QualName {
                prefix: None,
                ns: ns!(html),
                local: local_name!(""),
            })
        }
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<Attribute>,
        _flags: ElementFlags,
    ) -> Self::Handle {
        let tag = StrTendril::from(name.local.as_ref());
        let ns = Namespace::from_url(name.ns.as_ref());

        let attr_map: IndexMap<_, _> = attrs
            .into_iter()
            .map(|attr| (attr.name.local.to_string(), attr.value))
            .collect();

        self.arena.borrow_mut().new_node(NodeData {
            kind: NodeKind::Element(ElementData {
                tag,
                attrs: attr_map,
            }),
            ns,
        })
    }

    fn create_comment(&self, text: StrTendril) -> Self::Handle {
        self.arena.borrow_mut().new_node(NodeData {
            kind: NodeKind::Comment(text),
            ns: Namespace::Html,
        })
    }

    fn create_pi(&self, _target: StrTendril, _data: StrTendril) -> Self::Handle {
        self.arena.borrow_mut().new_node(NodeData {
            kind: NodeKind::Comment(StrTendril::new()),
            ns: Namespace::Html,
        })
    }

    fn append(&self, parent: &Self::Handle, child: NodeOrText<Self::Handle>) {
        let mut arena = self.arena.borrow_mut();
        match child {
            NodeOrText::AppendNode(node) => {
                parent.append(node, &mut arena);
            }
            NodeOrText::AppendText(text) => {
                // Merge with a preceding text node, as browsers do
                let last_child_id = parent.children(&arena).next_back();

                if let Some(last_child) = last_child_id
                    && let NodeKind::Text(existing) = &mut arena[last_child].get_mut().kind
                {
                    existing.push_tendril(&text);
                    return;
                }

                let text_node = arena.new_node(NodeData {
                    kind: NodeKind::Text(text),
                    ns: Namespace::Html,
                });
                parent.append(text_node, &mut arena);
            }
        }
    }

    fn append_before_sibling(&self, sibling: &Self::Handle, new_node: NodeOrText<Self::Handle>) {
        let mut arena = self.arena.borrow_mut();
        match new_node {
            NodeOrText::AppendNode(node) => {
                sibling.insert_before(node, &mut arena);
            }
            NodeOrText::AppendText(text) => {
                let text_node = arena.new_node(NodeData {
                    kind: NodeKind::Text(text),
                    ns: Namespace::Html,
                });
                sibling.insert_before(text_node, &mut arena);
            }
        }
    }

    fn append_based_on_parent_node(
        &self,
        element: &Self::Handle,
        prev_element: &Self::Handle,
        child: NodeOrText<Self::Handle>,
    ) {
        let has_parent = self.arena.borrow()[*element].parent().is_some();
        if has_parent {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    // Snapshots compare from an element root; the doctype plays no part
    fn append_doctype_to_document(
        &self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        // Template contents live directly under the <template> element
        *target
    }

    fn add_attrs_if_missing(&self, target: &Self::Handle, attrs: Vec<Attribute>) {
        let mut arena = self.arena.borrow_mut();
        if let NodeKind::Element(elem) = &mut arena[*target].get_mut().kind {
            for attr in attrs {
                elem.attrs
                    .entry(attr.name.local.to_string())
                    .or_insert(attr.value);
            }
        }
    }

    fn remove_from_parent(&self, target: &Self::Handle) {
        target.detach(&mut self.arena.borrow_mut());
    }

    fn reparent_children(&self, node: &Self::Handle, new_parent: &Self::Handle) {
        let mut arena = self.arena.borrow_mut();
        let children: Vec<NodeId> = node.children(&arena).collect();
        for child in children {
            child.detach(&mut arena);
            new_parent.append(child, &mut arena);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_html() {
        let doc = parse("<html><body><p>Hello</p></body></html>");

        assert_eq!(doc.tag(doc.root), Some("html"));

        let body = doc.body().expect("should have body");
        let p = doc.children(body).next().expect("body should have child");
        assert_eq!(doc.tag(p), Some("p"));

        let text = doc.children(p).next().expect("p should have text");
        assert_eq!(doc.text(text), Some("Hello"));
        assert_eq!(doc.parent(text), Some(p));
    }

    #[test]
    fn test_parse_with_attributes_keeps_source_order() {
        let doc = parse(r#"<html><body><div id="main" class="container">Content</div></body></html>"#);

        let body = doc.body().expect("should have body");
        let div = doc.children(body).next().expect("body should have div");
        let names: Vec<&str> = doc
            .element(div)
            .expect("div is an element")
            .attrs
            .keys()
            .map(String::as_str)
            .collect();

        assert_eq!(names, ["id", "class"]);
        assert_eq!(doc.attr(div, "class"), Some("container"));
    }

    #[test]
    fn test_parse_comment() {
        let doc = parse("<html><body><!-- note --></body></html>");
        let body = doc.body().expect("should have body");
        let comment = doc.children(body).next().expect("body should have comment");
        assert!(matches!(doc.get(comment).kind, NodeKind::Comment(_)));
    }

    #[test]
    fn test_builders_lowercase_tags() {
        let mut doc = Document::new("BODY");
        let div = doc.append_element(doc.root, "DIV", [("Class", "a")]);
        doc.append_text(div, "hi");

        assert_eq!(doc.tag(doc.root), Some("body"));
        assert_eq!(doc.tag(div), Some("div"));
        assert_eq!(doc.attr(div, "class"), Some("a"));
        assert_eq!(doc.outer_html(div), r#"<div class="a">hi</div>"#);
    }

    #[test]
    fn test_outer_html_escaping_and_void_elements() {
        let doc = parse("<html><body><div>&lt;b&gt; &amp;<br></div></body></html>");
        let body = doc.body().expect("should have body");
        let div = doc.children(body).next().expect("body should have div");
        assert_eq!(doc.outer_html(div), "<div>&lt;b&gt; &amp;<br></div>");
    }
}
