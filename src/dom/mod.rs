//! Arena-backed document tree.
//!
//! Pages and preview fragments are held as a flat `Vec` of node slots and
//! addressed by [`NodeId`]. Detached nodes stay in the arena, so a `NodeId`
//! never dangles; [`Document::is_attached`] tells whether it is still
//! reachable from the root.

use scraper::{ElementRef, Html, Node};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attrs: Vec<(String, String)>,
}

impl Element {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|entry| entry == class))
    }

    fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(existing) = self.attrs.iter_mut().find(|(key, _)| key == name) {
            existing.1 = value.to_owned();
        } else {
            self.attrs.push((name.to_owned(), value.to_owned()));
        }
    }

    fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(key, _)| key != name);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Slot {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
    root: NodeId,
    body: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty `<html><body></body></html>` document.
    pub fn new() -> Self {
        let mut document = Self {
            slots: vec![Slot {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
            body: NodeId(0),
        };
        let html = document.create_element("html");
        document.append_child(document.root, html);
        let body = document.create_element("body");
        document.append_child(html, body);
        document.body = body;
        document
    }

    pub fn parse(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let mut document = Self {
            slots: vec![Slot {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
            body: NodeId(0),
        };
        let html_id = document.import_element(document.root, parsed.root_element());

        let existing_body = document
            .descendants(html_id)
            .into_iter()
            .find(|id| document.element(*id).is_some_and(|el| el.name() == "body"));
        document.body = match existing_body {
            Some(body) => body,
            None => {
                let body = document.create_element("body");
                document.append_child(html_id, body);
                body
            }
        };
        document
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.slots[id.0].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.slots[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.slots[id.0].kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.0].children
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push(NodeKind::Element(Element::new(name)))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Text(text.into()))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.slots[child.0].parent = Some(parent);
        self.slots[parent.0].children.push(child);
    }

    /// Inserts `child` before `reference`; appends when `reference` is not a
    /// child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        self.detach(child);
        self.slots[child.0].parent = Some(parent);
        let children = &mut self.slots[parent.0].children;
        match children.iter().position(|id| *id == reference) {
            Some(position) => children.insert(position, child),
            None => children.push(child),
        }
    }

    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.slots[id.0].parent.take() {
            self.slots[parent.0].children.retain(|child| *child != id);
        }
    }

    pub fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.slots[id.0].children);
        for child in children {
            self.slots[child.0].parent = None;
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|element| element.attr(name))
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element(element) = &mut self.slots[id.0].kind {
            element.set_attr(name, value);
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let NodeKind::Element(element) = &mut self.slots[id.0].kind {
            element.remove_attr(name);
        }
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.element(id).is_some_and(|element| element.has_class(class))
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        if self.has_class(id, class) {
            return;
        }
        let classes = match self.attr(id, "class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {class}", existing.trim()),
            _ => class.to_owned(),
        };
        self.set_attr(id, "class", &classes);
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) {
        let Some(existing) = self.attr(id, "class") else {
            return;
        };
        let remaining = existing
            .split_whitespace()
            .filter(|entry| *entry != class)
            .collect::<Vec<_>>()
            .join(" ");
        if remaining.is_empty() {
            self.remove_attr(id, "class");
        } else {
            self.set_attr(id, "class", &remaining);
        }
    }

    /// Preorder walk of the subtree below `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut output = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            output.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        output
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |current| self.parent(*current))
    }

    /// Nearest element, starting at `id` itself, matching `predicate`.
    pub fn closest(&self, id: NodeId, predicate: impl Fn(&Element) -> bool) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|candidate| self.element(*candidate).is_some_and(&predicate))
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root || self.ancestors(id).any(|ancestor| ancestor == self.root)
    }

    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(text) = self.text(id) {
            return text.to_owned();
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|node| self.text(node))
            .collect()
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut output = String::new();
        let raw = self
            .element(id)
            .is_some_and(|element| RAW_TEXT_ELEMENTS.contains(&element.name()));
        for child in self.children(id) {
            self.write_node(&mut output, *child, raw);
        }
        output
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut output = String::new();
        self.write_node(&mut output, id, false);
        output
    }

    fn write_node(&self, output: &mut String, id: NodeId, raw_text: bool) {
        match self.kind(id) {
            NodeKind::Root => output.push_str(&self.inner_html(id)),
            NodeKind::Text(text) if raw_text => output.push_str(text),
            NodeKind::Text(text) => output.push_str(&escape_text(text)),
            NodeKind::Comment(comment) => {
                output.push_str("<!--");
                output.push_str(comment);
                output.push_str("-->");
            }
            NodeKind::Element(element) => {
                output.push('<');
                output.push_str(element.name());
                for (key, value) in element.attrs() {
                    output.push(' ');
                    output.push_str(key);
                    output.push_str("=\"");
                    output.push_str(&escape_attr(value));
                    output.push('"');
                }
                output.push('>');
                if VOID_ELEMENTS.contains(&element.name()) {
                    return;
                }
                output.push_str(&self.inner_html(id));
                output.push_str("</");
                output.push_str(element.name());
                output.push('>');
            }
        }
    }

    /// Parses `html` as a fragment and appends its nodes under `parent`.
    pub fn append_html(&mut self, parent: NodeId, html: &str) -> Vec<NodeId> {
        let fragment = Html::parse_fragment(html);
        let mut inserted = Vec::new();
        for child in fragment.root_element().children() {
            match child.value() {
                Node::Text(text) => {
                    let raw: &str = text;
                    let id = self.create_text(raw);
                    self.append_child(parent, id);
                    inserted.push(id);
                }
                Node::Element(_) => {
                    if let Some(element) = ElementRef::wrap(child) {
                        inserted.push(self.import_element(parent, element));
                    }
                }
                _ => {}
            }
        }
        inserted
    }

    /// Copies a parsed `scraper` element subtree under `parent`.
    pub fn import_element(&mut self, parent: NodeId, source: ElementRef<'_>) -> NodeId {
        let mut element = Element::new(source.value().name());
        for (key, value) in source.value().attrs() {
            element.set_attr(key, value);
        }
        let id = self.push(NodeKind::Element(element));
        self.append_child(parent, id);

        for child in source.children() {
            match child.value() {
                Node::Text(text) => {
                    let raw: &str = text;
                    let text_id = self.create_text(raw);
                    self.append_child(id, text_id);
                }
                Node::Comment(comment) => {
                    let raw: &str = comment;
                    let comment_id = self.push(NodeKind::Comment(raw.to_owned()));
                    self.append_child(id, comment_id);
                }
                Node::Element(_) => {
                    if let Some(child_element) = ElementRef::wrap(child) {
                        self.import_element(id, child_element);
                    }
                }
                _ => {}
            }
        }
        id
    }

    pub fn replace_text(&mut self, id: NodeId, text: impl Into<String>) {
        if let NodeKind::Text(existing) = &mut self.slots[id.0].kind {
            *existing = text.into();
        }
    }

    /// Replaces all children of `id` with a single text node.
    pub fn set_text_content(&mut self, id: NodeId, text: impl Into<String>) {
        self.clear_children(id);
        let text = self.create_text(text);
        self.append_child(id, text);
    }

    /// All element nodes under `scope` (inclusive) satisfying `predicate`.
    pub fn select(&self, scope: NodeId, predicate: impl Fn(&Element) -> bool) -> Vec<NodeId> {
        std::iter::once(scope)
            .chain(self.descendants(scope))
            .filter(|id| self.element(*id).is_some_and(&predicate))
            .collect()
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
