//! Lossless markup tree
//!
//! Every event read from the source is kept as an owned node in an arena, so
//! serialization reproduces content the table model never looked at. Nodes
//! are addressed by [`NodeId`]; ids stay valid for the lifetime of the
//! document, including across [`Clone`].

use crate::core::types::{MemoryError, MemoryResult};
use quick_xml::events::{BytesCData, BytesDecl, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

const BOM: char = '\u{feff}';

fn markup_error(e: impl std::fmt::Display) -> MemoryError {
    MemoryError::table_parse(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub enum Node {
    Element {
        start: BytesStart<'static>,
        /// Written as `<name/>` while it has no children
        self_closing: bool,
        children: Vec<NodeId>,
    },
    Text(BytesText<'static>),
    CData(BytesCData<'static>),
    Comment(BytesText<'static>),
    Decl(BytesDecl<'static>),
    ProcessingInstruction(BytesText<'static>),
    DocType(BytesText<'static>),
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    nodes: Vec<Node>,
    /// Top-level nodes in document order
    top: Vec<NodeId>,
    bom: bool,
}

impl Document {
    /// Parses markup, keeping every event
    pub fn parse(text: &str) -> MemoryResult<Self> {
        let (text, bom) = match text.strip_prefix(BOM) {
            Some(rest) => (rest, true),
            None => (text, false),
        };

        let mut reader = Reader::from_str(text);
        reader.trim_text(false);

        let mut doc = Document {
            bom,
            ..Document::default()
        };
        let mut open: Vec<NodeId> = Vec::new();

        loop {
            let event = reader
                .read_event()
                .map_err(|e| markup_error(format!("at byte {}: {}", reader.buffer_position(), e)))?;
            let node = match event {
                Event::Eof => break,
                Event::Start(start) => {
                    let id = doc.push(Node::Element {
                        start: start.into_owned(),
                        self_closing: false,
                        children: Vec::new(),
                    });
                    doc.attach(open.last().copied(), id);
                    open.push(id);
                    continue;
                }
                Event::End(end) => {
                    if open.pop().is_none() {
                        return Err(markup_error(format!(
                            "unexpected closing tag </{}>",
                            String::from_utf8_lossy(end.name().as_ref())
                        )));
                    }
                    continue;
                }
                Event::Empty(start) => Node::Element {
                    start: start.into_owned(),
                    self_closing: true,
                    children: Vec::new(),
                },
                Event::Text(text) => Node::Text(text.into_owned()),
                Event::CData(cdata) => Node::CData(cdata.into_owned()),
                Event::Comment(comment) => Node::Comment(comment.into_owned()),
                Event::Decl(decl) => Node::Decl(decl.into_owned()),
                Event::PI(pi) => Node::ProcessingInstruction(pi.into_owned()),
                Event::DocType(doctype) => Node::DocType(doctype.into_owned()),
            };
            let id = doc.push(node);
            doc.attach(open.last().copied(), id);
        }

        if let Some(&id) = open.last() {
            return Err(markup_error(format!("unclosed element <{}>", doc.name(id))));
        }
        Ok(doc)
    }

    /// An empty document with an XML declaration
    pub fn with_declaration() -> Self {
        let mut doc = Document::default();
        let decl = doc.push(Node::Decl(BytesDecl::new("1.0", Some("utf-8"), None)));
        doc.top.push(decl);
        let newline = doc.new_text("\n");
        doc.top.push(newline);
        doc
    }

    pub fn to_bytes(&self) -> MemoryResult<Vec<u8>> {
        let mut out = Vec::new();
        if self.bom {
            let mut buf = [0u8; 4];
            out.extend_from_slice(BOM.encode_utf8(&mut buf).as_bytes());
        }
        let mut writer = Writer::new(out);
        for &id in &self.top {
            self.write_node(&mut writer, id)?;
        }
        Ok(writer.into_inner())
    }

    pub fn to_string(&self) -> MemoryResult<String> {
        String::from_utf8(self.to_bytes()?).map_err(markup_error)
    }

    fn write_node(&self, writer: &mut Writer<Vec<u8>>, id: NodeId) -> MemoryResult<()> {
        let event = match &self.nodes[id.0] {
            Node::Element {
                start,
                self_closing,
                children,
            } => {
                if *self_closing && children.is_empty() {
                    writer.write_event(Event::Empty(start.borrow())).map_err(markup_error)?;
                } else {
                    writer.write_event(Event::Start(start.borrow())).map_err(markup_error)?;
                    for &child in children {
                        self.write_node(writer, child)?;
                    }
                    writer.write_event(Event::End(start.to_end())).map_err(markup_error)?;
                }
                return Ok(());
            }
            Node::Text(text) => Event::Text(text.clone()),
            Node::CData(cdata) => Event::CData(cdata.clone()),
            Node::Comment(comment) => Event::Comment(comment.clone()),
            Node::Decl(decl) => Event::Decl(decl.clone()),
            Node::ProcessingInstruction(pi) => Event::PI(pi.clone()),
            Node::DocType(doctype) => Event::DocType(doctype.clone()),
        };
        writer.write_event(event).map_err(markup_error)
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    fn attach(&mut self, parent: Option<NodeId>, child: NodeId) {
        match parent {
            Some(parent) => self.append_child(parent, child),
            None => self.top.push(child),
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// First top-level element
    pub fn root_element(&self) -> Option<NodeId> {
        self.top.iter().copied().find(|&id| self.is_element(id))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0], Node::Element { .. })
    }

    /// Element name; empty for non-element nodes
    pub fn name(&self, id: NodeId) -> String {
        match &self.nodes[id.0] {
            Node::Element { start, .. } => String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            _ => String::new(),
        }
    }

    pub fn is_named(&self, id: NodeId, name: &str) -> bool {
        match &self.nodes[id.0] {
            Node::Element { start, .. } => start.name().as_ref() == name.as_bytes(),
            _ => false,
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0] {
            Node::Element { children, .. } => children,
            _ => &[],
        }
    }

    pub fn child_elements<'d>(&'d self, id: NodeId, name: &'d str) -> impl Iterator<Item = NodeId> + 'd {
        self.children(id)
            .iter()
            .copied()
            .filter(move |&child| self.is_named(child, name))
    }

    pub fn first_child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.child_elements(id, name).next()
    }

    /// Follows a path of child element names
    pub fn find_path(&self, id: NodeId, path: &[&str]) -> Option<NodeId> {
        path.iter()
            .try_fold(id, |current, name| self.first_child(current, name))
    }

    /// First element named `name` in document order, including `id` itself
    pub fn descendant(&self, id: NodeId, name: &str) -> Option<NodeId> {
        if self.is_named(id, name) {
            return Some(id);
        }
        self.children(id)
            .iter()
            .find_map(|&child| self.descendant(child, name))
    }

    /// Unescaped attribute value
    pub fn attribute(&self, id: NodeId, key: &str) -> MemoryResult<Option<String>> {
        let Node::Element { start, .. } = &self.nodes[id.0] else {
            return Ok(None);
        };
        for attr in start.attributes().with_checks(false) {
            let attr = attr.map_err(markup_error)?;
            if attr.key.as_ref() == key.as_bytes() {
                let value = attr.unescape_value().map_err(markup_error)?;
                return Ok(Some(value.into_owned()));
            }
        }
        Ok(None)
    }

    /// Concatenated text and CDATA content of the direct children
    pub fn text(&self, id: NodeId) -> MemoryResult<String> {
        let mut out = String::new();
        for &child in self.children(id) {
            match &self.nodes[child.0] {
                Node::Text(text) => out.push_str(&text.unescape().map_err(markup_error)?),
                Node::CData(cdata) => out.push_str(&String::from_utf8_lossy(cdata)),
                _ => {}
            }
        }
        Ok(out)
    }

    /// Trimmed text of the first child element named `name`
    pub fn child_text(&self, id: NodeId, name: &str) -> MemoryResult<Option<String>> {
        match self.first_child(id, name) {
            Some(child) => Ok(Some(self.text(child)?.trim().to_string())),
            None => Ok(None),
        }
    }

    pub fn new_element(&mut self, name: &str) -> NodeId {
        self.push(Node::Element {
            start: BytesStart::new(name.to_string()),
            self_closing: true,
            children: Vec::new(),
        })
    }

    pub fn new_text(&mut self, text: &str) -> NodeId {
        self.push(Node::Text(BytesText::new(text).into_owned()))
    }

    /// `<name>text</name>`
    pub fn new_text_element(&mut self, name: &str, text: &str) -> NodeId {
        let element = self.new_element(name);
        self.set_text(element, text);
        element
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if let Node::Element {
            children,
            self_closing,
            ..
        } = &mut self.nodes[parent.0]
        {
            children.push(child);
            *self_closing = false;
        }
    }

    pub fn set_children(&mut self, parent: NodeId, new_children: Vec<NodeId>) {
        if let Node::Element {
            children,
            self_closing,
            ..
        } = &mut self.nodes[parent.0]
        {
            *self_closing &= new_children.is_empty();
            *children = new_children;
        }
    }

    /// Swaps `old` for `new` in `parent` (or at the top level when `None`)
    pub fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: NodeId) {
        let list = match parent {
            Some(parent) => match &mut self.nodes[parent.0] {
                Node::Element { children, .. } => children,
                _ => return,
            },
            None => &mut self.top,
        };
        if let Some(slot) = list.iter_mut().find(|slot| **slot == old) {
            *slot = new;
        }
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        if let Node::Element { children, .. } = &mut self.nodes[parent.0] {
            children.retain(|&c| c != child);
        }
    }

    fn is_whitespace(&self, id: NodeId) -> bool {
        match &self.nodes[id.0] {
            Node::Text(text) => text.iter().all(u8::is_ascii_whitespace),
            _ => false,
        }
    }

    /// Appends `child` to an element sitting at `depth`
    ///
    /// When the parent already holds text (typically original indentation),
    /// the child goes before the trailing whitespace with its own line.
    /// Element-only parents are left for [`Document::indent`].
    pub fn append_indented(&mut self, parent: NodeId, child: NodeId, depth: usize) {
        let children = self.children(parent).to_vec();
        if !children.iter().any(|&c| matches!(self.nodes[c.0], Node::Text(_))) {
            self.append_child(parent, child);
            return;
        }

        let spacer = self.new_text(&format!("\n{}", "  ".repeat(depth + 1)));
        let mut updated = children;
        let at = match updated.last() {
            Some(&last) if self.is_whitespace(last) => updated.len() - 1,
            _ => updated.len(),
        };
        updated.insert(at, child);
        updated.insert(at, spacer);
        self.set_children(parent, updated);
    }

    /// Removes `child` together with the whitespace right before it
    pub fn remove_with_space(&mut self, parent: NodeId, child: NodeId) {
        let mut children = self.children(parent).to_vec();
        let Some(at) = children.iter().position(|&c| c == child) else {
            return;
        };
        children.remove(at);
        if at > 0 && self.is_whitespace(children[at - 1]) {
            children.remove(at - 1);
        }
        self.set_children(parent, children);
    }

    /// Replaces all children with a single text node
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        let text = self.new_text(text);
        self.set_children(id, vec![text]);
    }

    /// Sets or removes an attribute, keeping the others in place
    pub fn set_attribute(&mut self, id: NodeId, key: &str, value: Option<&str>) -> MemoryResult<()> {
        let Node::Element { start, .. } = &self.nodes[id.0] else {
            return Ok(());
        };

        let mut updated = BytesStart::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
        let mut replaced = false;
        for attr in start.attributes().with_checks(false) {
            let attr = attr.map_err(markup_error)?;
            if attr.key.as_ref() == key.as_bytes() {
                replaced = true;
                if let Some(value) = value {
                    updated.push_attribute((key, value));
                }
            } else {
                updated.push_attribute(attr);
            }
        }
        if !replaced {
            if let Some(value) = value {
                updated.push_attribute((key, value));
            }
        }
        let updated = updated.into_owned();

        if let Node::Element { start, .. } = &mut self.nodes[id.0] {
            *start = updated;
        }
        Ok(())
    }

    /// Copies a subtree; the copy gets fresh ids
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let node = self.nodes[id.0].clone();
        match node {
            Node::Element {
                start,
                self_closing,
                children,
            } => {
                let children = children.into_iter().map(|child| self.deep_clone(child)).collect();
                self.push(Node::Element {
                    start,
                    self_closing,
                    children,
                })
            }
            other => self.push(other),
        }
    }

    /// Indents element-only content below `id` with two spaces per level
    ///
    /// Elements that already carry text (original whitespace included) are
    /// left as they are.
    pub fn indent(&mut self, id: NodeId, depth: usize) {
        let children = self.children(id).to_vec();
        if children.is_empty() {
            return;
        }
        if children.iter().any(|&child| !self.is_element(child)) {
            return;
        }

        let mut spaced = Vec::with_capacity(children.len() * 2 + 1);
        let inner = format!("\n{}", "  ".repeat(depth + 1));
        for child in children {
            spaced.push(self.new_text(&inner));
            spaced.push(child);
            self.indent(child, depth + 1);
        }
        let outer = format!("\n{}", "  ".repeat(depth));
        spaced.push(self.new_text(&outer));
        self.set_children(id, spaced);
    }

    /// Appends a top-level node
    pub fn push_top(&mut self, id: NodeId) {
        self.top.push(id);
    }
}
