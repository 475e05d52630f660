//! Cheat-table writer
//!
//! A table that came from markup is written by cloning its document and
//! rebuilding only the sections marked dirty; everything else, unknown
//! elements and attributes included, passes through untouched. Inside a
//! rebuilt section, entries and structures that came from the document are
//! cloned from their original node and patched field by field. A table with
//! no document gets a fresh minimal one.

use super::model::{format_offset, CheatEntry, Structure, StructureElement, VariableType};
use super::xml::{Document, NodeId};
use super::{CheatTable, Sections, ROOT_ELEMENT, TABLE_VERSION};
use crate::core::types::{MemoryError, MemoryResult};
use std::collections::HashSet;

/// Element depths below the table root
const SECTION_DEPTH: usize = 1;
const ENTRY_DEPTH: usize = 2;

pub fn render(table: &CheatTable) -> MemoryResult<String> {
    let (mut doc, root, sections) = match &table.document {
        Some(original) => {
            let doc = original.clone();
            let root = doc
                .root_element()
                .and_then(|top| doc.descendant(top, ROOT_ELEMENT))
                .ok_or_else(|| MemoryError::table_parse("retained document lost its CheatTable element"))?;
            (doc, root, table.dirty)
        }
        None => {
            let mut doc = Document::with_declaration();
            let root = doc.new_element(ROOT_ELEMENT);
            doc.set_attribute(root, "CheatEngineTableVersion", Some(TABLE_VERSION))?;
            doc.push_top(root);
            let newline = doc.new_text("\n");
            doc.push_top(newline);
            (doc, root, Sections::all())
        }
    };

    let mut writer = SectionWriter {
        doc: &mut doc,
        root,
        table,
    };
    if sections.info {
        writer.info()?;
    }
    if sections.entries {
        writer.entries()?;
    }
    if sections.structures {
        writer.structures()?;
    }
    if sections.script {
        writer.script();
    }
    if sections.comments {
        writer.comments();
    }
    if table.document.is_none() {
        doc.indent(root, 0);
    }

    doc.to_string()
}

fn quoted(description: &str) -> String {
    format!("\"{}\"", description)
}

struct SectionWriter<'a> {
    doc: &'a mut Document,
    root: NodeId,
    table: &'a CheatTable,
}

impl SectionWriter<'_> {
    /// Existing child or a new empty one appended at `depth`
    fn ensure_child(&mut self, parent: NodeId, name: &str, depth: usize) -> NodeId {
        match self.doc.first_child(parent, name) {
            Some(child) => child,
            None => {
                let child = self.doc.new_element(name);
                self.doc.append_indented(parent, child, depth);
                child
            }
        }
    }

    fn set_child_text(&mut self, parent: NodeId, name: &str, text: &str, depth: usize) {
        match self.doc.first_child(parent, name) {
            Some(child) => self.doc.set_text(child, text),
            None => {
                let child = self.doc.new_text_element(name, text);
                self.doc.append_indented(parent, child, depth);
            }
        }
    }

    fn remove_children(&mut self, parent: NodeId, name: &str) {
        let found: Vec<NodeId> = self.doc.child_elements(parent, name).collect();
        for child in found {
            self.doc.remove_with_space(parent, child);
        }
    }

    fn info(&mut self) -> MemoryResult<()> {
        let table = self.table;
        let info = self.ensure_child(self.root, "CheatTableInfo", 0);
        self.set_child_text(info, "Title", &table.title, SECTION_DEPTH);
        self.doc.indent(info, SECTION_DEPTH);

        if !table.target_process.is_empty() || self.doc.first_child(self.root, "Options").is_some() {
            let options = self.ensure_child(self.root, "Options", 0);
            self.set_child_text(options, "TargetProcess", &table.target_process, SECTION_DEPTH);
            self.doc.indent(options, SECTION_DEPTH);
        }
        Ok(())
    }

    fn entries(&mut self) -> MemoryResult<()> {
        let table = self.table;
        let known: HashSet<&str> = table.entries.iter().map(|e| e.id.as_str()).collect();
        let mut emitted = HashSet::new();
        let mut top = Vec::new();
        for (index, entry) in table.entries.iter().enumerate() {
            let nested = entry
                .parent
                .as_deref()
                .is_some_and(|parent| parent != entry.id && known.contains(parent));
            if !nested {
                top.push(self.entry(index, ENTRY_DEPTH, &mut emitted)?);
            }
        }
        // Entries only reachable through a parent cycle
        for index in 0..table.entries.len() {
            if !emitted.contains(&index) {
                top.push(self.entry(index, ENTRY_DEPTH, &mut emitted)?);
            }
        }

        let container = self.ensure_child(self.root, "CheatEntries", 0);
        self.doc.set_children(container, top);
        self.doc.indent(container, SECTION_DEPTH);
        Ok(())
    }

    /// Builds the node for entry `index` and, recursively, its children
    fn entry(&mut self, index: usize, depth: usize, emitted: &mut HashSet<usize>) -> MemoryResult<NodeId> {
        emitted.insert(index);
        let table = self.table;
        let entry = &table.entries[index];

        let node = match entry.node.and_then(|node| table.entry_originals.get(&node).map(|o| (node, o))) {
            Some((original_node, original)) => {
                let node = self.doc.deep_clone(original_node);
                if !entry.same_content(original) {
                    self.patch_entry(node, original, entry, depth)?;
                }
                node
            }
            None => self.fresh_entry(entry)?,
        };

        let children: Vec<usize> = table
            .entries
            .iter()
            .enumerate()
            .filter(|(i, child)| {
                !emitted.contains(i) && child.id != entry.id && child.parent.as_deref() == Some(entry.id.as_str())
            })
            .map(|(i, _)| i)
            .collect();

        if children.is_empty() {
            self.remove_children(node, "CheatEntries");
        } else {
            let mut nested = Vec::with_capacity(children.len());
            for child in children {
                if !emitted.contains(&child) {
                    nested.push(self.entry(child, depth + 2, emitted)?);
                }
            }
            let container = self.ensure_child(node, "CheatEntries", depth);
            self.doc.set_children(container, nested);
            self.doc.indent(container, depth + 1);
        }
        Ok(node)
    }

    fn fresh_entry(&mut self, entry: &CheatEntry) -> MemoryResult<NodeId> {
        let node = self.doc.new_element("CheatEntry");
        let mut fields = vec![
            self.doc.new_text_element("ID", &entry.id),
            self.doc.new_text_element("Description", &quoted(&entry.description)),
        ];
        if entry.group_header {
            fields.push(self.doc.new_text_element("GroupHeader", "1"));
        }
        fields.push(self.doc.new_text_element("VariableType", entry.variable_type.as_str()));
        if let Some(address) = &entry.address {
            fields.push(self.doc.new_text_element("Address", &address.to_string()));
        }
        if !entry.offsets.is_empty() {
            fields.push(self.offsets(&entry.offsets));
        }
        if entry.last_value.is_some() || entry.enabled {
            fields.push(self.last_state(entry)?);
        }
        if let Some(keys) = &entry.hotkey {
            fields.push(self.hotkeys(keys)?);
        }
        if let Some(script) = &entry.script {
            let name = script_element(entry);
            fields.push(self.doc.new_text_element(name, script));
        }
        self.doc.set_children(node, fields);
        Ok(node)
    }

    fn offsets(&mut self, offsets: &[i64]) -> NodeId {
        let container = self.doc.new_element("Offsets");
        let items = offsets
            .iter()
            .map(|&o| self.doc.new_text_element("Offset", &format_offset(o)))
            .collect();
        self.doc.set_children(container, items);
        container
    }

    fn last_state(&mut self, entry: &CheatEntry) -> MemoryResult<NodeId> {
        let state = self.doc.new_element("LastState");
        if let Some(value) = &entry.last_value {
            self.doc.set_attribute(state, "Value", Some(value))?;
        }
        if entry.enabled {
            self.doc.set_attribute(state, "Activated", Some("1"))?;
        }
        Ok(state)
    }

    fn hotkeys(&mut self, keys: &str) -> MemoryResult<NodeId> {
        let hotkeys = self.doc.new_element("Hotkeys");
        let hotkey = self.doc.new_element("Hotkey");
        self.doc.set_attribute(hotkey, "Keys", Some(keys))?;
        self.doc.append_child(hotkeys, hotkey);
        Ok(hotkeys)
    }

    /// Rewrites the fields of a cloned entry that differ from what was parsed
    fn patch_entry(
        &mut self,
        node: NodeId,
        original: &CheatEntry,
        entry: &CheatEntry,
        depth: usize,
    ) -> MemoryResult<()> {
        if entry.id != original.id {
            if self.doc.attribute(node, "ID")?.is_some() {
                self.doc.set_attribute(node, "ID", Some(&entry.id))?;
            } else {
                self.set_child_text(node, "ID", &entry.id, depth);
            }
        }
        if entry.description != original.description {
            self.set_child_text(node, "Description", &quoted(&entry.description), depth);
        }
        if entry.group_header != original.group_header {
            if self.doc.attribute(node, "GroupHeader")?.is_some() {
                self.doc
                    .set_attribute(node, "GroupHeader", entry.group_header.then_some("1"))?;
            } else if entry.group_header {
                self.set_child_text(node, "GroupHeader", "1", depth);
            } else {
                self.remove_children(node, "GroupHeader");
            }
        }
        if entry.variable_type != original.variable_type {
            self.set_child_text(node, "VariableType", entry.variable_type.as_str(), depth);
        }
        if entry.address != original.address {
            match &entry.address {
                Some(address) => self.set_child_text(node, "Address", &address.to_string(), depth),
                None => self.remove_children(node, "Address"),
            }
        }
        if entry.offsets != original.offsets {
            self.remove_children(node, "Offsets");
            if !entry.offsets.is_empty() {
                let offsets = self.offsets(&entry.offsets);
                self.doc.append_indented(node, offsets, depth);
                self.doc.indent(offsets, depth + 1);
            }
        }
        if entry.last_value != original.last_value || entry.enabled != original.enabled {
            if self.doc.attribute(node, "Enabled")?.is_some() {
                self.doc
                    .set_attribute(node, "Enabled", Some(if entry.enabled { "1" } else { "0" }))?;
            }
            let state = self.ensure_child(node, "LastState", depth);
            self.doc.set_attribute(state, "Value", entry.last_value.as_deref())?;
            self.doc
                .set_attribute(state, "Activated", entry.enabled.then_some("1"))?;
        }
        if entry.hotkey != original.hotkey {
            self.remove_children(node, "Hotkeys");
            if let Some(keys) = &entry.hotkey {
                let hotkeys = self.hotkeys(keys)?;
                self.doc.append_indented(node, hotkeys, depth);
                self.doc.indent(hotkeys, depth + 1);
            }
        }
        if entry.script != original.script {
            let existing = ["AssemblerScript", "LuaScript"]
                .into_iter()
                .find(|name| self.doc.first_child(node, name).is_some());
            match (&entry.script, existing) {
                (Some(script), Some(name)) => self.set_child_text(node, name, script, depth),
                (Some(script), None) => self.set_child_text(node, script_element(entry), script, depth),
                (None, Some(name)) => self.remove_children(node, name),
                (None, None) => {}
            }
        }
        Ok(())
    }

    fn structures(&mut self) -> MemoryResult<()> {
        if self.table.structures.is_empty() {
            self.remove_children(self.root, "Structures");
            return Ok(());
        }

        let table = self.table;
        let mut nodes = Vec::with_capacity(table.structures.len());
        for structure in &table.structures {
            let original = structure
                .node
                .and_then(|node| table.structure_originals.get(&node).map(|o| (node, o)));
            let node = match original {
                Some((node, original)) if original == structure => self.doc.deep_clone(node),
                Some((node, _)) => {
                    let node = self.doc.deep_clone(node);
                    self.doc.set_attribute(node, "Name", Some(&structure.name))?;
                    let elements = self.ensure_child(node, "Elements", ENTRY_DEPTH);
                    let items = self.structure_elements(&structure.elements)?;
                    self.doc.set_children(elements, items);
                    self.doc.indent(elements, ENTRY_DEPTH + 1);
                    node
                }
                None => self.fresh_structure(structure)?,
            };
            nodes.push(node);
        }

        let container = match self.doc.first_child(self.root, "Structures") {
            Some(container) => container,
            None => {
                let container = self.doc.new_element("Structures");
                self.doc.set_attribute(container, "StructVersion", Some("2"))?;
                self.doc.append_indented(self.root, container, 0);
                container
            }
        };
        self.doc.set_children(container, nodes);
        self.doc.indent(container, SECTION_DEPTH);
        Ok(())
    }

    fn fresh_structure(&mut self, structure: &Structure) -> MemoryResult<NodeId> {
        let node = self.doc.new_element("Structure");
        self.doc.set_attribute(node, "Name", Some(&structure.name))?;
        self.doc.set_attribute(node, "AutoFill", Some("0"))?;
        self.doc.set_attribute(node, "AutoCreate", Some("1"))?;
        self.doc.set_attribute(node, "DefaultHex", Some("0"))?;
        let elements = self.doc.new_element("Elements");
        let items = self.structure_elements(&structure.elements)?;
        self.doc.set_children(elements, items);
        self.doc.append_child(node, elements);
        Ok(node)
    }

    fn structure_elements(&mut self, elements: &[StructureElement]) -> MemoryResult<Vec<NodeId>> {
        let mut nodes = Vec::with_capacity(elements.len());
        for element in elements {
            let node = self.doc.new_element("Element");
            self.doc.set_attribute(node, "Offset", Some(&element.offset.to_string()))?;
            self.doc
                .set_attribute(node, "Vartype", Some(element.variable_type.as_str()))?;
            self.doc
                .set_attribute(node, "Bytesize", Some(&element.byte_size.to_string()))?;
            self.doc
                .set_attribute(node, "OffsetHex", Some(&format!("{:08X}", element.offset)))?;
            self.doc
                .set_attribute(node, "Description", Some(&element.description))?;
            self.doc
                .set_attribute(node, "DisplayMethod", Some(&element.display_method))?;
            if let Some(child) = &element.child_struct {
                self.doc.set_attribute(node, "ChildStruct", Some(child))?;
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    fn script(&mut self) {
        let table = self.table;
        match &table.script {
            Some(script) => self.set_child_text(self.root, "LuaScript", script, 0),
            None => self.remove_children(self.root, "LuaScript"),
        }
    }

    fn comments(&mut self) {
        let table = self.table;
        if table.comments.is_empty() {
            self.remove_children(self.root, "DisassemblerComments");
            return;
        }
        let items = table
            .comments
            .iter()
            .map(|comment| {
                let node = self.doc.new_element("DisassemblerComment");
                let address = self.doc.new_text_element("Address", &comment.address);
                let text = self.doc.new_text_element("Comment", &comment.comment);
                self.doc.set_children(node, vec![address, text]);
                node
            })
            .collect();
        let container = self.ensure_child(self.root, "DisassemblerComments", 0);
        self.doc.set_children(container, items);
        self.doc.indent(container, SECTION_DEPTH);
    }
}

fn script_element(entry: &CheatEntry) -> &'static str {
    match entry.variable_type {
        VariableType::AutoAssembler => "AssemblerScript",
        _ => "LuaScript",
    }
}
