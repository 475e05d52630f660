//! Cheat-table reader
//!
//! Markup tables keep their whole document next to the extracted model.
//! Legacy binary tables go through [`super::legacy`] and keep nothing.

use super::legacy::{self, LEGACY_TITLE};
use super::model::{
    parse_hex, parse_offset, CheatEntry, DisassemblerComment, EntryAddress, Structure, StructureElement,
    VariableType,
};
use super::xml::{Document, NodeId};
use super::{CheatTable, Origin, Sections, TableFormat, TableState, DEFAULT_TITLE, ROOT_ELEMENT};
use crate::core::types::{MemoryError, MemoryResult};
use std::collections::HashMap;
use tracing::{debug, warn};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Markup when the content starts with a declaration or the table root
pub fn detect_format(data: &[u8]) -> TableFormat {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let head = &data[start..];
    if head.starts_with(b"<?xml") || head.starts_with(b"<CheatTable") {
        TableFormat::Markup
    } else {
        TableFormat::LegacyBinary
    }
}

pub fn parse_bytes(data: &[u8]) -> MemoryResult<CheatTable> {
    match detect_format(data) {
        TableFormat::Markup => {
            let text = std::str::from_utf8(data)
                .map_err(|e| MemoryError::table_parse(format!("table is not UTF-8: {}", e)))?;
            parse_markup(text)
        }
        TableFormat::LegacyBinary => Ok(parse_legacy(data)),
    }
}

pub(crate) fn parse_legacy(data: &[u8]) -> CheatTable {
    warn!("Legacy binary table format has limited support; only addresses are recovered");
    CheatTable {
        title: LEGACY_TITLE.to_string(),
        entries: legacy::entries(data),
        format: TableFormat::LegacyBinary,
        ..CheatTable::synthetic()
    }
}

pub(crate) fn parse_markup(text: &str) -> MemoryResult<CheatTable> {
    let document = Document::parse(text)?;
    let top = document
        .root_element()
        .ok_or_else(|| MemoryError::table_parse("document has no root element"))?;
    let root = document
        .descendant(top, ROOT_ELEMENT)
        .ok_or_else(|| MemoryError::table_parse("no CheatTable element found"))?;

    let title = document
        .find_path(root, &["CheatTableInfo", "Title"])
        .map(|id| document.text(id))
        .transpose()?
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let target_process = document
        .find_path(root, &["Options", "TargetProcess"])
        .map(|id| document.text(id))
        .transpose()?
        .map(|t| t.trim().to_string())
        .unwrap_or_default();

    let mut entries = Vec::new();
    let container = document
        .first_child(root, "CheatEntries")
        .or_else(|| document.descendant(root, "CheatEntries"));
    match container {
        Some(container) => parse_entries(&document, container, None, &mut entries)?,
        None => warn!("No CheatEntries found in table"),
    }

    let structures = match document.first_child(root, "Structures") {
        Some(container) => document
            .child_elements(container, "Structure")
            .map(|id| parse_structure(&document, id))
            .collect::<MemoryResult<Vec<_>>>()?,
        None => Vec::new(),
    };

    let script = document
        .child_text(root, "LuaScript")?
        .filter(|s| !s.is_empty());

    let comments = match document.first_child(root, "DisassemblerComments") {
        Some(container) => document
            .child_elements(container, "DisassemblerComment")
            .map(|id| {
                Ok(DisassemblerComment {
                    address: document.child_text(id, "Address")?.unwrap_or_default(),
                    comment: document.child_text(id, "Comment")?.unwrap_or_default(),
                })
            })
            .collect::<MemoryResult<Vec<_>>>()?,
        None => Vec::new(),
    };

    let entry_originals: HashMap<NodeId, CheatEntry> = entries
        .iter()
        .filter_map(|e| e.node.map(|node| (node, e.clone())))
        .collect();
    let structure_originals: HashMap<NodeId, Structure> = structures
        .iter()
        .filter_map(|s| s.node.map(|node| (node, s.clone())))
        .collect();

    debug!(
        "Parsed table '{}': {} entries, {} structures, {} comments",
        title,
        entries.len(),
        structures.len(),
        comments.len()
    );

    Ok(CheatTable {
        title,
        target_process,
        entries,
        structures,
        script,
        comments,
        document: Some(document),
        entry_originals,
        structure_originals,
        format: TableFormat::Markup,
        state: TableState::Parsed(Origin::Retained),
        dirty: Sections::default(),
    })
}

/// Flattens nested entries depth-first, parents before their children
fn parse_entries(
    document: &Document,
    container: NodeId,
    parent: Option<&str>,
    out: &mut Vec<CheatEntry>,
) -> MemoryResult<()> {
    for id in document.child_elements(container, "CheatEntry").collect::<Vec<_>>() {
        let mut entry = parse_entry(document, id)?;
        entry.parent = parent.map(str::to_string);
        if entry.id.is_empty() {
            debug!("Entry '{}' has no ID", entry.description);
        }
        let entry_id = entry.id.clone();
        out.push(entry);

        if let Some(children) = document.first_child(id, "CheatEntries") {
            parse_entries(document, children, Some(&entry_id), out)?;
        }
    }
    Ok(())
}

fn flag(value: Option<String>) -> bool {
    value.as_deref().map(str::trim) == Some("1")
}

/// Description text without the quotes the format wraps it in
pub(crate) fn unquote(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

fn parse_entry(document: &Document, id: NodeId) -> MemoryResult<CheatEntry> {
    let entry_id = match document.attribute(id, "ID")? {
        Some(value) => value,
        None => document.child_text(id, "ID")?.unwrap_or_default(),
    };
    let description = document
        .child_text(id, "Description")?
        .map(|d| unquote(&d).to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let group_header = flag(document.attribute(id, "GroupHeader")?)
        || flag(document.child_text(id, "GroupHeader")?);
    let address = document
        .child_text(id, "Address")?
        .and_then(|a| EntryAddress::parse(&a));

    let mut offsets = Vec::new();
    if let Some(container) = document.first_child(id, "Offsets") {
        for offset in document.child_elements(container, "Offset") {
            let text = document.text(offset)?;
            match parse_offset(&text) {
                Some(value) => offsets.push(value),
                None => debug!("Skipping offset '{}' of entry {}", text.trim(), entry_id),
            }
        }
    }

    let variable_type = document
        .child_text(id, "VariableType")?
        .map(|t| VariableType::parse(&t))
        .unwrap_or_default();

    let last_state = document.first_child(id, "LastState");
    let last_value = match last_state {
        Some(state) => document.attribute(state, "Value")?.filter(|v| !v.is_empty()),
        None => None,
    };
    let activated = match last_state {
        Some(state) => flag(document.attribute(state, "Activated")?),
        None => false,
    };
    let enabled = activated || flag(document.attribute(id, "Enabled")?);

    let hotkey = match document.find_path(id, &["Hotkeys", "Hotkey"]) {
        Some(hotkey) => Some(match document.attribute(hotkey, "Keys")? {
            Some(keys) => keys,
            None => match document.first_child(hotkey, "Keys") {
                Some(keys) => document
                    .child_elements(keys, "Key")
                    .map(|key| document.text(key).map(|k| k.trim().to_string()))
                    .collect::<MemoryResult<Vec<_>>>()?
                    .join("+"),
                None => String::new(),
            },
        }),
        None => None,
    };

    let script = match document.child_text(id, "AssemblerScript")? {
        Some(script) => Some(script),
        None => document.child_text(id, "LuaScript")?,
    }
    .filter(|s| !s.is_empty());

    Ok(CheatEntry {
        id: entry_id,
        description,
        address,
        offsets,
        variable_type,
        last_value,
        enabled,
        hotkey,
        script,
        group_header,
        parent: None,
        node: Some(id),
    })
}

fn parse_structure(document: &Document, id: NodeId) -> MemoryResult<Structure> {
    let name = document.attribute(id, "Name")?.unwrap_or_default();
    let mut elements = Vec::new();
    if let Some(container) = document.first_child(id, "Elements") {
        for element in document.child_elements(container, "Element") {
            let offset = match document.attribute(element, "Offset")? {
                Some(text) => text.trim().parse::<usize>().ok(),
                None => None,
            };
            let offset = match offset {
                Some(offset) => offset,
                None => document
                    .attribute(element, "OffsetHex")?
                    .and_then(|text| parse_hex(text.trim()))
                    .unwrap_or(0),
            };
            elements.push(StructureElement {
                offset,
                variable_type: document
                    .attribute(element, "Vartype")?
                    .map(|t| VariableType::parse(&t))
                    .unwrap_or_default(),
                byte_size: document
                    .attribute(element, "Bytesize")?
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(0),
                description: document.attribute(element, "Description")?.unwrap_or_default(),
                display_method: document.attribute(element, "DisplayMethod")?.unwrap_or_default(),
                child_struct: document.attribute(element, "ChildStruct")?,
            });
        }
    }
    Ok(Structure {
        name,
        elements,
        node: Some(id),
    })
}
