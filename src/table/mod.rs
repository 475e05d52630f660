//! Cheat-table codec
//!
//! A [`CheatTable`] is the model of one address-list document: entries,
//! structure definitions, the table script and disassembler comments. Tables
//! parsed from markup keep the full document, and writing one back touches
//! only the sections that changed.
//!
//! A table moves through `parsed -> mutated -> persisted`; persisted tables
//! can be mutated and persisted again. Having no `CheatTable` value at all is
//! the unloaded state.

pub mod backup;
pub mod legacy;
pub mod model;
pub mod parser;
pub mod writer;
pub mod xml;

pub use backup::{create_backup, list_backups};
pub use model::{CheatEntry, DisassemblerComment, EntryAddress, Structure, StructureElement, VariableType};
pub use parser::detect_format;

use crate::core::types::{MemoryError, MemoryResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use self::xml::{Document, NodeId};

pub(crate) const ROOT_ELEMENT: &str = "CheatTable";
pub(crate) const TABLE_VERSION: &str = "45";
pub const DEFAULT_TITLE: &str = "Cheat Table";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    Markup,
    LegacyBinary,
}

/// Whether the original document is retained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Retained,
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Parsed(Origin),
    Mutated,
    Persisted,
}

/// Sections to rebuild on the next write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Sections {
    pub info: bool,
    pub entries: bool,
    pub structures: bool,
    pub script: bool,
    pub comments: bool,
}

impl Sections {
    pub fn all() -> Self {
        Sections {
            info: true,
            entries: true,
            structures: true,
            script: true,
            comments: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub title: String,
    pub target_process: String,
    pub total_entries: usize,
    pub enabled_entries: usize,
    pub group_headers: usize,
    pub script_entries: usize,
    pub entries_with_offsets: usize,
    pub entries_with_hotkeys: usize,
    pub entry_types: BTreeMap<String, usize>,
    pub structures: usize,
    pub comments: usize,
    pub has_script: bool,
}

#[derive(Serialize)]
struct TableExport<'a> {
    title: &'a str,
    target_process: &'a str,
    format: TableFormat,
    entries: &'a [CheatEntry],
    structures: &'a [Structure],
    script: Option<&'a str>,
    comments: &'a [DisassemblerComment],
}

#[derive(Debug, Clone)]
pub struct CheatTable {
    pub(crate) title: String,
    pub(crate) target_process: String,
    pub(crate) entries: Vec<CheatEntry>,
    pub(crate) structures: Vec<Structure>,
    pub(crate) script: Option<String>,
    pub(crate) comments: Vec<DisassemblerComment>,
    pub(crate) document: Option<Document>,
    /// Entries and structures as parsed, keyed by their node
    pub(crate) entry_originals: HashMap<NodeId, CheatEntry>,
    pub(crate) structure_originals: HashMap<NodeId, Structure>,
    pub(crate) format: TableFormat,
    pub(crate) state: TableState,
    pub(crate) dirty: Sections,
}

impl CheatTable {
    pub(crate) fn synthetic() -> Self {
        CheatTable {
            title: DEFAULT_TITLE.to_string(),
            target_process: String::new(),
            entries: Vec::new(),
            structures: Vec::new(),
            script: None,
            comments: Vec::new(),
            document: None,
            entry_originals: HashMap::new(),
            structure_originals: HashMap::new(),
            format: TableFormat::Markup,
            state: TableState::Parsed(Origin::Synthetic),
            dirty: Sections::all(),
        }
    }

    /// An empty table with no original document
    pub fn new(title: impl Into<String>) -> Self {
        CheatTable {
            title: title.into(),
            ..CheatTable::synthetic()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let table = parser::parse_bytes(&data)?;
        info!(
            "Loaded table '{}' from {} ({} entries)",
            table.title,
            path.display(),
            table.entries.len()
        );
        Ok(table)
    }

    pub fn from_bytes(data: &[u8]) -> MemoryResult<Self> {
        parser::parse_bytes(data)
    }

    /// Writes the table, backing up any file already at `path` first
    ///
    /// Returns the backup location when one was made. The table then
    /// retains the written document as its new original.
    pub fn save(&mut self, path: impl AsRef<Path>) -> MemoryResult<Option<PathBuf>> {
        let path = path.as_ref();
        let text = writer::render(self)?;
        let backup = if path.exists() {
            Some(backup::create_backup(path)?)
        } else {
            None
        };
        fs::write(path, &text)?;

        let mut persisted = parser::parse_markup(&text)?;
        persisted.state = TableState::Persisted;
        *self = persisted;
        info!(
            "Saved table '{}' to {} ({} entries)",
            self.title,
            path.display(),
            self.entries.len()
        );
        Ok(backup)
    }

    /// Serialized markup without touching the filesystem
    pub fn to_markup(&self) -> MemoryResult<String> {
        writer::render(self)
    }

    pub fn state(&self) -> TableState {
        self.state
    }

    pub fn format(&self) -> TableFormat {
        self.format
    }

    pub fn has_original(&self) -> bool {
        self.document.is_some()
    }

    fn touch(&mut self, update: impl FnOnce(&mut Sections)) {
        update(&mut self.dirty);
        self.state = TableState::Mutated;
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch(|s| s.info = true);
    }

    pub fn target_process(&self) -> &str {
        &self.target_process
    }

    pub fn set_target_process(&mut self, process: impl Into<String>) {
        self.target_process = process.into();
        self.touch(|s| s.info = true);
    }

    /// Entries flattened depth-first; nested entries name their parent
    pub fn entries(&self) -> &[CheatEntry] {
        &self.entries
    }

    pub fn entry(&self, id: &str) -> Option<&CheatEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn next_id(&self) -> String {
        self.entries
            .iter()
            .filter_map(|e| e.id.parse::<u64>().ok())
            .max()
            .map_or(0, |max| max + 1)
            .to_string()
    }

    /// Appends an entry and returns its id
    ///
    /// An empty or already used id is replaced by the next free number.
    pub fn add_entry(&mut self, mut entry: CheatEntry) -> String {
        if entry.id.is_empty() || self.entry(&entry.id).is_some() {
            entry.id = self.next_id();
        }
        entry.node = None;
        let id = entry.id.clone();
        self.entries.push(entry);
        self.touch(|s| s.entries = true);
        id
    }

    pub fn modify_entry(&mut self, id: &str, update: impl FnOnce(&mut CheatEntry)) -> MemoryResult<()> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| MemoryError::InvalidArgument(format!("no entry with id {}", id)))?;

        let mut updated = self.entries[index].clone();
        update(&mut updated);
        if updated.id != id && self.entry(&updated.id).is_some() {
            return Err(MemoryError::InvalidArgument(format!(
                "entry id {} is already in use",
                updated.id
            )));
        }
        if let Some(parent) = updated.parent.as_deref() {
            if parent == updated.id || self.subtree(id).iter().any(|d| d == parent) {
                return Err(MemoryError::InvalidArgument(format!(
                    "entry {} cannot be nested below itself",
                    id
                )));
            }
        }
        if updated.id != id {
            for child in self.entries.iter_mut().filter(|e| e.parent.as_deref() == Some(id)) {
                child.parent = Some(updated.id.clone());
            }
        }
        self.entries[index] = updated;
        self.touch(|s| s.entries = true);
        Ok(())
    }

    /// Ids of `id` and every entry nested below it
    fn subtree(&self, id: &str) -> Vec<String> {
        let mut ids = vec![id.to_string()];
        let mut i = 0;
        while i < ids.len() {
            let children: Vec<String> = self
                .entries
                .iter()
                .filter(|e| e.parent.as_deref() == Some(ids[i].as_str()) && !ids.contains(&e.id))
                .map(|e| e.id.clone())
                .collect();
            ids.extend(children);
            i += 1;
        }
        ids
    }

    /// Removes an entry together with everything nested below it
    pub fn remove_entry(&mut self, id: &str) -> Option<CheatEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        let doomed = self.subtree(id);

        let removed = self.entries.remove(index);
        self.entries.retain(|e| !doomed.contains(&e.id));
        self.touch(|s| s.entries = true);
        Some(removed)
    }

    pub fn structures(&self) -> &[Structure] {
        &self.structures
    }

    /// Adds a structure, replacing one with the same name
    pub fn add_structure(&mut self, mut structure: Structure) {
        match self.structures.iter_mut().find(|s| s.name == structure.name) {
            Some(existing) => {
                structure.node = existing.node;
                *existing = structure;
            }
            None => {
                structure.node = None;
                self.structures.push(structure);
            }
        }
        self.touch(|s| s.structures = true);
    }

    pub fn remove_structure(&mut self, name: &str) -> Option<Structure> {
        let index = self.structures.iter().position(|s| s.name == name)?;
        self.touch(|s| s.structures = true);
        Some(self.structures.remove(index))
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn set_script(&mut self, script: Option<String>) {
        self.script = script;
        self.touch(|s| s.script = true);
    }

    pub fn comments(&self) -> &[DisassemblerComment] {
        &self.comments
    }

    /// Sets the comment for `address`, replacing an existing one
    pub fn add_comment(&mut self, address: impl Into<String>, comment: impl Into<String>) {
        let address = address.into();
        let comment = comment.into();
        match self.comments.iter_mut().find(|c| c.address == address) {
            Some(existing) => existing.comment = comment,
            None => self.comments.push(DisassemblerComment { address, comment }),
        }
        self.touch(|s| s.comments = true);
    }

    pub fn remove_comment(&mut self, address: &str) -> bool {
        let before = self.comments.len();
        self.comments.retain(|c| c.address != address);
        let removed = self.comments.len() != before;
        if removed {
            self.touch(|s| s.comments = true);
        }
        removed
    }

    pub fn summary(&self) -> TableSummary {
        let mut entry_types = BTreeMap::new();
        for entry in &self.entries {
            *entry_types.entry(entry.variable_type.to_string()).or_insert(0) += 1;
        }
        TableSummary {
            title: self.title.clone(),
            target_process: self.target_process.clone(),
            total_entries: self.entries.len(),
            enabled_entries: self.entries.iter().filter(|e| e.enabled).count(),
            group_headers: self.entries.iter().filter(|e| e.group_header).count(),
            script_entries: self.entries.iter().filter(|e| e.has_script()).count(),
            entries_with_offsets: self.entries.iter().filter(|e| !e.offsets.is_empty()).count(),
            entries_with_hotkeys: self.entries.iter().filter(|e| e.hotkey.is_some()).count(),
            entry_types,
            structures: self.structures.len(),
            comments: self.comments.len(),
            has_script: self.script.is_some(),
        }
    }

    /// JSON view of the model (the retained document is not included)
    pub fn to_json(&self) -> MemoryResult<String> {
        let export = TableExport {
            title: &self.title,
            target_process: &self.target_process,
            format: self.format,
            entries: &self.entries,
            structures: &self.structures,
            script: self.script.as_deref(),
            comments: &self.comments,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_TABLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<CheatTable CheatEngineTableVersion="45">
  <CheatTableInfo>
    <Title>Sample Game</Title>
  </CheatTableInfo>
  <Options>
    <TargetProcess>game.exe</TargetProcess>
  </Options>
  <CheatEntries>
    <CheatEntry>
      <ID>0</ID>
      <Description>"Player"</Description>
      <GroupHeader>1</GroupHeader>
      <CheatEntries>
        <CheatEntry>
          <ID>1</ID>
          <Description>"Health"</Description>
          <Color>80000008</Color>
          <VariableType>4 Bytes</VariableType>
          <Address>"game.exe"+1A2B3C</Address>
          <Offsets>
            <Offset>10</Offset>
            <Offset>1C</Offset>
          </Offsets>
          <LastState Value="100" RealAddress="0BADF00D"/>
          <Hotkeys>
            <Hotkey>
              <Action>Toggle Activation</Action>
              <Keys>
                <Key>17</Key>
                <Key>72</Key>
              </Keys>
            </Hotkey>
          </Hotkeys>
        </CheatEntry>
      </CheatEntries>
    </CheatEntry>
    <CheatEntry ID="2" Enabled="1">
      <Description>"Infinite Ammo"</Description>
      <VariableType>Auto Assembler Script</VariableType>
      <LastState Activated="1"/>
      <AssemblerScript>[ENABLE]
nop 2
[DISABLE]
</AssemblerScript>
    </CheatEntry>
  </CheatEntries>
  <Structures StructVersion="2">
    <Structure Name="Player" AutoFill="0" AutoCreate="1">
      <Elements>
        <Element Offset="0" Vartype="Pointer" Bytesize="8" OffsetHex="00000000" Description="vtable" DisplayMethod="hexadecimal"/>
        <Element Offset="16" Vartype="4 Bytes" Bytesize="4" OffsetHex="00000010" Description="health" DisplayMethod="signed integer" ChildStruct="Stats"/>
      </Elements>
    </Structure>
  </Structures>
  <LuaScript>print("loaded")</LuaScript>
  <DisassemblerComments>
    <DisassemblerComment>
      <Address>"game.exe"+1000</Address>
      <Comment>entry point</Comment>
    </DisassemblerComment>
  </DisassemblerComments>
  <UserdefinedSymbols/>
</CheatTable>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Address;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn gold() -> CheatEntry {
        CheatEntry::new("Gold", EntryAddress::Absolute(Address::new(0x40_1000)), VariableType::FourBytes)
    }

    #[test]
    fn test_state_machine() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.CT");
        fs::write(&path, SAMPLE_TABLE).unwrap();

        let mut table = CheatTable::load(&path).unwrap();
        assert_eq!(table.state(), TableState::Parsed(Origin::Retained));

        table.add_entry(gold());
        assert_eq!(table.state(), TableState::Mutated);

        let backup = table.save(&path).unwrap().expect("existing file is backed up");
        assert_eq!(fs::read_to_string(&backup).unwrap(), SAMPLE_TABLE);
        assert_eq!(table.state(), TableState::Persisted);
        assert!(table.has_original());

        // Persisted tables stay mutable
        table.set_title("Renamed");
        assert_eq!(table.state(), TableState::Mutated);
        table.save(&path).unwrap();
        assert_eq!(CheatTable::load(&path).unwrap().title(), "Renamed");
        assert_eq!(list_backups(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_new_table_is_synthetic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.CT");
        let mut table = CheatTable::new("New");
        assert_eq!(table.state(), TableState::Parsed(Origin::Synthetic));
        assert!(!table.has_original());

        assert_eq!(table.save(&path).unwrap(), None);
        assert!(table.has_original());
        assert_eq!(CheatTable::load(&path).unwrap().title(), "New");
    }

    #[test]
    fn test_ids() {
        let mut table = CheatTable::new("Ids");
        assert_eq!(table.add_entry(gold()), "0");
        assert_eq!(table.add_entry(gold()), "1");

        let mut named = gold();
        named.id = "10".into();
        assert_eq!(table.add_entry(named), "10");
        let mut clash = gold();
        clash.id = "1".into();
        assert_eq!(table.add_entry(clash), "11");
    }

    #[test]
    fn test_modify_and_remove() {
        let mut table = CheatTable::from_bytes(SAMPLE_TABLE.as_bytes()).unwrap();
        assert!(matches!(
            table.modify_entry("99", |_| {}),
            Err(MemoryError::InvalidArgument(_))
        ));
        assert!(table.modify_entry("1", |e| e.id = "2".into()).is_err());

        table.modify_entry("0", |e| e.id = "5".into()).unwrap();
        assert_eq!(table.entry("1").unwrap().parent.as_deref(), Some("5"));

        let removed = table.remove_entry("5").unwrap();
        assert!(removed.group_header);
        assert_eq!(table.entries().len(), 1);
        assert_eq!(table.entries()[0].id, "2");
        assert!(table.remove_entry("5").is_none());
    }

    #[test]
    fn test_structures_and_comments() {
        let mut table = CheatTable::from_bytes(SAMPLE_TABLE.as_bytes()).unwrap();
        let mut player = Structure::new("Player");
        player.elements.clear();
        table.add_structure(player);
        assert_eq!(table.structures().len(), 1);
        assert!(table.structures()[0].elements.is_empty());

        table.add_comment("\"game.exe\"+1000", "renamed");
        table.add_comment("game.exe+20", "new");
        assert_eq!(table.comments().len(), 2);
        assert_eq!(table.comments()[0].comment, "renamed");

        assert!(table.remove_structure("Player").is_some());
        assert!(table.remove_structure("Player").is_none());
    }

    #[test]
    fn test_summary() {
        let table = CheatTable::from_bytes(SAMPLE_TABLE.as_bytes()).unwrap();
        let summary = table.summary();
        assert_eq!(summary.title, "Sample Game");
        assert_eq!(summary.total_entries, 3);
        assert_eq!(summary.enabled_entries, 1);
        assert_eq!(summary.group_headers, 1);
        assert_eq!(summary.script_entries, 1);
        assert_eq!(summary.entries_with_offsets, 1);
        assert_eq!(summary.entries_with_hotkeys, 1);
        assert_eq!(summary.entry_types.get("4 Bytes"), Some(&2));
        assert_eq!(summary.structures, 1);
        assert_eq!(summary.comments, 1);
        assert!(summary.has_script);
    }

    #[test]
    fn test_json_export() {
        let table = CheatTable::from_bytes(SAMPLE_TABLE.as_bytes()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&table.to_json().unwrap()).unwrap();
        assert_eq!(json["title"], "Sample Game");
        assert_eq!(json["format"], "markup");
        assert_eq!(json["entries"][1]["address"], "game.exe+1A2B3C");
        assert_eq!(json["entries"][1]["offsets"][0], "0x10");
        assert_eq!(json["entries"][2]["has_script"], true);
        assert_eq!(json["structures"][0]["elements"][1]["child_struct"], "Stats");
    }

    #[test]
    fn test_parent_cycles_rejected() {
        let mut table = CheatTable::new("Cycles");
        let a = table.add_entry(gold());
        let b = table.add_entry(gold());
        let c = table.add_entry(gold().with_parent(b.clone()));

        table.modify_entry(&a, |e| e.parent = Some(b.clone())).unwrap();
        for (id, parent) in [(&b, &a), (&b, &c), (&b, &b)] {
            assert!(
                matches!(
                    table.modify_entry(id, |e| e.parent = Some(parent.clone())),
                    Err(MemoryError::InvalidArgument(_))
                ),
                "{} accepted {} as parent",
                id,
                parent
            );
        }
        // Renaming an entry onto its own parent id is also a cycle
        assert!(table.modify_entry(&a, |e| e.id = "x".into()).is_ok());
        assert!(table.modify_entry("x", |e| e.parent = Some("x".into())).is_err());
        assert_eq!(table.entry("x").unwrap().parent.as_deref(), Some(b.as_str()));
    }

    #[test]
    fn test_unreachable_entries_survive_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cycle.CT");

        let mut table = CheatTable::new("Cycle");
        table.add_entry(gold());
        table.add_entry(gold());
        // A cycle cannot be built through modify_entry; older tables may still hold one
        table.entries[0].parent = Some("1".into());
        table.entries[1].parent = Some("0".into());
        table.add_entry(gold().with_parent("77"));
        table.save(&path).unwrap();

        let reloaded = CheatTable::load(&path).unwrap();
        let mut ids: Vec<&str> = reloaded.entries().iter().map(|e| e.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["0", "1", "2"]);
        // Dangling parent ids are written as top-level entries
        assert_eq!(reloaded.entry("2").unwrap().parent, None);
        // The cycle is cut at the first entry
        assert_eq!(reloaded.entry("0").unwrap().parent, None);
        assert_eq!(reloaded.entry("1").unwrap().parent.as_deref(), Some("0"));
    }
}
