//! Cheat-table data model

use super::xml::NodeId;
use crate::analysis::structure::{FieldType, StructureInfo};
use crate::core::types::{Address, ModuleInfo, PointerWidth, ValueType};
use crate::memory::pointer::PointerResolver;
use crate::memory::source::MemorySource;
use serde::{Serialize, Serializer};
use std::fmt;

/// Declared type of an entry or structure element
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariableType {
    Binary,
    Byte,
    TwoBytes,
    FourBytes,
    EightBytes,
    Float,
    Double,
    String,
    ByteArray,
    Pointer,
    AutoAssembler,
    /// Any type name this model does not know, kept verbatim
    Other(String),
}

impl VariableType {
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "Binary" => VariableType::Binary,
            "Byte" => VariableType::Byte,
            "2 Bytes" => VariableType::TwoBytes,
            "4 Bytes" => VariableType::FourBytes,
            "8 Bytes" => VariableType::EightBytes,
            "Float" => VariableType::Float,
            "Double" => VariableType::Double,
            "String" => VariableType::String,
            "Array of byte" => VariableType::ByteArray,
            "Pointer" => VariableType::Pointer,
            "Auto Assembler Script" => VariableType::AutoAssembler,
            other => VariableType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            VariableType::Binary => "Binary",
            VariableType::Byte => "Byte",
            VariableType::TwoBytes => "2 Bytes",
            VariableType::FourBytes => "4 Bytes",
            VariableType::EightBytes => "8 Bytes",
            VariableType::Float => "Float",
            VariableType::Double => "Double",
            VariableType::String => "String",
            VariableType::ByteArray => "Array of byte",
            VariableType::Pointer => "Pointer",
            VariableType::AutoAssembler => "Auto Assembler Script",
            VariableType::Other(name) => name,
        }
    }

    /// Value type used to read the entry; `None` for scripts and unknown types
    pub fn value_type(&self, width: PointerWidth) -> Option<ValueType> {
        match self {
            VariableType::Binary | VariableType::Byte => Some(ValueType::U8),
            VariableType::TwoBytes => Some(ValueType::I16),
            VariableType::FourBytes => Some(ValueType::I32),
            VariableType::EightBytes => Some(ValueType::I64),
            VariableType::Float => Some(ValueType::F32),
            VariableType::Double => Some(ValueType::F64),
            VariableType::String => Some(ValueType::String),
            VariableType::ByteArray => Some(ValueType::Bytes),
            VariableType::Pointer => Some(match width {
                PointerWidth::Four => ValueType::U32,
                PointerWidth::Eight => ValueType::U64,
            }),
            VariableType::AutoAssembler | VariableType::Other(_) => None,
        }
    }
}

impl Default for VariableType {
    fn default() -> Self {
        VariableType::FourBytes
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ValueType> for VariableType {
    fn from(value_type: ValueType) -> Self {
        match value_type {
            ValueType::I8 | ValueType::U8 => VariableType::Byte,
            ValueType::I16 | ValueType::U16 => VariableType::TwoBytes,
            ValueType::I32 | ValueType::U32 => VariableType::FourBytes,
            ValueType::I64 | ValueType::U64 => VariableType::EightBytes,
            ValueType::F32 => VariableType::Float,
            ValueType::F64 => VariableType::Double,
            ValueType::Bytes => VariableType::ByteArray,
            ValueType::String => VariableType::String,
        }
    }
}

impl Serialize for VariableType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Where an entry lives: a raw address, `module+offset`, or anything else
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryAddress {
    Absolute(Address),
    Symbolic { module: String, offset: usize },
    /// Expressions this model does not evaluate, kept verbatim
    Expression(String),
}

impl EntryAddress {
    /// Accepts `0x1234`, `$1234`, bare hex, and `module+hex` (module optionally quoted)
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some(address) = parse_hex(text) {
            return Some(EntryAddress::Absolute(Address::new(address)));
        }
        if let Some((module, offset)) = text.rsplit_once('+') {
            let module = module.trim().trim_matches('"');
            if !module.is_empty() {
                if let Some(offset) = parse_hex(offset.trim()) {
                    return Some(EntryAddress::Symbolic {
                        module: module.to_string(),
                        offset,
                    });
                }
            }
        }
        Some(EntryAddress::Expression(text.to_string()))
    }

    /// Absolute address, looking symbolic modules up by name
    pub fn resolve(&self, modules: &[ModuleInfo]) -> Option<Address> {
        match self {
            EntryAddress::Absolute(address) => Some(*address),
            EntryAddress::Symbolic { module, offset } => modules
                .iter()
                .find(|m| m.name_matches(module))
                .and_then(|m| m.base_address.checked_add(*offset)),
            EntryAddress::Expression(_) => None,
        }
    }
}

impl fmt::Display for EntryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryAddress::Absolute(address) => write!(f, "{:08X}", address.as_usize()),
            EntryAddress::Symbolic { module, offset } => write!(f, "{}+{:X}", module, offset),
            EntryAddress::Expression(text) => f.write_str(text),
        }
    }
}

impl Serialize for EntryAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Hex with an optional `0x` or `$` prefix
pub(crate) fn parse_hex(text: &str) -> Option<usize> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .or_else(|| text.strip_prefix('$'))
        .unwrap_or(text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    usize::from_str_radix(digits, 16).ok()
}

/// Signed hex offset, as written in `<Offset>` elements
pub(crate) fn parse_offset(text: &str) -> Option<i64> {
    let text = text.trim();
    match text.strip_prefix('-') {
        Some(rest) => parse_hex(rest).and_then(|v| i64::try_from(v).ok()).map(|v| -v),
        None => parse_hex(text).and_then(|v| i64::try_from(v).ok()),
    }
}

pub(crate) fn format_offset(offset: i64) -> String {
    if offset < 0 {
        format!("-{:X}", offset.unsigned_abs())
    } else {
        format!("{:X}", offset)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CheatEntry {
    pub id: String,
    pub description: String,
    pub address: Option<EntryAddress>,
    /// Applied in order after dereferencing the base address
    #[serde(serialize_with = "serialize_offsets")]
    pub offsets: Vec<i64>,
    pub variable_type: VariableType,
    pub last_value: Option<String>,
    pub enabled: bool,
    pub hotkey: Option<String>,
    #[serde(rename = "has_script", serialize_with = "serialize_present")]
    pub script: Option<String>,
    pub group_header: bool,
    /// Id of the enclosing entry for nested entries
    pub parent: Option<String>,
    #[serde(skip)]
    pub(crate) node: Option<NodeId>,
}

fn serialize_offsets<S: Serializer>(offsets: &[i64], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(offsets.iter().map(|&o| {
        if o < 0 {
            format!("-0x{:X}", o.unsigned_abs())
        } else {
            format!("0x{:X}", o)
        }
    }))
}

fn serialize_present<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bool(value.is_some())
}

impl CheatEntry {
    pub fn new(description: impl Into<String>, address: EntryAddress, variable_type: VariableType) -> Self {
        CheatEntry {
            description: description.into(),
            address: Some(address),
            variable_type,
            ..CheatEntry::default()
        }
    }

    pub fn group(description: impl Into<String>) -> Self {
        CheatEntry {
            description: description.into(),
            group_header: true,
            ..CheatEntry::default()
        }
    }

    pub fn with_offsets(mut self, offsets: Vec<i64>) -> Self {
        self.offsets = offsets;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn has_script(&self) -> bool {
        self.script.is_some()
    }

    /// Field-wise equality, ignoring where the entry came from
    pub(crate) fn same_content(&self, other: &CheatEntry) -> bool {
        CheatEntry { node: None, ..self.clone() } == CheatEntry { node: None, ..other.clone() }
    }

    /// Final address of the entry in the target
    ///
    /// A pointer entry reads the pointer at its base and then walks the
    /// offsets, so `base` with offsets `[a, b]` is `[[base] + a] + b`.
    pub fn resolve<S: MemorySource + ?Sized>(
        &self,
        resolver: &PointerResolver<'_, S>,
        modules: &[ModuleInfo],
    ) -> Option<Address> {
        let base = self.address.as_ref()?.resolve(modules)?;
        if self.offsets.is_empty() {
            return Some(base);
        }
        let mut chain = Vec::with_capacity(self.offsets.len() + 1);
        chain.push(0);
        chain.extend_from_slice(&self.offsets);
        resolver.resolve(base, &chain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureElement {
    pub offset: usize,
    pub variable_type: VariableType,
    pub byte_size: usize,
    pub description: String,
    pub display_method: String,
    pub child_struct: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Structure {
    pub name: String,
    pub elements: Vec<StructureElement>,
    #[serde(skip)]
    pub(crate) node: Option<NodeId>,
}

impl Structure {
    pub fn new(name: impl Into<String>) -> Self {
        Structure {
            name: name.into(),
            elements: Vec::new(),
            node: None,
        }
    }

    /// Structure definition from an inferred layout
    pub fn from_analysis(name: impl Into<String>, info: &StructureInfo) -> Self {
        let elements = info
            .fields
            .iter()
            .map(|field| {
                let (variable_type, display_method) = match field.field_type {
                    FieldType::Pointer32 | FieldType::Pointer64 => (VariableType::Pointer, "hexadecimal"),
                    FieldType::I16 => (VariableType::TwoBytes, "signed integer"),
                    FieldType::U16 => (VariableType::TwoBytes, "unsigned integer"),
                    FieldType::I32 => (VariableType::FourBytes, "signed integer"),
                    FieldType::U32 => (VariableType::FourBytes, "unsigned integer"),
                    FieldType::Float => (VariableType::Float, "unsigned integer"),
                    FieldType::String => (VariableType::String, "unsigned integer"),
                    FieldType::Byte => (VariableType::Byte, "hexadecimal"),
                };
                StructureElement {
                    offset: field.offset,
                    variable_type,
                    byte_size: field.size,
                    description: field.name.clone(),
                    display_method: display_method.to_string(),
                    child_struct: None,
                }
            })
            .collect();

        Structure {
            name: name.into(),
            elements,
            node: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisassemblerComment {
    pub address: String,
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::reader::ReadLimits;
    use crate::memory::source::MemoryImage;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_variable_type_names() {
        for name in ["Byte", "2 Bytes", "4 Bytes", "8 Bytes", "Float", "Double", "Array of byte", "Auto Assembler Script"] {
            assert_eq!(VariableType::parse(name).as_str(), name);
        }
        assert_eq!(VariableType::parse("Custom Type"), VariableType::Other("Custom Type".into()));
        assert_eq!(VariableType::from(ValueType::U32), VariableType::FourBytes);
        assert_eq!(
            VariableType::Pointer.value_type(PointerWidth::Four),
            Some(ValueType::U32)
        );
        assert_eq!(VariableType::AutoAssembler.value_type(PointerWidth::Eight), None);
    }

    #[test]
    fn test_entry_address_forms() {
        assert_eq!(
            EntryAddress::parse("0x00401000"),
            Some(EntryAddress::Absolute(Address::new(0x40_1000)))
        );
        assert_eq!(
            EntryAddress::parse("00401000"),
            Some(EntryAddress::Absolute(Address::new(0x40_1000)))
        );
        assert_eq!(
            EntryAddress::parse("$1F"),
            Some(EntryAddress::Absolute(Address::new(0x1F)))
        );
        assert_eq!(
            EntryAddress::parse("\"game.exe\"+1A2B"),
            Some(EntryAddress::Symbolic {
                module: "game.exe".into(),
                offset: 0x1A2B
            })
        );
        assert_eq!(
            EntryAddress::parse("[player]+10*2"),
            Some(EntryAddress::Expression("[player]+10*2".into()))
        );
        assert_eq!(EntryAddress::parse("  "), None);
    }

    #[test]
    fn test_entry_address_display_reparses() {
        let symbolic = EntryAddress::Symbolic {
            module: "D2CLIENT.dll".into(),
            offset: 0x9999999,
        };
        assert_eq!(symbolic.to_string(), "D2CLIENT.dll+9999999");
        assert_eq!(EntryAddress::parse(&symbolic.to_string()), Some(symbolic));
    }

    #[test]
    fn test_offsets() {
        assert_eq!(parse_offset("1C"), Some(0x1C));
        assert_eq!(parse_offset("0x10"), Some(0x10));
        assert_eq!(parse_offset("-8"), Some(-8));
        assert_eq!(parse_offset("zz"), None);
        assert_eq!(format_offset(-8), "-8");
        assert_eq!(format_offset(0x1C), "1C");
    }

    #[test]
    fn test_symbolic_resolution() {
        let modules = [ModuleInfo::new("Game.exe", Address::new(0x40_0000), 0x1000)];
        let address = EntryAddress::parse("game.exe+10").unwrap();
        assert_eq!(address.resolve(&modules), Some(Address::new(0x40_0010)));
        assert_eq!(EntryAddress::parse("other.dll+10").unwrap().resolve(&modules), None);
    }

    #[test]
    fn test_pointer_entry_resolution() {
        let base = Address::new(0x1000);
        let mut data = vec![0u8; 0x100];
        // [0x1000] = 0x1040; [0x1040 + 8] = 0x1080
        data[0..8].copy_from_slice(&0x1040u64.to_le_bytes());
        data[0x48..0x50].copy_from_slice(&0x1080u64.to_le_bytes());
        let image = MemoryImage::from_bytes(base, data, PointerWidth::Eight);
        let resolver = PointerResolver::new(&image, ReadLimits::default());

        let entry = CheatEntry::new("Health", EntryAddress::Absolute(base), VariableType::FourBytes)
            .with_offsets(vec![8, 0x10]);
        assert_eq!(entry.resolve(&resolver, &[]), Some(Address::new(0x1090)));

        let direct = CheatEntry::new("Flag", EntryAddress::Absolute(base), VariableType::Byte);
        assert_eq!(direct.resolve(&resolver, &[]), Some(base));

        assert_eq!(CheatEntry::group("Group").resolve(&resolver, &[]), None);
    }

    #[test]
    fn test_json_view() {
        let entry = CheatEntry::new("Ammo", EntryAddress::Absolute(Address::new(0x1234)), VariableType::TwoBytes)
            .with_offsets(vec![0x10, -4]);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["address"], "00001234");
        assert_eq!(json["variable_type"], "2 Bytes");
        assert_eq!(json["offsets"][1], "-0x4");
        assert_eq!(json["has_script"], false);
    }
}
