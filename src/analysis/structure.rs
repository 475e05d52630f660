//! Field-by-field structure inference over untyped bytes

use super::detect::{detect_data_types, Detection};
use super::disasm::{self, Architecture, Disassembler, Disassembly};
use super::heuristics::{self, Candidate};
use crate::core::types::{Address, MemoryResult, MemoryValue, PointerWidth};
use crate::memory::reader::MemoryReader;
use crate::memory::source::MemorySource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Walk stops once this many bytes or fewer remain
const TAIL_BYTES: usize = 4;

/// Inferred type of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Pointer32,
    Pointer64,
    I16,
    U16,
    I32,
    U32,
    Float,
    String,
    Byte,
}

impl FieldType {
    pub fn is_pointer(&self) -> bool {
        matches!(self, FieldType::Pointer32 | FieldType::Pointer64)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Pointer32 => "ptr32",
            FieldType::Pointer64 => "ptr64",
            FieldType::I16 => "int16",
            FieldType::U16 => "uint16",
            FieldType::I32 => "int32",
            FieldType::U32 => "uint32",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Byte => "uint8",
        }
    }

    fn name_prefix(&self) -> &'static str {
        match self {
            FieldType::Pointer32 | FieldType::Pointer64 => "ptr",
            FieldType::Float => "float",
            FieldType::String => "str",
            FieldType::Byte => "byte",
            _ => "field",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inferred field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub offset: usize,
    pub size: usize,
    pub field_type: FieldType,
    pub name: String,
    pub value: MemoryValue,
    pub confidence: f64,
    /// Structure behind a pointer field, when recursive analysis reached it
    pub target: Option<Box<StructureInfo>>,
}

impl FieldInfo {
    fn from_candidate(offset: usize, candidate: Candidate) -> Self {
        FieldInfo {
            offset,
            size: candidate.size,
            name: format!("{}_{:X}", candidate.field_type.name_prefix(), offset),
            field_type: candidate.field_type,
            value: candidate.value,
            confidence: candidate.confidence,
            target: None,
        }
    }

    /// Pointer value carried by a pointer field
    pub fn pointer_value(&self) -> Option<Address> {
        if !self.field_type.is_pointer() {
            return None;
        }
        match self.value {
            MemoryValue::U32(v) => Some(Address::new(v as usize)),
            MemoryValue::U64(v) => usize::try_from(v).ok().map(Address::new),
            _ => None,
        }
    }
}

/// Human-facing classification of a whole structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureKind {
    /// More than half of the fields are pointers
    VtableOrObject,
    StringContainer,
    SimpleStruct,
    ComplexStruct,
}

impl StructureKind {
    pub fn classify(fields: &[FieldInfo]) -> Self {
        let pointers = fields.iter().filter(|f| f.field_type.is_pointer()).count();
        if pointers * 2 > fields.len() {
            StructureKind::VtableOrObject
        } else if fields.iter().any(|f| f.field_type == FieldType::String) {
            StructureKind::StringContainer
        } else if fields.len() < 5 {
            StructureKind::SimpleStruct
        } else {
            StructureKind::ComplexStruct
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StructureKind::VtableOrObject => "vtable_or_object",
            StructureKind::StringContainer => "string_container",
            StructureKind::SimpleStruct => "simple_struct",
            StructureKind::ComplexStruct => "complex_struct",
        }
    }
}

/// Result of analysing one buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureInfo {
    pub base_address: Address,
    pub total_size: usize,
    /// Ordered, contiguous, non-overlapping
    pub fields: Vec<FieldInfo>,
    /// Mean field confidence
    pub confidence: f64,
    pub kind: StructureKind,
    /// Caller hint, else the classification
    pub name: Option<String>,
}

impl StructureInfo {
    /// Bytes covered by fields
    pub fn covered(&self) -> usize {
        self.fields.iter().map(|f| f.size).sum()
    }

    pub fn pointer_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter().filter(|f| f.field_type.is_pointer())
    }
}

/// Infers fields over `data` as laid out at `base`
///
/// The walk always advances: when no candidate clears its threshold a
/// low-confidence raw byte is emitted.
pub fn analyze_bytes(
    data: &[u8],
    base: Address,
    width: PointerWidth,
    hint: Option<&str>,
) -> StructureInfo {
    let mut fields = Vec::new();
    let mut offset = 0;

    while data.len() - offset > TAIL_BYTES {
        let candidate = best_candidate(&data[offset..], width);
        let Some(candidate) = candidate else {
            break;
        };
        let field = FieldInfo::from_candidate(offset, candidate);
        offset += field.size.max(1);
        fields.push(field);
    }

    let confidence = if fields.is_empty() {
        0.0
    } else {
        fields.iter().map(|f| f.confidence).sum::<f64>() / fields.len() as f64
    };
    let kind = StructureKind::classify(&fields);

    StructureInfo {
        base_address: base,
        total_size: data.len(),
        name: Some(hint.map(str::to_string).unwrap_or_else(|| kind.as_str().to_string())),
        fields,
        confidence,
        kind,
    }
}

fn best_candidate(rest: &[u8], width: PointerWidth) -> Option<Candidate> {
    let clears = |threshold: f64| move |c: &Candidate| c.confidence >= threshold;

    // 8-byte pointers only exist in 64-bit targets
    let wide_pointer = if width == PointerWidth::Eight {
        heuristics::pointer(rest, 8)
    } else {
        None
    };

    wide_pointer
        .filter(clears(heuristics::POINTER_THRESHOLD))
        .or_else(|| heuristics::pointer(rest, 4).filter(clears(heuristics::POINTER_THRESHOLD)))
        .or_else(|| heuristics::integer(rest, 4).filter(clears(heuristics::SCALAR_THRESHOLD)))
        .or_else(|| heuristics::integer(rest, 2).filter(clears(heuristics::SCALAR_THRESHOLD)))
        .or_else(|| heuristics::float(rest).filter(clears(heuristics::SCALAR_THRESHOLD)))
        .or_else(|| heuristics::string(rest).filter(clears(heuristics::STRING_THRESHOLD)))
        .or_else(|| heuristics::raw_byte(rest))
}

/// Structure analysis over a memory source, following pointer fields
pub struct StructureAnalyzer<'a, S: MemorySource + ?Sized> {
    reader: MemoryReader<'a, S>,
    depth: usize,
    disassembler: Option<&'a dyn Disassembler>,
}

impl<'a, S: MemorySource + ?Sized> StructureAnalyzer<'a, S> {
    /// `depth` is how many pointer hops recursive analysis may follow
    pub fn new(reader: MemoryReader<'a, S>, depth: usize) -> Self {
        StructureAnalyzer {
            reader,
            depth,
            disassembler: None,
        }
    }

    pub fn with_disassembler(mut self, disassembler: Option<&'a dyn Disassembler>) -> Self {
        self.disassembler = disassembler;
        self
    }

    pub fn reader(&self) -> &MemoryReader<'a, S> {
        &self.reader
    }

    /// Strings, pointers and function prologues in `[address, address + size)`
    pub fn detect_data_types(&self, address: Address, size: usize) -> MemoryResult<Vec<Detection>> {
        let data = self.reader.read_bytes(address, size)?;
        Ok(detect_data_types(&data, address))
    }

    /// Decodes `size` bytes of code at `address` for the target's architecture
    pub fn disassemble(&self, address: Address, size: usize) -> MemoryResult<Disassembly> {
        let data = self.reader.read_bytes(address, size)?;
        let arch = Architecture::from(self.reader.pointer_width());
        disasm::disassemble(self.disassembler, &data, address, arch)
    }

    /// Reads `size` bytes at `address` and infers their layout
    pub fn analyze(&self, address: Address, size: usize, hint: Option<&str>) -> MemoryResult<StructureInfo> {
        let data = self.reader.read_bytes(address, size)?;
        Ok(analyze_bytes(&data, address, self.reader.pointer_width(), hint))
    }

    /// Like [`analyze`](Self::analyze), then analyses the targets of pointer
    /// fields with the same size, up to the configured depth
    ///
    /// Unreadable targets and cycles are left unexpanded.
    pub fn analyze_recursive(
        &self,
        address: Address,
        size: usize,
        hint: Option<&str>,
    ) -> MemoryResult<StructureInfo> {
        let mut root = self.analyze(address, size, hint)?;
        let mut visited = HashSet::from([address]);
        self.expand(&mut root, size, self.depth, &mut visited);
        Ok(root)
    }

    fn expand(
        &self,
        info: &mut StructureInfo,
        size: usize,
        remaining: usize,
        visited: &mut HashSet<Address>,
    ) {
        if remaining == 0 {
            return;
        }
        let width = self.reader.pointer_width();

        for field in info.fields.iter_mut() {
            let Some(target) = field.pointer_value() else {
                continue;
            };
            if target.is_null() || !target.is_user_space(width) || !visited.insert(target) {
                continue;
            }
            match self.analyze(target, size, None) {
                Ok(mut child) => {
                    self.expand(&mut child, size, remaining - 1, visited);
                    field.target = Some(Box::new(child));
                }
                Err(e) => debug!("Not following {} at +0x{:X}: {}", target, field.offset, e),
            }
        }
    }
}
