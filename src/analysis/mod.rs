//! Structure and data-type inference over raw memory
//!
//! - [`structure`]: field-by-field layout inference with confidence scores
//! - [`detect`]: whole-buffer string, pointer and prologue detection
//! - [`disasm`]: the pluggable instruction decoder

pub mod detect;
pub mod disasm;
pub mod heuristics;
pub mod structure;

pub use detect::{detect_data_types, Detection, DetectionKind, TextEncoding};
pub use disasm::{default_disassembler, Architecture, Disassembler, Disassembly, Instruction};
pub use structure::{analyze_bytes, FieldInfo, FieldType, StructureAnalyzer, StructureInfo, StructureKind};
