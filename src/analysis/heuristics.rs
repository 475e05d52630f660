//! Per-offset field candidates and their confidence scores
//!
//! Scores are heuristic weights in `[0, 1]`, not probabilities. Each
//! candidate is tried independently; the walk in
//! [`super::structure`] decides which one wins.

use super::structure::FieldType;
use crate::core::types::MemoryValue;
use byteorder::{ByteOrder, LittleEndian};

pub const POINTER_THRESHOLD: f64 = 0.7;
pub const SCALAR_THRESHOLD: f64 = 0.5;
pub const STRING_THRESHOLD: f64 = 0.3;
/// Score of the fallback single-byte field
pub const RAW_BYTE_CONFIDENCE: f64 = 0.1;
/// Shortest printable run accepted as a string field
pub const MIN_STRING_LEN: usize = 3;

/// One possible interpretation of the bytes at an offset
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub field_type: FieldType,
    pub size: usize,
    pub value: MemoryValue,
    pub confidence: f64,
}

/// Pointer of `size` bytes (4 or 8) at the start of `data`
pub fn pointer(data: &[u8], size: usize) -> Option<Candidate> {
    let (raw, field_type, value) = match size {
        4 => {
            let v = LittleEndian::read_u32(data.get(..4)?);
            (v as u64, FieldType::Pointer32, MemoryValue::U32(v))
        }
        8 => {
            let v = LittleEndian::read_u64(data.get(..8)?);
            (v, FieldType::Pointer64, MemoryValue::U64(v))
        }
        _ => return None,
    };

    Some(Candidate {
        field_type,
        size,
        value,
        confidence: pointer_confidence(raw, size),
    })
}

pub fn pointer_confidence(value: u64, size: usize) -> f64 {
    // Null fields are everywhere in real structures
    if value == 0 {
        return 0.8;
    }

    let mut confidence: f64 = 0.0;
    if size == 4 {
        if (0x40_0000..=0x7FFF_FFFF).contains(&value) {
            confidence += 0.6;
        } else if (0x1_0000..0x40_0000).contains(&value) {
            confidence += 0.3;
        }
    } else if (0x1_0000..=0x7FFF_FFFF_FFFF).contains(&value) {
        confidence += 0.6;
    } else if value >= 0xFFFF_8000_0000_0000 {
        // Kernel half: plausible as a pointer, never dereferenceable from user mode
        confidence += 0.4;
    }

    if value % 4 == 0 {
        confidence += 0.2;
    }
    if value % 8 == 0 {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

/// Integer of `size` bytes (2 or 4); signed when that reading is smaller in magnitude
pub fn integer(data: &[u8], size: usize) -> Option<Candidate> {
    let (unsigned, signed, all_ones) = match size {
        2 => {
            let u = LittleEndian::read_u16(data.get(..2)?);
            (u as u64, u as i16 as i64, u == u16::MAX)
        }
        4 => {
            let u = LittleEndian::read_u32(data.get(..4)?);
            (u as u64, u as i32 as i64, u == u32::MAX)
        }
        _ => return None,
    };

    let mut confidence = 0.3;
    if unsigned <= 1000 {
        confidence += 0.3;
    } else if all_ones {
        confidence += 0.2;
    }

    let prefer_signed = signed != 0 && signed.unsigned_abs() < unsigned;
    if prefer_signed {
        confidence += 0.1;
    }

    let (field_type, value) = match (size, prefer_signed) {
        (2, true) => (FieldType::I16, MemoryValue::I16(signed as i16)),
        (2, false) => (FieldType::U16, MemoryValue::U16(unsigned as u16)),
        (_, true) => (FieldType::I32, MemoryValue::I32(signed as i32)),
        (_, false) => (FieldType::U32, MemoryValue::U32(unsigned as u32)),
    };

    Some(Candidate {
        field_type,
        size,
        value,
        confidence,
    })
}

/// Single-precision float at the start of `data`
pub fn float(data: &[u8]) -> Option<Candidate> {
    let value = LittleEndian::read_f32(data.get(..4)?);
    Some(Candidate {
        field_type: FieldType::Float,
        size: 4,
        value: MemoryValue::F32(value),
        confidence: float_confidence(value),
    })
}

pub fn float_confidence(value: f32) -> f64 {
    if value.is_nan() {
        return 0.0;
    }

    let mut confidence = 0.0;
    if (-1_000_000.0..=1_000_000.0).contains(&value) {
        confidence += 0.4;
        if (0.0..=1.0).contains(&value) {
            confidence += 0.2;
        } else if value.abs() < 10.0 {
            confidence += 0.1;
        }
    }
    if value == 0.0 || value == 1.0 {
        confidence += 0.2;
    }
    confidence
}

/// Printable ASCII run terminated by a NUL or a non-printable byte
///
/// A NUL terminator is counted in the field size; any other terminator
/// starts the next field. A run cut off by the end of `data` is rejected.
pub fn string(data: &[u8]) -> Option<Candidate> {
    let len = data.iter().take_while(|&&b| is_printable(b)).count();
    if len < MIN_STRING_LEN || data.get(len).is_none() {
        return None;
    }

    let text: String = data[..len].iter().map(|&b| b as char).collect();
    let mut confidence = 0.3;
    if is_identifier(&text) {
        confidence += 0.3;
    } else if text.contains(' ') {
        confidence += 0.2;
    }

    let size = if data.get(len) == Some(&0) { len + 1 } else { len };
    Some(Candidate {
        field_type: FieldType::String,
        size,
        value: MemoryValue::String(text),
        confidence,
    })
}

/// Fallback when nothing else scores high enough
pub fn raw_byte(data: &[u8]) -> Option<Candidate> {
    let byte = *data.first()?;
    Some(Candidate {
        field_type: FieldType::Byte,
        size: 1,
        value: MemoryValue::U8(byte),
        confidence: RAW_BYTE_CONFIDENCE,
    })
}

pub fn is_printable(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
