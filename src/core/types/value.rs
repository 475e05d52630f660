//! Typed memory values and their little-endian byte encodings

use super::error::{MemoryError, MemoryResult};
use byteorder::{ByteOrder, LE};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Text encoding of a string in target memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringEncoding {
    Utf8,
    /// UTF-16LE
    Utf16,
}

impl StringEncoding {
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            StringEncoding::Utf8 => text.as_bytes().to_vec(),
            StringEncoding::Utf16 => text.encode_utf16().flat_map(|w| w.to_le_bytes()).collect(),
        }
    }

    /// Decodes `bytes` up to the first NUL (or NUL code unit); invalid
    /// sequences are replaced
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            StringEncoding::Utf8 => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                String::from_utf8_lossy(&bytes[..end]).into_owned()
            }
            StringEncoding::Utf16 => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .take_while(|&unit| unit != 0)
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}

/// A value decoded from (or to be encoded into) target memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MemoryValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bytes(Vec<u8>),
    String(String),
}

impl MemoryValue {
    /// Returns the size in bytes of the value
    pub fn size(&self) -> usize {
        match self {
            MemoryValue::Bytes(b) => b.len(),
            MemoryValue::String(s) => s.len(),
            other => other.value_type().size().unwrap_or(0),
        }
    }

    /// Little-endian byte encoding (UTF-8 for strings)
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MemoryValue::I8(v) => v.to_le_bytes().to_vec(),
            MemoryValue::I16(v) => v.to_le_bytes().to_vec(),
            MemoryValue::I32(v) => v.to_le_bytes().to_vec(),
            MemoryValue::I64(v) => v.to_le_bytes().to_vec(),
            MemoryValue::U8(v) => v.to_le_bytes().to_vec(),
            MemoryValue::U16(v) => v.to_le_bytes().to_vec(),
            MemoryValue::U32(v) => v.to_le_bytes().to_vec(),
            MemoryValue::U64(v) => v.to_le_bytes().to_vec(),
            MemoryValue::F32(v) => v.to_le_bytes().to_vec(),
            MemoryValue::F64(v) => v.to_le_bytes().to_vec(),
            MemoryValue::Bytes(b) => b.clone(),
            MemoryValue::String(s) => s.as_bytes().to_vec(),
        }
    }

    /// Every byte encoding an exact scan should look for.
    ///
    /// Strings are searched both as UTF-8 and as UTF-16LE and carry the text
    /// encoding alongside; every other value has exactly one encoding.
    pub fn encodings(&self) -> Vec<(Vec<u8>, Option<StringEncoding>)> {
        match self {
            MemoryValue::String(s) => vec![
                (s.as_bytes().to_vec(), Some(StringEncoding::Utf8)),
                (StringEncoding::Utf16.encode(s), Some(StringEncoding::Utf16)),
            ],
            other => vec![(other.to_bytes(), None)],
        }
    }

    /// Decodes a value of the given type from the start of `bytes`
    pub fn from_bytes(bytes: &[u8], value_type: ValueType) -> Option<Self> {
        if let Some(size) = value_type.size() {
            if bytes.len() < size {
                return None;
            }
        }

        let value = match value_type {
            ValueType::I8 => MemoryValue::I8(bytes[0] as i8),
            ValueType::I16 => MemoryValue::I16(LE::read_i16(bytes)),
            ValueType::I32 => MemoryValue::I32(LE::read_i32(bytes)),
            ValueType::I64 => MemoryValue::I64(LE::read_i64(bytes)),
            ValueType::U8 => MemoryValue::U8(bytes[0]),
            ValueType::U16 => MemoryValue::U16(LE::read_u16(bytes)),
            ValueType::U32 => MemoryValue::U32(LE::read_u32(bytes)),
            ValueType::U64 => MemoryValue::U64(LE::read_u64(bytes)),
            ValueType::F32 => MemoryValue::F32(LE::read_f32(bytes)),
            ValueType::F64 => MemoryValue::F64(LE::read_f64(bytes)),
            ValueType::Bytes => MemoryValue::Bytes(bytes.to_vec()),
            ValueType::String => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                MemoryValue::String(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
        };
        Some(value)
    }

    /// Parses user-supplied text as a value of the given type.
    ///
    /// Integers accept decimal or `0x` hex, byte arrays accept a hex string with
    /// optional whitespace.
    pub fn parse(text: &str, value_type: ValueType) -> MemoryResult<Self> {
        let trimmed = text.trim();
        let invalid = || MemoryError::invalid_value(trimmed, value_type);

        let value = match value_type {
            ValueType::I8 => MemoryValue::I8(parse_int(trimmed).ok_or_else(invalid)?),
            ValueType::I16 => MemoryValue::I16(parse_int(trimmed).ok_or_else(invalid)?),
            ValueType::I32 => MemoryValue::I32(parse_int(trimmed).ok_or_else(invalid)?),
            ValueType::I64 => MemoryValue::I64(parse_int(trimmed).ok_or_else(invalid)?),
            ValueType::U8 => MemoryValue::U8(parse_int(trimmed).ok_or_else(invalid)?),
            ValueType::U16 => MemoryValue::U16(parse_int(trimmed).ok_or_else(invalid)?),
            ValueType::U32 => MemoryValue::U32(parse_int(trimmed).ok_or_else(invalid)?),
            ValueType::U64 => MemoryValue::U64(parse_int(trimmed).ok_or_else(invalid)?),
            ValueType::F32 => MemoryValue::F32(trimmed.parse().map_err(|_| invalid())?),
            ValueType::F64 => MemoryValue::F64(trimmed.parse().map_err(|_| invalid())?),
            ValueType::Bytes => {
                let compact: String = trimmed.split_whitespace().collect();
                MemoryValue::Bytes(hex::decode(compact).map_err(|_| invalid())?)
            }
            ValueType::String => MemoryValue::String(text.to_string()),
        };
        Ok(value)
    }

    /// Gets the value type enum for this value
    pub fn value_type(&self) -> ValueType {
        match self {
            MemoryValue::I8(_) => ValueType::I8,
            MemoryValue::I16(_) => ValueType::I16,
            MemoryValue::I32(_) => ValueType::I32,
            MemoryValue::I64(_) => ValueType::I64,
            MemoryValue::U8(_) => ValueType::U8,
            MemoryValue::U16(_) => ValueType::U16,
            MemoryValue::U32(_) => ValueType::U32,
            MemoryValue::U64(_) => ValueType::U64,
            MemoryValue::F32(_) => ValueType::F32,
            MemoryValue::F64(_) => ValueType::F64,
            MemoryValue::Bytes(_) => ValueType::Bytes,
            MemoryValue::String(_) => ValueType::String,
        }
    }

    /// Integer view of the value, if it is an integer
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            MemoryValue::I8(v) => Some(v as i128),
            MemoryValue::I16(v) => Some(v as i128),
            MemoryValue::I32(v) => Some(v as i128),
            MemoryValue::I64(v) => Some(v as i128),
            MemoryValue::U8(v) => Some(v as i128),
            MemoryValue::U16(v) => Some(v as i128),
            MemoryValue::U32(v) => Some(v as i128),
            MemoryValue::U64(v) => Some(v as i128),
            _ => None,
        }
    }

    /// Floating-point view of any numeric value
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            MemoryValue::F32(v) => Some(v as f64),
            MemoryValue::F64(v) => Some(v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    /// Orders two numeric values; integers compare exactly, floats by value.
    /// Non-numeric values (and NaN) have no ordering.
    pub fn numeric_cmp(&self, other: &MemoryValue) -> Option<Ordering> {
        match (self.as_i128(), other.as_i128()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }
}

fn parse_int<T>(text: &str) -> Option<T>
where
    T: TryFrom<i128>,
{
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => body.parse::<i128>().ok()?,
    };
    let value = if negative { -magnitude } else { magnitude };
    T::try_from(value).ok()
}

/// Enum representing the type of a memory value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bytes,
    String,
}

impl ValueType {
    /// Returns the size in bytes for this value type
    pub fn size(&self) -> Option<usize> {
        match self {
            ValueType::I8 | ValueType::U8 => Some(1),
            ValueType::I16 | ValueType::U16 => Some(2),
            ValueType::I32 | ValueType::U32 | ValueType::F32 => Some(4),
            ValueType::I64 | ValueType::U64 | ValueType::F64 => Some(8),
            ValueType::Bytes | ValueType::String => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.size().is_some()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::I8 => "i8",
            ValueType::I16 => "i16",
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::U8 => "u8",
            ValueType::U16 => "u16",
            ValueType::U32 => "u32",
            ValueType::U64 => "u64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::Bytes => "bytes",
            ValueType::String => "string",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value_type = match s.trim().to_ascii_lowercase().as_str() {
            "i8" | "int8" | "sbyte" => ValueType::I8,
            "i16" | "int16" | "short" => ValueType::I16,
            "i32" | "int32" | "int" => ValueType::I32,
            "i64" | "int64" | "long" => ValueType::I64,
            "u8" | "uint8" | "byte" => ValueType::U8,
            "u16" | "uint16" | "word" => ValueType::U16,
            "u32" | "uint32" | "dword" => ValueType::U32,
            "u64" | "uint64" | "qword" => ValueType::U64,
            "f32" | "float" => ValueType::F32,
            "f64" | "double" => ValueType::F64,
            "bytes" | "aob" => ValueType::Bytes,
            "string" | "str" => ValueType::String,
            other => return Err(MemoryError::InvalidValueType(other.to_string())),
        };
        Ok(value_type)
    }
}

impl fmt::Display for MemoryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryValue::I8(v) => write!(f, "{}", v),
            MemoryValue::I16(v) => write!(f, "{}", v),
            MemoryValue::I32(v) => write!(f, "{}", v),
            MemoryValue::I64(v) => write!(f, "{}", v),
            MemoryValue::U8(v) => write!(f, "{}", v),
            MemoryValue::U16(v) => write!(f, "{}", v),
            MemoryValue::U32(v) => write!(f, "{}", v),
            MemoryValue::U64(v) => write!(f, "{}", v),
            MemoryValue::F32(v) => write!(f, "{}", v),
            MemoryValue::F64(v) => write!(f, "{}", v),
            MemoryValue::Bytes(b) => write!(f, "{}", hex::encode_upper(b)),
            MemoryValue::String(s) => write!(f, "\"{}\"", s),
        }
    }
}
