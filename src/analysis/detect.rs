//! Whole-buffer detection of strings, pointers and function prologues

use super::heuristics::is_printable;
use crate::core::types::{Address, PointerWidth};
use byteorder::{ByteOrder, LittleEndian};
use memchr::memmem;
use serde::{Deserialize, Serialize};

/// Shortest run reported as a string
pub const MIN_DETECTED_STRING: usize = 4;
pub const PROLOGUE_CONFIDENCE: f64 = 0.7;

/// Common x86/x64 function entry sequences
pub const PROLOGUES: &[&[u8]] = &[
    &[0x55, 0x8B, 0xEC],       // push ebp; mov ebp, esp
    &[0x48, 0x89, 0x5C, 0x24], // mov [rsp+xx], rbx
    &[0x40, 0x53],             // push rbx (REX)
    &[0x48, 0x83, 0xEC],       // sub rsp, xx
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    Ascii,
    Utf16Le,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DetectionKind {
    String {
        encoding: TextEncoding,
        value: String,
        /// Length in bytes
        length: usize,
    },
    Pointer {
        width: PointerWidth,
        target: Address,
    },
    FunctionPrologue {
        pattern: String,
        confidence: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub address: Address,
    pub kind: DetectionKind,
}

/// Runs every detector over `data` and returns the hits ordered by address
pub fn detect_data_types(data: &[u8], base: Address) -> Vec<Detection> {
    let mut detections = find_ascii_strings(data, base);
    detections.extend(find_utf16_strings(data, base));
    detections.extend(find_pointers(data, base));
    detections.extend(find_prologues(data, base));
    // Stable: at equal addresses detector order is kept
    detections.sort_by_key(|d| d.address);
    detections
}

fn at(base: Address, offset: usize) -> Address {
    Address::new(base.as_usize().wrapping_add(offset))
}

/// Maximal printable runs of at least [`MIN_DETECTED_STRING`] bytes
pub fn find_ascii_strings(data: &[u8], base: Address) -> Vec<Detection> {
    let mut found = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let run = data[i..].iter().take_while(|&&b| is_printable(b)).count();
        if run >= MIN_DETECTED_STRING {
            found.push(Detection {
                address: at(base, i),
                kind: DetectionKind::String {
                    encoding: TextEncoding::Ascii,
                    value: data[i..i + run].iter().map(|&b| b as char).collect(),
                    length: run,
                },
            });
        }
        i += run.max(1);
    }
    found
}

/// Runs of printable-ASCII UTF-16LE code units, at least four characters long
pub fn find_utf16_strings(data: &[u8], base: Address) -> Vec<Detection> {
    let mut found = Vec::new();
    let mut i = 0;
    while i + 1 < data.len() {
        let chars = data[i..]
            .chunks_exact(2)
            .take_while(|pair| is_printable(pair[0]) && pair[1] == 0)
            .count();
        if chars >= MIN_DETECTED_STRING {
            found.push(Detection {
                address: at(base, i),
                kind: DetectionKind::String {
                    encoding: TextEncoding::Utf16Le,
                    value: data[i..i + chars * 2].iter().step_by(2).map(|&b| b as char).collect(),
                    length: chars * 2,
                },
            });
            i += chars * 2;
        } else {
            i += 1;
        }
    }
    found
}

/// Aligned 32-bit and 64-bit values in the typical user-mode range
pub fn find_pointers(data: &[u8], base: Address) -> Vec<Detection> {
    let narrow = data.chunks_exact(4).enumerate().filter_map(|(i, slot)| {
        let value = LittleEndian::read_u32(slot);
        (0x40_0000..=0x7FFF_FFFF).contains(&value).then(|| Detection {
            address: at(base, i * 4),
            kind: DetectionKind::Pointer {
                width: PointerWidth::Four,
                target: Address::new(value as usize),
            },
        })
    });

    let wide = data.chunks_exact(8).enumerate().filter_map(|(i, slot)| {
        let value = LittleEndian::read_u64(slot);
        if !(0x1_0000..=0x7FFF_FFFF_FFFF).contains(&value) {
            return None;
        }
        let target = usize::try_from(value).ok()?;
        Some(Detection {
            address: at(base, i * 8),
            kind: DetectionKind::Pointer {
                width: PointerWidth::Eight,
                target: Address::new(target),
            },
        })
    });

    narrow.chain(wide).collect()
}

pub fn find_prologues(data: &[u8], base: Address) -> Vec<Detection> {
    PROLOGUES
        .iter()
        .flat_map(|prologue| {
            let pattern = hex_bytes(prologue);
            memmem::find_iter(data, prologue).map(move |offset| Detection {
                address: at(base, offset),
                kind: DetectionKind::FunctionPrologue {
                    pattern: pattern.clone(),
                    confidence: PROLOGUE_CONFIDENCE,
                },
            })
        })
        .collect()
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(detections: &[Detection]) -> Vec<(usize, String, TextEncoding)> {
        detections
            .iter()
            .filter_map(|d| match &d.kind {
                DetectionKind::String { encoding, value, .. } => {
                    Some((d.address.as_usize(), value.clone(), *encoding))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ascii_and_utf16_strings() {
        let mut data = b"\x01\x02Hello\x00ab\x01".to_vec();
        data.extend("Wide".encode_utf16().flat_map(|u| u.to_le_bytes()));
        let found = strings(&find_ascii_strings(&data, Address::new(0x100)));
        assert_eq!(found, vec![(0x102, "Hello".to_string(), TextEncoding::Ascii)]);

        let wide = strings(&find_utf16_strings(&data, Address::new(0x100)));
        assert_eq!(wide, vec![(0x10B, "Wide".to_string(), TextEncoding::Utf16Le)]);
    }

    #[test]
    fn test_pointer_detection() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x0040_1000u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0x7FF6_0000_2000u64.to_le_bytes());

        let found = find_pointers(&data, Address::new(0));
        let targets: Vec<(usize, usize)> = found
            .iter()
            .filter_map(|d| match d.kind {
                DetectionKind::Pointer { target, .. } => {
                    Some((d.address.as_usize(), target.as_usize()))
                }
                _ => None,
            })
            .collect();
        assert!(targets.contains(&(0, 0x40_1000)));
        assert!(targets.contains(&(8, 0x7FF6_0000_2000)));
    }

    #[test]
    fn test_prologues_and_ordering() {
        let data = [0x90, 0x55, 0x8B, 0xEC, 0x90, 0x48, 0x83, 0xEC, 0x28];
        let found = detect_data_types(&data, Address::new(0x1000));
        let prologues: Vec<_> = found
            .iter()
            .filter(|d| matches!(d.kind, DetectionKind::FunctionPrologue { .. }))
            .map(|d| d.address.as_usize())
            .collect();
        assert_eq!(prologues, vec![0x1001, 0x1005]);
        assert!(found.windows(2).all(|w| w[0].address <= w[1].address));
    }
}
