//! Per-chunk match collection for the three scan kinds

use super::pattern::{Pattern, PatternMatcher};
use crate::core::types::{
    Address, MemoryError, MemoryResult, MemoryValue, RegionRef, ScanResult, StringEncoding, ValueType,
};
use std::cmp::Ordering;

pub(super) enum Matcher<'p> {
    /// Byte equality against one or more encodings of a value
    Exact {
        value: &'p MemoryValue,
        encodings: Vec<(PatternMatcher<'p>, usize, Option<StringEncoding>)>,
        align: usize,
    },
    /// Decode every aligned slot and test `min <= v <= max`
    Range {
        min: &'p MemoryValue,
        max: &'p MemoryValue,
        value_type: ValueType,
        width: usize,
    },
    /// Wildcard byte pattern
    Pattern { matcher: PatternMatcher<'p>, len: usize },
}

impl<'p> Matcher<'p> {
    pub(super) fn exact(
        value: &'p MemoryValue,
        encodings: &'p [(Pattern, Option<StringEncoding>)],
        align: usize,
    ) -> Self {
        Matcher::Exact {
            value,
            encodings: encodings
                .iter()
                .map(|(p, encoding)| (p.matcher(), p.len(), *encoding))
                .collect(),
            align: align.max(1),
        }
    }

    pub(super) fn range(min: &'p MemoryValue, max: &'p MemoryValue) -> MemoryResult<Self> {
        let value_type = min.value_type();
        let width = value_type.size().ok_or_else(|| {
            MemoryError::InvalidValueType(format!("{} has no fixed width", value_type))
        })?;
        Ok(Matcher::Range {
            min,
            max,
            value_type,
            width,
        })
    }

    pub(super) fn pattern(pattern: &'p Pattern) -> Self {
        Matcher::Pattern {
            matcher: pattern.matcher(),
            len: pattern.len(),
        }
    }

    /// Longest byte span a single match can cover
    pub(super) fn window(&self) -> usize {
        match self {
            Matcher::Exact { encodings, .. } => {
                encodings.iter().map(|(_, len, _)| *len).max().unwrap_or(1)
            }
            Matcher::Range { width, .. } => *width,
            Matcher::Pattern { len, .. } => *len,
        }
    }

    /// Shortest byte span any match can cover; smaller regions cannot hold a hit
    pub(super) fn min_window(&self) -> usize {
        match self {
            Matcher::Exact { encodings, .. } => {
                encodings.iter().map(|(_, len, _)| *len).min().unwrap_or(1)
            }
            _ => self.window(),
        }
    }

    /// Appends hits starting before `accept` in `chunk` to `out`, at most `room`
    pub(super) fn collect(
        &self,
        chunk: &[u8],
        base: Address,
        accept: usize,
        room: usize,
        region: RegionRef,
        out: &mut Vec<ScanResult>,
    ) {
        if room == 0 {
            return;
        }
        let at = |offset: usize| Address::new(base.as_usize() + offset);

        match self {
            Matcher::Exact {
                value,
                encodings,
                align,
            } => {
                let mut hits: Vec<(usize, usize, Option<StringEncoding>)> = Vec::new();
                for (matcher, len, encoding) in encodings {
                    hits.extend(
                        matcher
                            .find_all(chunk, usize::MAX)
                            .into_iter()
                            .take_while(|&offset| offset < accept)
                            .filter(|&offset| at(offset).is_aligned(*align))
                            .map(|offset| (offset, *len, *encoding)),
                    );
                }
                // Encodings are searched independently; an address matched by
                // several keeps the first one listed (UTF-8)
                hits.sort_by_key(|&(offset, _, _)| offset);
                hits.dedup_by_key(|&mut (offset, _, _)| offset);
                out.extend(hits.into_iter().take(room).map(|(offset, len, encoding)| {
                    ScanResult::new(at(offset), (*value).clone())
                        .matched_as(len, encoding)
                        .in_region(region)
                }));
            }
            Matcher::Range {
                min,
                max,
                value_type,
                width,
            } => {
                let first = (*width - base.as_usize() % *width) % *width;
                let mut taken = 0;
                let mut offset = first;
                while offset < accept && offset + *width <= chunk.len() && taken < room {
                    if let Some(value) = MemoryValue::from_bytes(&chunk[offset..], *value_type) {
                        if in_range(&value, min, max) {
                            out.push(ScanResult::new(at(offset), value).in_region(region));
                            taken += 1;
                        }
                    }
                    offset += *width;
                }
            }
            Matcher::Pattern { matcher, len } => {
                out.extend(
                    matcher
                        .find_all(chunk, room)
                        .into_iter()
                        .take_while(|&offset| offset < accept)
                        .map(|offset| {
                            let bytes = chunk[offset..offset + *len].to_vec();
                            ScanResult::new(at(offset), MemoryValue::Bytes(bytes)).in_region(region)
                        }),
                );
            }
        }
    }
}

fn in_range(value: &MemoryValue, min: &MemoryValue, max: &MemoryValue) -> bool {
    matches!(
        min.numeric_cmp(value),
        Some(Ordering::Less) | Some(Ordering::Equal)
    ) && matches!(
        value.numeric_cmp(max),
        Some(Ordering::Less) | Some(Ordering::Equal)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> RegionRef {
        RegionRef {
            base_address: Address::new(0x1000),
            size: 0x100,
        }
    }

    #[test]
    fn test_range_slots_are_absolute_aligned() {
        let min = MemoryValue::U16(5);
        let max = MemoryValue::U16(5);
        let matcher = Matcher::range(&min, &max).unwrap();
        // Chunk starts at an odd address: slot 0 of the chunk is misaligned
        let chunk = [0x05, 0x05, 0x00, 0x05, 0x00];
        let mut out = Vec::new();
        matcher.collect(&chunk, Address::new(0x1001), chunk.len(), 10, region(), &mut out);
        let addresses: Vec<_> = out.iter().map(|r| r.address).collect();
        assert_eq!(addresses, vec![Address::new(0x1002)]);
    }

    #[test]
    fn test_float_range_ignores_nan() {
        let min = MemoryValue::F32(0.0);
        let max = MemoryValue::F32(10.0);
        let matcher = Matcher::range(&min, &max).unwrap();
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&f32::NAN.to_le_bytes());
        chunk.extend_from_slice(&2.5f32.to_le_bytes());
        let mut out = Vec::new();
        matcher.collect(&chunk, Address::new(0x1000), chunk.len(), 10, region(), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, MemoryValue::F32(2.5));
    }

    #[test]
    fn test_accept_limit() {
        let pattern = Pattern::parse("AB").unwrap();
        let matcher = Matcher::pattern(&pattern);
        let chunk = [0xAB; 8];
        let mut out = Vec::new();
        matcher.collect(&chunk, Address::new(0x1000), 3, 10, region(), &mut out);
        assert_eq!(out.len(), 3);
    }
}
