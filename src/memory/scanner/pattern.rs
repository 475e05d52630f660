//! Wildcard byte patterns (`"48 8B ? 48 89 05"`)

use crate::core::types::{MemoryError, MemoryResult};
use memchr::memmem::Finder;
use std::fmt;
use std::str::FromStr;

/// A byte pattern with a per-byte "must match" mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<u8>,
    mask: Vec<bool>,
}

impl Pattern {
    /// Parses whitespace-separated tokens: one or two hex digits, or `?`/`??`
    /// for any byte. Any other token rejects the whole pattern.
    pub fn parse(text: &str) -> MemoryResult<Self> {
        let mut bytes = Vec::new();
        let mut mask = Vec::new();

        for token in text.split_whitespace() {
            if token == "?" || token == "??" {
                bytes.push(0);
                mask.push(false);
                continue;
            }
            if token.is_empty() || token.len() > 2 {
                return Err(MemoryError::InvalidPattern(format!(
                    "invalid token '{}': expected 1-2 hex digits or ?",
                    token
                )));
            }
            let byte = u8::from_str_radix(token, 16).map_err(|_| {
                MemoryError::InvalidPattern(format!("invalid hex byte '{}'", token))
            })?;
            bytes.push(byte);
            mask.push(true);
        }

        if bytes.is_empty() {
            return Err(MemoryError::InvalidPattern("empty pattern".to_string()));
        }
        Ok(Pattern { bytes, mask })
    }

    /// Pattern with every byte significant
    pub fn exact(bytes: &[u8]) -> Self {
        Pattern {
            bytes: bytes.to_vec(),
            mask: vec![true; bytes.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Whether the pattern matches at the start of `data`
    pub fn matches_at(&self, data: &[u8]) -> bool {
        data.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(&self.mask)
                .zip(data)
                .all(|((&p, &m), &d)| !m || p == d)
    }

    /// Longest run of significant bytes, as (offset, bytes)
    fn anchor(&self) -> (usize, &[u8]) {
        let mut best = (0, 0);
        let mut start = 0;
        let mut len = 0;
        for (i, &significant) in self.mask.iter().enumerate() {
            if significant {
                if len == 0 {
                    start = i;
                }
                len += 1;
                if len > best.1 {
                    best = (start, len);
                }
            } else {
                len = 0;
            }
        }
        (best.0, &self.bytes[best.0..best.0 + best.1])
    }

    /// Compiles the pattern for repeated searching
    pub fn matcher(&self) -> PatternMatcher<'_> {
        let (anchor_offset, anchor) = self.anchor();
        PatternMatcher {
            pattern: self,
            anchor_offset,
            finder: (!anchor.is_empty()).then(|| Finder::new(anchor)),
        }
    }
}

impl FromStr for Pattern {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pattern::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<String> = self
            .bytes
            .iter()
            .zip(&self.mask)
            .map(|(b, &m)| if m { format!("{:02X}", b) } else { "??".to_string() })
            .collect();
        f.write_str(&tokens.join(" "))
    }
}

/// Searches buffers for a [`Pattern`], using the longest literal run as a
/// memmem anchor and verifying the full mask at each candidate
pub struct PatternMatcher<'p> {
    pattern: &'p Pattern,
    anchor_offset: usize,
    finder: Option<Finder<'p>>,
}

impl PatternMatcher<'_> {
    /// Offsets of every match in `data`, overlapping matches included,
    /// stopping after `limit` matches
    pub fn find_all(&self, data: &[u8], limit: usize) -> Vec<usize> {
        let plen = self.pattern.len();
        let mut hits = Vec::new();
        if data.len() < plen || limit == 0 {
            return hits;
        }

        let Some(finder) = &self.finder else {
            // All wildcards: every position with room for the pattern matches
            hits.extend((0..=data.len() - plen).take(limit));
            return hits;
        };

        let mut pos = self.anchor_offset;
        while pos < data.len() {
            let Some(found) = finder.find(&data[pos..]) else {
                break;
            };
            let anchor_at = pos + found;
            let start = anchor_at - self.anchor_offset;
            if start + plen > data.len() {
                break;
            }
            if self.pattern.matches_at(&data[start..]) {
                hits.push(start);
                if hits.len() >= limit {
                    break;
                }
            }
            pos = anchor_at + 1;
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_tokens() {
        let pattern = Pattern::parse("48 8B ? 48 89 05").unwrap();
        assert_eq!(pattern.len(), 6);
        assert_eq!(pattern.mask(), &[true, true, false, true, true, true]);
        assert_eq!(pattern.to_string(), "48 8B ?? 48 89 05");

        let short = Pattern::parse("A ?? f").unwrap();
        assert_eq!(short.bytes(), &[0x0A, 0x00, 0x0F]);
    }

    #[test]
    fn test_parse_rejects_bad_tokens() {
        assert!(Pattern::parse("").is_err());
        assert!(Pattern::parse("   ").is_err());
        assert!(Pattern::parse("GG").is_err());
        assert!(Pattern::parse("123").is_err());
        assert!(Pattern::parse("48 ???").is_err());
        assert!(matches!(
            Pattern::parse("48 zz").unwrap_err(),
            MemoryError::InvalidPattern(_)
        ));
    }

    #[test]
    fn test_example_pattern() {
        let pattern = Pattern::parse("48 8B ? 48 89 05").unwrap();
        let matcher = pattern.matcher();
        assert_eq!(matcher.find_all(&[0x48, 0x8B, 0x45, 0x48, 0x89, 0x05], 10), vec![0]);
        assert!(matcher.find_all(&[0x48, 0x8B, 0x45, 0x48, 0x89, 0x06], 10).is_empty());
    }

    #[test]
    fn test_overlapping_matches() {
        let pattern = Pattern::parse("AA AA").unwrap();
        let hits = pattern.matcher().find_all(&[0xAA, 0xAA, 0xAA, 0xAA], 10);
        assert_eq!(hits, vec![0, 1, 2]);

        let wild = Pattern::parse("AA ? AA").unwrap();
        let hits = wild.matcher().find_all(&[0xAA, 0x00, 0xAA, 0x00, 0xAA], 10);
        assert_eq!(hits, vec![0, 2]);
    }

    #[test]
    fn test_all_wildcards_and_limit() {
        let pattern = Pattern::parse("?? ??").unwrap();
        assert_eq!(pattern.matcher().find_all(&[1, 2, 3, 4], 10), vec![0, 1, 2]);
        assert_eq!(pattern.matcher().find_all(&[1, 2, 3, 4], 2), vec![0, 1]);
    }

    #[test]
    fn test_anchor_not_at_start() {
        let pattern = Pattern::parse("? ? 10 20 30").unwrap();
        let data = [0x10, 0x20, 0x30, 0xFF, 0xEE, 0x10, 0x20, 0x30];
        assert_eq!(pattern.matcher().find_all(&data, 10), vec![3]);
    }

    fn naive(pattern: &Pattern, data: &[u8]) -> Vec<usize> {
        if data.len() < pattern.len() {
            return Vec::new();
        }
        (0..=data.len() - pattern.len())
            .filter(|&i| pattern.matches_at(&data[i..]))
            .collect()
    }

    proptest! {
        #[test]
        fn prop_matches_are_sound_and_complete(
            data in proptest::collection::vec(0u8..4, 0..256),
            tokens in proptest::collection::vec(proptest::option::of(0u8..4), 1..6),
        ) {
            let text: Vec<String> = tokens
                .iter()
                .map(|t| t.map(|b| format!("{:02X}", b)).unwrap_or_else(|| "?".to_string()))
                .collect();
            let pattern = Pattern::parse(&text.join(" ")).unwrap();
            let hits = pattern.matcher().find_all(&data, usize::MAX);
            prop_assert_eq!(hits, naive(&pattern, &data));
        }
    }
}
