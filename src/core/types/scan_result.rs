//! Scan result types

use super::{Address, MemoryValue, StringEncoding, ValueType};
use serde::{Deserialize, Serialize};

/// Region a scan hit was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRef {
    pub base_address: Address,
    pub size: usize,
}

/// Result from a memory scan operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub address: Address,
    pub value: MemoryValue,
    pub value_type: ValueType,
    /// Number of bytes the value occupies in memory
    pub width: usize,
    /// Text encoding a string hit was found in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<StringEncoding>,
    pub previous_value: Option<MemoryValue>,
    pub region: Option<RegionRef>,
}

impl ScanResult {
    /// Creates a new scan result; the width is taken from the value
    pub fn new(address: Address, value: MemoryValue) -> Self {
        ScanResult {
            address,
            value_type: value.value_type(),
            width: value.size(),
            encoding: match value {
                MemoryValue::String(_) => Some(StringEncoding::Utf8),
                _ => None,
            },
            value,
            previous_value: None,
            region: None,
        }
    }

    /// Records the encoding a hit matched in and its width in bytes
    pub fn matched_as(mut self, width: usize, encoding: Option<StringEncoding>) -> Self {
        self.width = width;
        if encoding.is_some() {
            self.encoding = encoding;
        }
        self
    }

    pub fn in_region(mut self, region: RegionRef) -> Self {
        self.region = Some(region);
        self
    }

    /// Replaces the current value, keeping the old one as `previous_value`
    pub fn advance(mut self, value: MemoryValue) -> Self {
        let previous = std::mem::replace(&mut self.value, value);
        self.previous_value = Some(previous);
        self
    }
}

/// Results of a full scan, plus bookkeeping about what was covered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Hits ordered by address
    pub results: Vec<ScanResult>,
    /// The result cap was reached and later hits were dropped
    pub truncated: bool,
    pub regions_scanned: usize,
    /// Regions (or chunks) whose reads failed and were skipped
    pub regions_skipped: usize,
}

impl ScanReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.results.iter().map(|r| r.address).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_result_new() {
        let result = ScanResult::new(Address::new(0x2000), MemoryValue::U64(999));
        assert_eq!(result.value_type, ValueType::U64);
        assert_eq!(result.width, 8);
        assert!(result.previous_value.is_none());
        assert_eq!(result.encoding, None);
    }

    #[test]
    fn test_wide_string_hit() {
        let text = MemoryValue::String("Привет".to_string());
        let utf8 = ScanResult::new(Address::new(0x2000), text.clone());
        assert_eq!(utf8.encoding, Some(StringEncoding::Utf8));

        let width = StringEncoding::Utf16.encode("Привет").len();
        let wide = ScanResult::new(Address::new(0x2000), text).matched_as(width, Some(StringEncoding::Utf16));
        assert_eq!(wide.encoding, Some(StringEncoding::Utf16));
        // Same byte length as the UTF-8 form
        assert_eq!(wide.width, utf8.width);
    }

    #[test]
    fn test_advance_keeps_previous() {
        let result = ScanResult::new(Address::new(0x2000), MemoryValue::I32(100))
            .advance(MemoryValue::I32(150));
        assert_eq!(result.value, MemoryValue::I32(150));
        assert_eq!(result.previous_value, Some(MemoryValue::I32(100)));
    }

    #[test]
    fn test_report_addresses() {
        let report = ScanReport {
            results: vec![
                ScanResult::new(Address::new(0x10), MemoryValue::U8(1)),
                ScanResult::new(Address::new(0x20), MemoryValue::U8(1)),
            ],
            ..Default::default()
        };
        assert_eq!(report.addresses(), vec![Address::new(0x10), Address::new(0x20)]);
        assert_eq!(report.len(), 2);
    }
}
