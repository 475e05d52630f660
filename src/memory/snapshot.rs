//! Point-in-time captures and byte-level diffs
//!
//! A snapshot is a direct, uncached read. Diffs compare two captures byte by
//! byte and fold contiguous differing bytes into ranges.

use crate::core::types::{
    Address, CancellationToken, MemoryError, MemoryResult, MemoryValue, Outcome, ScanResult,
    StringEncoding, ValueType,
};
use crate::memory::reader::{MemoryReader, ReadLimits};
use crate::memory::source::MemorySource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Bytes captured from one address range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub address: Address,
    pub data: Vec<u8>,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One differing byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteChange {
    pub offset: usize,
    pub address: Address,
    pub old: u8,
    pub new: u8,
}

/// A maximal run of differing bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedRange {
    pub offset: usize,
    pub address: Address,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub total_changed: usize,
    /// Changed bytes as a percentage of the compared length
    pub percentage: f64,
    pub largest_run: usize,
    pub range_count: usize,
    pub compared_len: usize,
    /// `(previous, current)` lengths when they differ
    pub length_mismatch: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub address: Address,
    pub changes: Vec<ByteChange>,
    pub ranges: Vec<ChangedRange>,
    pub summary: DiffSummary,
}

impl SnapshotDiff {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn changed_offsets(&self) -> Vec<usize> {
        self.changes.iter().map(|c| c.offset).collect()
    }
}

/// Compares two captures of the range starting at `address`.
///
/// When the lengths differ the mismatch is recorded and only the common
/// prefix is compared.
pub fn diff_bytes(address: Address, previous: &[u8], current: &[u8]) -> SnapshotDiff {
    let compared_len = previous.len().min(current.len());
    let length_mismatch =
        (previous.len() != current.len()).then_some((previous.len(), current.len()));
    if let Some((old, new)) = length_mismatch {
        debug!("snapshot length mismatch at {}: {} vs {} bytes", address, old, new);
    }

    let at = |offset: usize| Address::new(address.as_usize().wrapping_add(offset));
    let mut changes = Vec::new();
    let mut ranges: Vec<ChangedRange> = Vec::new();
    let mut run_start: Option<usize> = None;

    for (offset, (&old, &new)) in previous.iter().zip(current).enumerate() {
        if old != new {
            changes.push(ByteChange {
                offset,
                address: at(offset),
                old,
                new,
            });
            run_start.get_or_insert(offset);
        } else if let Some(start) = run_start.take() {
            ranges.push(ChangedRange {
                offset: start,
                address: at(start),
                length: offset - start,
            });
        }
    }
    if let Some(start) = run_start {
        ranges.push(ChangedRange {
            offset: start,
            address: at(start),
            length: compared_len - start,
        });
    }

    let total_changed = changes.len();
    let percentage = if compared_len == 0 {
        0.0
    } else {
        total_changed as f64 * 100.0 / compared_len as f64
    };
    SnapshotDiff {
        address,
        summary: DiffSummary {
            total_changed,
            percentage,
            largest_run: ranges.iter().map(|r| r.length).max().unwrap_or(0),
            range_count: ranges.len(),
            compared_len,
            length_mismatch,
        },
        changes,
        ranges,
    }
}

/// Condition applied to prior scan results by [`SnapshotEngine::next_scan`]
#[derive(Debug, Clone, PartialEq)]
pub enum ScanFilter {
    /// Current value equals the given value
    Exact(MemoryValue),
    Changed,
    Unchanged,
    Increased,
    Decreased,
}

impl ScanFilter {
    fn keep(&self, previous: &MemoryValue, current: &MemoryValue) -> bool {
        match self {
            ScanFilter::Exact(target) => match current.numeric_cmp(target) {
                Some(ordering) => ordering == Ordering::Equal,
                None => current == target,
            },
            ScanFilter::Changed => previous.to_bytes() != current.to_bytes(),
            ScanFilter::Unchanged => previous.to_bytes() == current.to_bytes(),
            ScanFilter::Increased => current.numeric_cmp(previous) == Some(Ordering::Greater),
            ScanFilter::Decreased => current.numeric_cmp(previous) == Some(Ordering::Less),
        }
    }
}

/// Snapshots, diffs and progressive scans over any [`MemorySource`]
pub struct SnapshotEngine<'a, S: MemorySource + ?Sized> {
    reader: MemoryReader<'a, S>,
    cancel: CancellationToken,
}

impl<'a, S: MemorySource + ?Sized> SnapshotEngine<'a, S> {
    pub fn new(source: &'a S, limits: ReadLimits) -> Self {
        SnapshotEngine {
            reader: MemoryReader::new(source, limits),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn snapshot(&self, address: Address, size: usize) -> MemoryResult<Snapshot> {
        let data = self.reader.read_bytes(address, size)?;
        Ok(Snapshot {
            address,
            data,
            taken_at: Utc::now(),
        })
    }

    /// Reads the range again and diffs it against `previous`
    pub fn diff(&self, address: Address, size: usize, previous: &[u8]) -> MemoryResult<SnapshotDiff> {
        let current = self.reader.read_bytes(address, size)?;
        Ok(diff_bytes(address, previous, &current))
    }

    pub fn diff_snapshot(&self, previous: &Snapshot) -> MemoryResult<SnapshotDiff> {
        self.diff(previous.address, previous.len(), &previous.data)
    }

    /// Re-reads every prior result at its stored address and keeps those
    /// passing `filter`. Kept results carry their old value in
    /// `previous_value`; results that can no longer be read are dropped.
    pub fn next_scan(
        &self,
        results: &[ScanResult],
        filter: &ScanFilter,
    ) -> MemoryResult<Outcome<Vec<ScanResult>>> {
        let mut kept = Vec::new();
        let mut unreadable = 0usize;

        for result in results {
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            let current = match self.reread(result) {
                Ok(value) => value,
                Err(e) => {
                    debug!("dropping {} from next scan: {}", result.address, e);
                    unreadable += 1;
                    continue;
                }
            };
            if filter.keep(&result.value, &current) {
                kept.push(result.clone().advance(current));
            }
        }

        debug!(
            "next scan kept {} of {} results ({} unreadable)",
            kept.len(),
            results.len(),
            unreadable
        );
        Ok(Outcome::Completed(kept))
    }

    fn reread(&self, result: &ScanResult) -> MemoryResult<MemoryValue> {
        let bytes = self.reader.read_bytes(result.address, result.width)?;
        let value = match result.value_type {
            ValueType::Bytes => MemoryValue::Bytes(bytes),
            ValueType::String => {
                let encoding = result.encoding.unwrap_or(StringEncoding::Utf8);
                MemoryValue::String(encoding.decode(&bytes))
            }
            fixed => MemoryValue::from_bytes(&bytes, fixed)
                .ok_or_else(|| MemoryError::read_failed(result.address, "short read"))?,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PointerWidth;
    use crate::memory::source::MemoryImage;
    use pretty_assertions::assert_eq;

    const BASE: usize = 0x10000;

    #[test]
    fn test_diff_ranges_and_summary() {
        let old = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let new = [0u8, 9, 9, 3, 4, 9, 6, 9];
        let diff = diff_bytes(Address::new(BASE), &old, &new);

        assert_eq!(diff.changed_offsets(), vec![1, 2, 5, 7]);
        let ranges: Vec<(usize, usize)> = diff.ranges.iter().map(|r| (r.offset, r.length)).collect();
        assert_eq!(ranges, vec![(1, 2), (5, 1), (7, 1)]);
        assert_eq!(diff.summary.total_changed, 4);
        assert_eq!(diff.summary.largest_run, 2);
        assert_eq!(diff.summary.range_count, 3);
        assert!((diff.summary.percentage - 50.0).abs() < f64::EPSILON);
        assert_eq!(diff.ranges[0].address, Address::new(BASE + 1));
    }

    #[test]
    fn test_diff_symmetry() {
        let a = [1u8, 2, 3, 4, 5, 6];
        let b = [1u8, 0, 3, 0, 0, 6];
        let forward = diff_bytes(Address::new(BASE), &a, &b);
        let backward = diff_bytes(Address::new(BASE), &b, &a);
        assert_eq!(forward.changed_offsets(), backward.changed_offsets());
        assert_eq!(forward.changes[0].old, backward.changes[0].new);
        assert_eq!(forward.summary, backward.summary);
    }

    #[test]
    fn test_length_mismatch() {
        let diff = diff_bytes(Address::new(BASE), &[1, 2, 3, 4], &[1, 0]);
        assert_eq!(diff.summary.length_mismatch, Some((4, 2)));
        assert_eq!(diff.summary.compared_len, 2);
        assert_eq!(diff.changed_offsets(), vec![1]);
    }

    #[test]
    fn test_empty_diff() {
        let diff = diff_bytes(Address::new(BASE), &[], &[]);
        assert!(!diff.has_changes());
        assert_eq!(diff.summary.percentage, 0.0);
    }

    #[test]
    fn test_snapshot_then_diff() {
        let mut image = MemoryImage::from_bytes(Address::new(BASE), vec![0; 64], PointerWidth::Eight);
        let snapshot = {
            let engine = SnapshotEngine::new(&image, ReadLimits::default());
            engine.snapshot(Address::new(BASE), 64).unwrap()
        };
        image.patch(Address::new(BASE + 10), &[1, 2, 3]).unwrap();

        let engine = SnapshotEngine::new(&image, ReadLimits::default());
        let diff = engine.diff_snapshot(&snapshot).unwrap();
        assert_eq!(diff.summary.total_changed, 3);
        assert_eq!(diff.ranges.len(), 1);
        assert_eq!(diff.ranges[0].offset, 10);
    }

    #[test]
    fn test_next_scan_filters() {
        let mut image = MemoryImage::from_bytes(Address::new(BASE), vec![0; 64], PointerWidth::Eight);
        image.patch(Address::new(BASE), &100i32.to_le_bytes()).unwrap();
        image.patch(Address::new(BASE + 4), &100i32.to_le_bytes()).unwrap();
        image.patch(Address::new(BASE + 8), &100i32.to_le_bytes()).unwrap();
        let prior: Vec<ScanResult> = (0..3)
            .map(|i| ScanResult::new(Address::new(BASE + i * 4), MemoryValue::I32(100)))
            .collect();

        image.patch(Address::new(BASE), &150i32.to_le_bytes()).unwrap();
        image.patch(Address::new(BASE + 8), &50i32.to_le_bytes()).unwrap();
        let engine = SnapshotEngine::new(&image, ReadLimits::default());
        let run = |filter: ScanFilter| {
            engine
                .next_scan(&prior, &filter)
                .unwrap()
                .completed()
                .unwrap()
                .iter()
                .map(|r| r.address.as_usize() - BASE)
                .collect::<Vec<_>>()
        };

        assert_eq!(run(ScanFilter::Exact(MemoryValue::I32(150))), vec![0]);
        assert_eq!(run(ScanFilter::Changed), vec![0, 8]);
        assert_eq!(run(ScanFilter::Unchanged), vec![4]);
        assert_eq!(run(ScanFilter::Increased), vec![0]);
        assert_eq!(run(ScanFilter::Decreased), vec![8]);

        let kept = engine
            .next_scan(&prior, &ScanFilter::Increased)
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(kept[0].value, MemoryValue::I32(150));
        assert_eq!(kept[0].previous_value, Some(MemoryValue::I32(100)));
    }

    #[test]
    fn test_next_scan_drops_unreadable() {
        let image = MemoryImage::from_bytes(Address::new(BASE), vec![0; 16], PointerWidth::Eight);
        let prior = vec![ScanResult::new(Address::new(0x90000), MemoryValue::U32(0))];
        let engine = SnapshotEngine::new(&image, ReadLimits::default());
        let kept = engine
            .next_scan(&prior, &ScanFilter::Unchanged)
            .unwrap()
            .completed()
            .unwrap();
        assert!(kept.is_empty());
    }

    #[test]
    fn test_next_scan_keeps_wide_string_encoding() {
        use crate::memory::scanner::{ScanOptions, Scanner};

        // UTF-8 and UTF-16 forms of Cyrillic text have the same byte length
        let text = "Привет";
        let mut image = MemoryImage::from_bytes(Address::new(BASE), vec![0; 0x100], PointerWidth::Eight);
        image
            .patch(Address::new(BASE + 0x40), &StringEncoding::Utf16.encode(text))
            .unwrap();

        let prior = Scanner::new(&image, ReadLimits::default(), ScanOptions::default())
            .scan_value(&MemoryValue::String(text.into()))
            .unwrap()
            .completed()
            .unwrap()
            .results;
        assert_eq!(prior.len(), 1);
        assert_eq!(prior[0].encoding, Some(StringEncoding::Utf16));

        let engine = SnapshotEngine::new(&image, ReadLimits::default());
        let unchanged = engine
            .next_scan(&prior, &ScanFilter::Unchanged)
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(unchanged.len(), 1);
        assert_eq!(unchanged[0].value, MemoryValue::String(text.into()));

        let changed = engine.next_scan(&prior, &ScanFilter::Changed).unwrap().completed().unwrap();
        assert!(changed.is_empty());

        let exact = engine
            .next_scan(&prior, &ScanFilter::Exact(MemoryValue::String(text.into())))
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(exact.len(), 1);
    }
}
