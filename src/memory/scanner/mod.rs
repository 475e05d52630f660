//! Value, range and wildcard-pattern scanning
//!
//! Scans walk committed regions in bounded chunks. Consecutive chunks overlap
//! by `window - 1` bytes and a hit is only accepted in the chunk where it
//! starts before the next chunk's origin, so matches straddling a chunk
//! boundary are found exactly once. Unreadable chunks are skipped.

mod matcher;
pub mod pattern;

pub use pattern::{Pattern, PatternMatcher};

use crate::config::{Config, ScannerConfig};
use crate::core::types::{
    Address, CancellationToken, MemoryError, MemoryResult, MemoryValue, Outcome, ScanReport,
    ScanResult, StringEncoding,
};
use crate::memory::reader::{MemoryReader, ReadLimits};
use crate::memory::regions::{MemoryRegion, RegionFilter};
use crate::memory::source::MemorySource;
use matcher::Matcher;
use rayon::prelude::*;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Options for a scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Maximum results to return; further hits set `truncated`
    pub max_results: usize,
    /// Bytes read per chunk
    pub chunk_size: usize,
    /// Scan regions on a worker pool
    pub parallel: bool,
    pub max_threads: usize,
    /// Start address for scanning
    pub start_address: Option<Address>,
    /// End address for scanning (exclusive)
    pub end_address: Option<Address>,
    /// Scan only writable regions
    pub writable_only: bool,
    /// Scan only executable regions
    pub executable_only: bool,
    /// Exact scans only report hits aligned to the value's width
    pub aligned: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions::from(&Config::default().scanner)
    }
}

impl From<&ScannerConfig> for ScanOptions {
    fn from(config: &ScannerConfig) -> Self {
        ScanOptions {
            max_results: config.max_results,
            chunk_size: config.chunk_size,
            parallel: config.parallel,
            max_threads: config.max_threads,
            start_address: None,
            end_address: None,
            writable_only: false,
            executable_only: false,
            aligned: false,
        }
    }
}

impl ScanOptions {
    pub fn with_range(mut self, start: Address, end: Address) -> Self {
        self.start_address = Some(start);
        self.end_address = Some(end);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

#[derive(Debug, Default)]
struct RegionScan {
    hits: Vec<ScanResult>,
    failed_chunks: usize,
    cancelled: bool,
}

/// Memory scanner over any [`MemorySource`]
pub struct Scanner<'a, S: MemorySource + ?Sized> {
    reader: MemoryReader<'a, S>,
    source: &'a S,
    options: ScanOptions,
    cancel: CancellationToken,
}

impl<'a, S: MemorySource + ?Sized> Scanner<'a, S> {
    pub fn new(source: &'a S, limits: ReadLimits, options: ScanOptions) -> Self {
        Scanner {
            reader: MemoryReader::new(source, limits),
            source,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Checks `token` between regions and chunks
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Finds every occurrence of `value`. Strings are searched as UTF-8 and
    /// UTF-16LE independently.
    pub fn scan_value(&self, value: &MemoryValue) -> MemoryResult<Outcome<ScanReport>> {
        let encodings: Vec<(Pattern, Option<StringEncoding>)> = value
            .encodings()
            .iter()
            .filter(|(bytes, _)| !bytes.is_empty())
            .map(|(bytes, encoding)| (Pattern::exact(bytes), *encoding))
            .collect();
        if encodings.is_empty() {
            return Err(MemoryError::InvalidArgument(
                "cannot scan for an empty value".to_string(),
            ));
        }
        let align = match value.value_type().size() {
            Some(width) if self.options.aligned => width,
            _ => 1,
        };
        let matcher = Matcher::exact(value, &encodings, align);
        self.run(&matcher)
    }

    /// Finds every aligned slot whose decoded value lies in `[min, max]`
    pub fn scan_range(&self, min: &MemoryValue, max: &MemoryValue) -> MemoryResult<Outcome<ScanReport>> {
        let value_type = min.value_type();
        if value_type != max.value_type() {
            return Err(MemoryError::InvalidArgument(format!(
                "range bounds have different types: {} and {}",
                value_type,
                max.value_type()
            )));
        }
        if !value_type.is_numeric() {
            return Err(MemoryError::InvalidValueType(format!(
                "range scans need a numeric type, got {}",
                value_type
            )));
        }
        if let Some(Ordering::Greater) | None = min.numeric_cmp(max) {
            return Err(MemoryError::InvalidArgument(format!(
                "range minimum {} exceeds maximum {}",
                min, max
            )));
        }
        let matcher = Matcher::range(min, max)?;
        self.run(&matcher)
    }

    /// Finds every match of a wildcard pattern such as `"48 8B ?? 05"`.
    /// The pattern is validated before any memory is read.
    pub fn scan_pattern(&self, pattern: &str) -> MemoryResult<Outcome<ScanReport>> {
        let pattern = Pattern::parse(pattern)?;
        self.scan_compiled(&pattern)
    }

    pub fn scan_compiled(&self, pattern: &Pattern) -> MemoryResult<Outcome<ScanReport>> {
        let matcher = Matcher::pattern(pattern);
        self.run(&matcher)
    }

    fn chunk_size(&self, window: usize) -> MemoryResult<usize> {
        let max_read = self.reader.limits().max_read_size;
        if window > max_read {
            return Err(MemoryError::InvalidArgument(format!(
                "search window of {} bytes exceeds the read limit of {}",
                window, max_read
            )));
        }
        Ok(self.options.chunk_size.min(max_read).max(window))
    }

    /// Regions to walk, clipped to the configured address window. `min_window`
    /// is the shortest encoding a hit can have.
    fn target_regions(&self, min_window: usize) -> MemoryResult<Vec<MemoryRegion>> {
        let mut filter = RegionFilter::new().readable().with_min_size(min_window);
        if self.options.writable_only {
            filter = filter.writable();
        }
        if self.options.executable_only {
            filter = filter.executable();
        }
        let start = self.options.start_address.unwrap_or(Address::null());
        let end = self.options.end_address.unwrap_or(Address::new(usize::MAX));
        filter = filter.with_address_range(start, end);

        let mut regions: Vec<MemoryRegion> = filter
            .apply(&self.source.regions()?)
            .into_iter()
            .filter_map(|mut region| {
                let lo = region.base_address.max(start);
                let hi = region.end_address().min(end);
                let size = hi.offset_from(lo)?;
                region.base_address = lo;
                region.size = size;
                (size >= min_window).then_some(region)
            })
            .collect();
        regions.sort_by_key(|r| r.base_address);
        Ok(regions)
    }

    fn run(&self, matcher: &Matcher<'_>) -> MemoryResult<Outcome<ScanReport>> {
        let window = matcher.window();
        let chunk = self.chunk_size(window)?;
        let regions = self.target_regions(matcher.min_window())?;
        let max_results = self.options.max_results;
        // One extra hit per region is enough to detect truncation
        let cap = max_results.saturating_add(1);

        let scans: Vec<RegionScan> = if self.options.parallel && regions.len() > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.max_threads)
                .build();
            match pool {
                Ok(pool) => pool.install(|| {
                    regions
                        .par_iter()
                        .map(|region| self.scan_region(region, matcher, chunk, cap))
                        .collect()
                }),
                Err(e) => {
                    warn!("worker pool unavailable, scanning sequentially: {}", e);
                    self.scan_sequential(&regions, matcher, chunk, cap)
                }
            }
        } else {
            self.scan_sequential(&regions, matcher, chunk, cap)
        };

        if self.cancel.is_cancelled() || scans.iter().any(|s| s.cancelled) {
            debug!("scan cancelled");
            return Ok(Outcome::Cancelled);
        }

        let mut report = ScanReport::default();
        for scan in scans {
            report.regions_scanned += 1;
            if scan.failed_chunks > 0 {
                report.regions_skipped += 1;
            }
            report.results.extend(scan.hits);
            if report.results.len() > max_results {
                break;
            }
        }
        if report.results.len() > max_results {
            report.results.truncate(max_results);
            report.truncated = true;
        }

        debug!(
            "scan finished: {} hits in {} regions ({} skipped, truncated: {})",
            report.results.len(),
            report.regions_scanned,
            report.regions_skipped,
            report.truncated
        );
        Ok(Outcome::Completed(report))
    }

    fn scan_sequential(
        &self,
        regions: &[MemoryRegion],
        matcher: &Matcher<'_>,
        chunk: usize,
        cap: usize,
    ) -> Vec<RegionScan> {
        let mut scans = Vec::with_capacity(regions.len());
        let mut total = 0;
        for region in regions {
            let scan = self.scan_region(region, matcher, chunk, cap);
            total += scan.hits.len();
            let stop = scan.cancelled || total >= cap;
            scans.push(scan);
            if stop {
                break;
            }
        }
        scans
    }

    fn scan_region(
        &self,
        region: &MemoryRegion,
        matcher: &Matcher<'_>,
        chunk: usize,
        cap: usize,
    ) -> RegionScan {
        let window = matcher.window();
        let min_window = matcher.min_window();
        let step = chunk - window + 1;
        let region_ref = region.region_ref();
        let mut scan = RegionScan::default();

        let mut offset = 0;
        while offset + min_window <= region.size {
            if self.cancel.is_cancelled() {
                scan.cancelled = true;
                break;
            }
            let len = chunk.min(region.size - offset);
            let last = offset + len >= region.size;
            let accept = if last { len } else { step };
            let base = Address::new(region.base_address.as_usize() + offset);

            match self.reader.read_bytes(base, len) {
                Ok(bytes) => {
                    let room = cap - scan.hits.len();
                    matcher.collect(&bytes, base, accept, room, region_ref, &mut scan.hits);
                }
                Err(e) => {
                    debug!("skipping {} bytes at {}: {}", len, base, e);
                    scan.failed_chunks += 1;
                }
            }
            if scan.hits.len() >= cap || last {
                break;
            }
            offset += step;
        }
        scan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PointerWidth, ValueType};
    use crate::memory::regions::Protection;
    use crate::memory::source::MemoryImage;

    fn example_image() -> MemoryImage {
        let mut data = vec![0u8; 4096];
        data[0..4].copy_from_slice(&1000i32.to_le_bytes());
        data[4..8].copy_from_slice(&2000i32.to_le_bytes());
        MemoryImage::from_bytes(Address::new(0x10000), data, PointerWidth::Eight)
    }

    fn scanner(image: &MemoryImage, options: ScanOptions) -> Scanner<'_, MemoryImage> {
        Scanner::new(image, ReadLimits::default(), options)
    }

    fn completed(outcome: MemoryResult<Outcome<ScanReport>>) -> ScanReport {
        outcome.unwrap().completed().unwrap()
    }

    #[test]
    fn test_exact_and_range_example() {
        let image = example_image();
        let scanner = scanner(&image, ScanOptions::default());

        let exact = completed(scanner.scan_value(&MemoryValue::I32(1000)));
        assert_eq!(exact.addresses(), vec![Address::new(0x10000)]);

        let low = completed(scanner.scan_range(&MemoryValue::I32(999), &MemoryValue::I32(1001)));
        assert_eq!(low.addresses(), vec![Address::new(0x10000)]);
        assert_eq!(low.results[0].value, MemoryValue::I32(1000));

        let high = completed(scanner.scan_range(&MemoryValue::I32(1999), &MemoryValue::I32(2001)));
        assert_eq!(high.addresses(), vec![Address::new(0x10004)]);
    }

    #[test]
    fn test_chunk_boundary_hits_found_once() {
        let mut data = vec![0u8; 64];
        data[14..18].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        data[16..20].copy_from_slice(&[0xBE, 0xEF, 0xDE, 0xAD]);
        let image = MemoryImage::from_bytes(Address::new(0x10000), data, PointerWidth::Eight);
        let mut options = ScanOptions::default();
        options.chunk_size = 16;

        let report = completed(scanner(&image, options).scan_pattern("DE AD"));
        assert_eq!(
            report.addresses(),
            vec![Address::new(0x1000E), Address::new(0x10012)]
        );
    }

    #[test]
    fn test_string_encodings() {
        let mut data = vec![0u8; 256];
        data[0x10..0x13].copy_from_slice(b"abc");
        data[0x40..0x46].copy_from_slice(&[b'a', 0, b'b', 0, b'c', 0]);
        let image = MemoryImage::from_bytes(Address::new(0x10000), data, PointerWidth::Eight);

        let report = completed(
            scanner(&image, ScanOptions::default()).scan_value(&MemoryValue::String("abc".into())),
        );
        assert_eq!(report.addresses(), vec![Address::new(0x10010), Address::new(0x10040)]);
        assert_eq!(report.results[0].width, 3);
        assert_eq!(report.results[1].width, 6);
        assert_eq!(report.results[0].encoding, Some(StringEncoding::Utf8));
        assert_eq!(report.results[1].encoding, Some(StringEncoding::Utf16));
    }

    #[test]
    fn test_region_smaller_than_wide_form_is_scanned() {
        // Holds the UTF-8 form of "abcd" but not its 8-byte UTF-16 form
        let image = MemoryImage::new(PointerWidth::Eight).with_region(
            Address::new(0x20000),
            b"abcdef".to_vec(),
            Protection::read_write(),
        );

        let report = completed(
            scanner(&image, ScanOptions::default()).scan_value(&MemoryValue::String("abcd".into())),
        );
        assert_eq!(report.addresses(), vec![Address::new(0x20000)]);
        assert_eq!(report.results[0].encoding, Some(StringEncoding::Utf8));
        assert_eq!(report.regions_scanned, 1);
    }

    #[test]
    fn test_truncation() {
        let image = MemoryImage::from_bytes(Address::new(0x10000), vec![0x90; 1024], PointerWidth::Eight);
        let options = ScanOptions::default().with_max_results(10);

        let report = completed(scanner(&image, options.clone()).scan_pattern("90 90"));
        assert_eq!(report.len(), 10);
        assert!(report.truncated);

        let report = completed(scanner(&image, options.sequential()).scan_pattern("90 90"));
        assert_eq!(report.len(), 10);
        assert!(report.truncated);
    }

    #[test]
    fn test_unreadable_regions_skipped() {
        let image = MemoryImage::new(PointerWidth::Eight)
            .with_region(Address::new(0x10000), vec![0x41; 16], Protection::no_access())
            .with_region(Address::new(0x20000), vec![0x41; 16], Protection::read_only());
        let report = completed(scanner(&image, ScanOptions::default()).scan_pattern("41 41 41 41"));
        assert!(report.addresses().iter().all(|a| *a >= Address::new(0x20000)));
        assert_eq!(report.len(), 13);
    }

    #[test]
    fn test_address_window() {
        let image = MemoryImage::from_bytes(Address::new(0x10000), vec![0x7F; 64], PointerWidth::Eight);
        let options = ScanOptions::default().with_range(Address::new(0x10010), Address::new(0x10014));
        let report = completed(scanner(&image, options).scan_value(&MemoryValue::U8(0x7F)));
        assert_eq!(report.len(), 4);
        assert_eq!(report.results[0].address, Address::new(0x10010));
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let image = example_image();
        let scanner = scanner(&image, ScanOptions::default());
        assert!(scanner.scan_pattern("48 XZ").is_err());
        assert!(scanner
            .scan_range(&MemoryValue::I32(5), &MemoryValue::I32(1))
            .is_err());
        assert!(scanner
            .scan_range(&MemoryValue::I32(1), &MemoryValue::U32(5))
            .is_err());
        assert!(scanner
            .scan_range(&MemoryValue::Bytes(vec![1]), &MemoryValue::Bytes(vec![2]))
            .is_err());
    }

    #[test]
    fn test_cancelled_scan() {
        let image = example_image();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = scanner(&image, ScanOptions::default())
            .with_cancellation(token)
            .scan_value(&MemoryValue::I32(1000))
            .unwrap();
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn test_aligned_exact_scan() {
        let mut data = vec![0u8; 32];
        data[2..6].copy_from_slice(&7u32.to_le_bytes());
        data[8..12].copy_from_slice(&7u32.to_le_bytes());
        let image = MemoryImage::from_bytes(Address::new(0x10000), data, PointerWidth::Eight);

        let mut options = ScanOptions::default();
        let loose = completed(scanner(&image, options.clone()).scan_value(&MemoryValue::U32(7)));
        assert_eq!(loose.len(), 2);

        options.aligned = true;
        let strict = completed(scanner(&image, options).scan_value(&MemoryValue::U32(7)));
        assert_eq!(strict.addresses(), vec![Address::new(0x10008)]);
        assert_eq!(strict.results[0].value_type, ValueType::U32);
    }
}
