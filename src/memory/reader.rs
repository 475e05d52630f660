//! Bounded, typed reads over a [`MemorySource`]
//!
//! Every read is validated before it reaches the source: the size must be
//! non-zero and no larger than the configured ceiling, and the address must
//! lie above the null-page threshold.

use crate::config::{Config, MemoryConfig};
use crate::core::types::{
    Address, MemoryError, MemoryResult, MemoryValue, PointerWidth, StringEncoding, ValueType,
};
use crate::memory::regions::MemoryRegion;
use crate::memory::source::MemorySource;
use tracing::trace;

/// Default number of bytes read for strings and byte arrays of unspecified length
pub const DEFAULT_STRING_LENGTH: usize = 256;

/// Limits applied to every read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimits {
    pub max_read_size: usize,
    pub min_valid_address: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        ReadLimits::from(&Config::default().memory)
    }
}

impl From<&MemoryConfig> for ReadLimits {
    fn from(config: &MemoryConfig) -> Self {
        ReadLimits {
            max_read_size: config.max_read_size,
            min_valid_address: config.min_valid_address,
        }
    }
}

impl ReadLimits {
    /// Rejects reads that must never reach the source
    pub fn check(&self, address: Address, size: usize) -> MemoryResult<()> {
        if size == 0 || size > self.max_read_size {
            return Err(MemoryError::invalid_size(size, self.max_read_size));
        }
        if address.as_usize() < self.min_valid_address {
            return Err(MemoryError::InvalidAddress(format!(
                "{} is below the minimum valid address 0x{:X}",
                address, self.min_valid_address
            )));
        }
        if address.checked_add(size).is_none() {
            return Err(MemoryError::InvalidAddress(format!(
                "{} + {} bytes overflows the address space",
                address, size
            )));
        }
        Ok(())
    }
}

/// Reader enforcing [`ReadLimits`] on top of any source
pub struct MemoryReader<'a, S: MemorySource + ?Sized> {
    source: &'a S,
    limits: ReadLimits,
}

impl<'a, S: MemorySource + ?Sized> MemoryReader<'a, S> {
    pub fn new(source: &'a S, limits: ReadLimits) -> Self {
        MemoryReader { source, limits }
    }

    pub fn limits(&self) -> ReadLimits {
        self.limits
    }

    pub fn pointer_width(&self) -> PointerWidth {
        self.source.pointer_width()
    }

    /// Reads exactly `size` bytes
    pub fn read_bytes(&self, address: Address, size: usize) -> MemoryResult<Vec<u8>> {
        self.limits.check(address, size)?;
        trace!("read {} bytes at {}", size, address);
        self.source.read_bytes(address, size)
    }

    /// Reads a fixed-width value
    pub fn read_value(&self, address: Address, value_type: ValueType) -> MemoryResult<MemoryValue> {
        match value_type.size() {
            Some(size) => self.read_value_sized(address, value_type, size),
            None => self.read_value_sized(address, value_type, DEFAULT_STRING_LENGTH),
        }
    }

    /// Reads a value; `len` applies to strings and byte arrays
    pub fn read_value_sized(
        &self,
        address: Address,
        value_type: ValueType,
        len: usize,
    ) -> MemoryResult<MemoryValue> {
        match value_type {
            ValueType::String => Ok(MemoryValue::String(self.read_string(
                address,
                len,
                StringEncoding::Utf8,
            )?)),
            ValueType::Bytes => Ok(MemoryValue::Bytes(self.read_bytes(address, len)?)),
            fixed => {
                let size = fixed.size().unwrap_or(len);
                let bytes = self.read_bytes(address, size)?;
                MemoryValue::from_bytes(&bytes, fixed)
                    .ok_or_else(|| MemoryError::read_failed(address, "short read"))
            }
        }
    }

    /// Reads a pointer-width value
    pub fn read_pointer(&self, address: Address) -> MemoryResult<Address> {
        let width = self.pointer_width();
        let bytes = self.read_bytes(address, width.bytes())?;
        width
            .decode(&bytes)
            .map(Address::new)
            .ok_or_else(|| MemoryError::read_failed(address, "pointer does not fit the host"))
    }

    /// Reads a NUL-terminated string of at most `max_len` bytes.
    ///
    /// The read is clamped to the end of the containing region so strings near
    /// a region boundary still decode.
    pub fn read_string(
        &self,
        address: Address,
        max_len: usize,
        encoding: StringEncoding,
    ) -> MemoryResult<String> {
        let available = match self.region_at(address)? {
            Some(region) => region
                .end_address()
                .offset_from(address)
                .unwrap_or(0)
                .min(max_len),
            None => max_len,
        };
        let bytes = self.read_bytes(address, available)?;

        Ok(encoding.decode(&bytes))
    }

    /// Region containing `address`, if any
    pub fn region_at(&self, address: Address) -> MemoryResult<Option<MemoryRegion>> {
        Ok(self
            .source
            .regions()?
            .into_iter()
            .find(|region| region.contains(address)))
    }

    /// Whether `[address, address + size)` is a valid read inside one readable region
    pub fn is_readable(&self, address: Address, size: usize) -> bool {
        if self.limits.check(address, size).is_err() {
            return false;
        }
        match self.region_at(address) {
            Ok(Some(region)) => region.is_readable() && region.contains_range(address, size),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::regions::Protection;
    use crate::memory::source::MemoryImage;

    fn image() -> MemoryImage {
        let mut data = vec![0u8; 0x1000];
        data[0..4].copy_from_slice(&1000i32.to_le_bytes());
        data[8..16].copy_from_slice(&0x2010u64.to_le_bytes());
        data[0x20..0x26].copy_from_slice(b"hello\0");
        data[0x40..0x4A].copy_from_slice(&[b'w', 0, b'i', 0, b'd', 0, b'e', 0, 0, 0]);
        data[0xFFC..].copy_from_slice(b"tail");
        MemoryImage::new(PointerWidth::Eight).with_region(
            Address::new(0x2000),
            data,
            Protection::read_write(),
        )
    }

    #[test]
    fn test_limits() {
        let image = image();
        let reader = MemoryReader::new(&image, ReadLimits::default());

        let err = reader.read_bytes(Address::new(0x2000), 0).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidSize { .. }));

        let err = reader.read_bytes(Address::new(0x2000), 11 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidSize { .. }));

        let err = reader.read_bytes(Address::new(0x10), 4).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidAddress(_)));
    }

    #[test]
    fn test_typed_reads() {
        let image = image();
        let reader = MemoryReader::new(&image, ReadLimits::default());

        let value = reader.read_value(Address::new(0x2000), ValueType::I32).unwrap();
        assert_eq!(value, MemoryValue::I32(1000));
        assert_eq!(reader.read_pointer(Address::new(0x2008)).unwrap(), Address::new(0x2010));
    }

    #[test]
    fn test_strings() {
        let image = image();
        let reader = MemoryReader::new(&image, ReadLimits::default());

        let text = reader
            .read_string(Address::new(0x2020), 64, StringEncoding::Utf8)
            .unwrap();
        assert_eq!(text, "hello");

        let wide = reader
            .read_string(Address::new(0x2040), 64, StringEncoding::Utf16)
            .unwrap();
        assert_eq!(wide, "wide");

        // Clamped at the end of the region
        let tail = reader
            .read_string(Address::new(0x2FFC), 256, StringEncoding::Utf8)
            .unwrap();
        assert_eq!(tail, "tail");
    }

    #[test]
    fn test_is_readable() {
        let image = image();
        let reader = MemoryReader::new(&image, ReadLimits::default());
        assert!(reader.is_readable(Address::new(0x2000), 0x1000));
        assert!(!reader.is_readable(Address::new(0x2000), 0x1001));
        assert!(!reader.is_readable(Address::new(0x0), 4));
        assert!(reader.region_at(Address::new(0x5000)).unwrap().is_none());
    }
}
