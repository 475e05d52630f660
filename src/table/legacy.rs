//! Best-effort reader for the legacy binary table format
//!
//! The binary layout is not decoded. Runs of eight hex digits are taken as
//! addresses, which is enough to recover the address list of most old
//! tables and nothing else.

use super::model::{CheatEntry, EntryAddress, VariableType};
use crate::core::types::Address;

pub const MAX_LEGACY_ENTRIES: usize = 50;
pub const LEGACY_TITLE: &str = "Binary Cheat Table";

const ADDRESS_DIGITS: usize = 8;

/// Non-overlapping eight-digit hex runs, left to right
pub fn address_runs(data: &[u8], limit: usize) -> Vec<Address> {
    let mut found = Vec::new();
    let mut i = 0;
    while i + ADDRESS_DIGITS <= data.len() && found.len() < limit {
        let window = &data[i..i + ADDRESS_DIGITS];
        if window.iter().all(u8::is_ascii_hexdigit) {
            // ASCII hex digits are valid UTF-8 and at most 32 bits
            let value = std::str::from_utf8(window)
                .ok()
                .and_then(|text| usize::from_str_radix(text, 16).ok());
            if let Some(value) = value {
                found.push(Address::new(value));
            }
            i += ADDRESS_DIGITS;
        } else {
            i += 1;
        }
    }
    found
}

pub(crate) fn entries(data: &[u8]) -> Vec<CheatEntry> {
    address_runs(data, MAX_LEGACY_ENTRIES)
        .into_iter()
        .enumerate()
        .map(|(i, address)| CheatEntry {
            id: i.to_string(),
            ..CheatEntry::new(
                "Address from binary table",
                EntryAddress::Absolute(address),
                VariableType::FourBytes,
            )
        })
        .collect()
}
