//! PE export-table reader
//!
//! Only the pieces needed to list exports are decoded: DOS and NT headers,
//! the section table and the export directory. Both the on-disk layout
//! (RVAs translated through section headers) and the loaded layout (RVA ==
//! offset from the image base) are supported.

use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::memory::reader::MemoryReader;
use crate::memory::source::MemorySource;
use byteorder::{ByteOrder, LittleEndian};

const DOS_MAGIC: &[u8; 2] = b"MZ";
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;
const SECTION_HEADER_SIZE: usize = 40;
const EXPORT_DIRECTORY_SIZE: usize = 40;
/// Bytes read from a mapped image to reach the section table
pub const MAPPED_HEADER_SIZE: usize = 0x1000;
/// Upper bound on exported names, against corrupt counts
const MAX_EXPORTS: usize = 65_536;

/// Where RVAs point in the buffer being parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Raw file bytes
    File,
    /// Image as mapped by the loader
    Mapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub raw_offset: u32,
    pub raw_size: u32,
}

/// Header facts needed to find exports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeHeaders {
    pub is_64: bool,
    pub size_of_image: u32,
    /// `(rva, size)` of the export directory, if present
    pub export_directory: Option<(u32, u32)>,
    pub sections: Vec<Section>,
}

impl PeHeaders {
    pub fn parse(data: &[u8]) -> MemoryResult<Self> {
        if data.get(..2) != Some(&DOS_MAGIC[..]) {
            return Err(MemoryError::malformed_image("missing MZ signature"));
        }
        let nt = read_u32(data, 0x3C)? as usize;
        if nt > data.len() || data.get(nt..nt + 4) != Some(&PE_SIGNATURE[..]) {
            return Err(MemoryError::malformed_image("missing PE signature"));
        }

        let coff = nt + 4;
        let section_count = read_u16(data, coff + 2)? as usize;
        let optional_size = read_u16(data, coff + 16)? as usize;
        let optional = coff + 20;

        let (is_64, directories, count_at) = match read_u16(data, optional)? {
            PE32_MAGIC => (false, optional + 96, optional + 92),
            PE32_PLUS_MAGIC => (true, optional + 112, optional + 108),
            other => {
                return Err(MemoryError::malformed_image(format!(
                    "unknown optional header magic 0x{:X}",
                    other
                )))
            }
        };
        let size_of_image = read_u32(data, optional + 56)?;

        let export_directory = if read_u32(data, count_at)? > 0 {
            let rva = read_u32(data, directories)?;
            let size = read_u32(data, directories + 4)?;
            (rva != 0 && size != 0).then_some((rva, size))
        } else {
            None
        };

        let table = optional + optional_size;
        let sections = (0..section_count)
            .map(|i| {
                let at = table + i * SECTION_HEADER_SIZE;
                Ok(Section {
                    virtual_size: read_u32(data, at + 8)?,
                    virtual_address: read_u32(data, at + 12)?,
                    raw_size: read_u32(data, at + 16)?,
                    raw_offset: read_u32(data, at + 20)?,
                })
            })
            .collect::<MemoryResult<Vec<_>>>()?;

        Ok(PeHeaders {
            is_64,
            size_of_image,
            export_directory,
            sections,
        })
    }

    /// File offset backing `rva`
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        let first_section = self.sections.iter().map(|s| s.virtual_address).min();
        if first_section.map_or(true, |start| rva < start) {
            return Some(rva as usize);
        }
        self.sections.iter().find_map(|s| {
            let span = s.virtual_size.max(s.raw_size);
            let delta = rva.checked_sub(s.virtual_address)?;
            if delta < span && delta < s.raw_size {
                s.raw_offset.checked_add(delta).map(|offset| offset as usize)
            } else {
                None
            }
        })
    }
}

/// One exported name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub ordinal: u32,
    pub rva: u32,
    /// `DLL.Function` when the export forwards to another module
    pub forwarder: Option<String>,
}

/// Exports of the module image in `data`
pub fn exports(data: &[u8], layout: Layout) -> MemoryResult<Vec<Export>> {
    let headers = PeHeaders::parse(data)?;
    let Some((dir_rva, dir_size)) = headers.export_directory else {
        return Ok(Vec::new());
    };

    let view = |rva: u32| {
        let offset = match layout {
            Layout::File => headers.rva_to_offset(rva),
            Layout::Mapped => Some(rva as usize),
        };
        offset.and_then(|offset| data.get(offset..))
    };
    parse_export_directory(view, dir_rva, dir_size)
}

/// Exports of an image mapped at `base` in a live source
///
/// Only the headers and the export directory range are read, so images
/// larger than the read limit still work.
pub fn mapped_exports<S: MemorySource + ?Sized>(
    reader: &MemoryReader<'_, S>,
    base: Address,
) -> MemoryResult<Vec<Export>> {
    let header = reader.read_bytes(base, MAPPED_HEADER_SIZE)?;
    let headers = PeHeaders::parse(&header)?;
    let Some((dir_rva, dir_size)) = headers.export_directory else {
        return Ok(Vec::new());
    };

    let start = base
        .checked_add(dir_rva as usize)
        .ok_or_else(|| MemoryError::malformed_image("export directory beyond address space"))?;
    let window = reader.read_bytes(start, dir_size as usize)?;

    // Names and tables outside the directory range are not resolvable here
    let view = |rva: u32| {
        rva.checked_sub(dir_rva)
            .and_then(|offset| window.get(offset as usize..))
    };
    parse_export_directory(view, dir_rva, dir_size)
}

fn parse_export_directory<'d>(
    view: impl Fn(u32) -> Option<&'d [u8]>,
    dir_rva: u32,
    dir_size: u32,
) -> MemoryResult<Vec<Export>> {
    let directory = view(dir_rva)
        .filter(|d| d.len() >= EXPORT_DIRECTORY_SIZE)
        .ok_or_else(|| MemoryError::malformed_image("export directory out of bounds"))?;

    let ordinal_base = LittleEndian::read_u32(&directory[16..]);
    let function_count = LittleEndian::read_u32(&directory[20..]);
    let name_count = (LittleEndian::read_u32(&directory[24..]) as usize).min(MAX_EXPORTS);
    let functions_rva = LittleEndian::read_u32(&directory[28..]);
    let names_rva = LittleEndian::read_u32(&directory[32..]);
    let ordinals_rva = LittleEndian::read_u32(&directory[36..]);

    let u32_at = |rva: u32| view(rva).and_then(|d| d.get(..4)).map(LittleEndian::read_u32);
    let u16_at = |rva: u32| view(rva).and_then(|d| d.get(..2)).map(LittleEndian::read_u16);
    let in_directory = |rva: u32| rva >= dir_rva && rva - dir_rva < dir_size;

    // Table slots whose RVA does not fit in 32 bits are skipped
    let slot = |table: u32, index: u32, width: u32| {
        index.checked_mul(width).and_then(|offset| table.checked_add(offset))
    };

    let mut exports = Vec::with_capacity(name_count);
    for i in 0..name_count as u32 {
        let Some(name) = slot(names_rva, i, 4)
            .and_then(u32_at)
            .and_then(|rva| view(rva))
            .map(c_string)
        else {
            continue;
        };
        let Some(index) = slot(ordinals_rva, i, 2).and_then(u16_at).map(u32::from) else {
            continue;
        };
        if index >= function_count {
            continue;
        }
        let Some(rva) = slot(functions_rva, index, 4).and_then(u32_at) else {
            continue;
        };
        let Some(ordinal) = ordinal_base.checked_add(index) else {
            continue;
        };
        let forwarder = in_directory(rva).then(|| view(rva).map(c_string)).flatten();

        exports.push(Export {
            name,
            ordinal,
            rva,
            forwarder,
        });
    }
    Ok(exports)
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn read_u16(data: &[u8], at: usize) -> MemoryResult<u16> {
    data.get(at..at + 2)
        .map(LittleEndian::read_u16)
        .ok_or_else(|| MemoryError::malformed_image(format!("truncated header at 0x{:X}", at)))
}

fn read_u32(data: &[u8], at: usize) -> MemoryResult<u32> {
    data.get(at..at + 4)
        .map(LittleEndian::read_u32)
        .ok_or_else(|| MemoryError::malformed_image(format!("truncated header at 0x{:X}", at)))
}

/// Synthetic PE32+ images for tests
#[cfg(test)]
pub(crate) mod testing {
    use byteorder::{ByteOrder, LittleEndian};

    pub const SECTION_RVA: u32 = 0x1000;
    pub const SECTION_FILE_OFFSET: u32 = 0x400;
    pub const IMAGE_SIZE: u32 = 0x3000;

    /// One `.edata` section holding the export directory for `exports`
    /// (name, rva). Returns the file layout and the mapped layout.
    pub fn build_image(exports: &[(&str, u32)], forwarded: Option<(&str, &str)>) -> (Vec<u8>, Vec<u8>) {
        let nt = 0x80usize;
        let optional = nt + 24;
        let mut headers = vec![0u8; SECTION_FILE_OFFSET as usize];
        headers[..2].copy_from_slice(b"MZ");
        LittleEndian::write_u32(&mut headers[0x3C..], nt as u32);
        headers[nt..nt + 4].copy_from_slice(b"PE\0\0");
        LittleEndian::write_u16(&mut headers[nt + 4..], 0x8664);
        LittleEndian::write_u16(&mut headers[nt + 6..], 1);
        LittleEndian::write_u16(&mut headers[nt + 20..], 240);
        LittleEndian::write_u16(&mut headers[optional..], 0x20B);
        LittleEndian::write_u32(&mut headers[optional + 56..], IMAGE_SIZE);
        LittleEndian::write_u32(&mut headers[optional + 108..], 16);

        // Export directory layout inside the section
        let mut all: Vec<(&str, Option<&str>, u32)> =
            exports.iter().map(|&(n, rva)| (n, None, rva)).collect();
        if let Some((name, target)) = forwarded {
            all.push((name, Some(target), 0));
        }
        let count = all.len() as u32;
        let functions = SECTION_RVA + 40;
        let names = functions + 4 * count;
        let ordinals = names + 4 * count;
        let mut strings = ordinals + 2 * count;

        let mut edata = vec![0u8; 0x800];
        let put32 = |buf: &mut Vec<u8>, rva: u32, v: u32| {
            LittleEndian::write_u32(&mut buf[(rva - SECTION_RVA) as usize..], v)
        };
        let put16 = |buf: &mut Vec<u8>, rva: u32, v: u16| {
            LittleEndian::write_u16(&mut buf[(rva - SECTION_RVA) as usize..], v)
        };

        put32(&mut edata, SECTION_RVA + 16, 1);
        put32(&mut edata, SECTION_RVA + 20, count);
        put32(&mut edata, SECTION_RVA + 24, count);
        put32(&mut edata, SECTION_RVA + 28, functions);
        put32(&mut edata, SECTION_RVA + 32, names);
        put32(&mut edata, SECTION_RVA + 36, ordinals);

        let mut write_str = |buf: &mut Vec<u8>, text: &str| -> u32 {
            let at = strings;
            let start = (at - SECTION_RVA) as usize;
            buf[start..start + text.len()].copy_from_slice(text.as_bytes());
            strings += text.len() as u32 + 1;
            at
        };

        for (i, (name, target, rva)) in all.iter().enumerate() {
            let i = i as u32;
            let name_rva = write_str(&mut edata, name);
            put32(&mut edata, names + 4 * i, name_rva);
            put16(&mut edata, ordinals + 2 * i, i as u16);
            let function_rva = match target {
                Some(target) => write_str(&mut edata, target),
                None => *rva,
            };
            put32(&mut edata, functions + 4 * i, function_rva);
        }
        let dir_size = strings - SECTION_RVA;

        LittleEndian::write_u32(&mut headers[optional + 112..], SECTION_RVA);
        LittleEndian::write_u32(&mut headers[optional + 116..], dir_size);

        let section = optional + 240;
        headers[section..section + 6].copy_from_slice(b".edata");
        LittleEndian::write_u32(&mut headers[section + 8..], edata.len() as u32);
        LittleEndian::write_u32(&mut headers[section + 12..], SECTION_RVA);
        LittleEndian::write_u32(&mut headers[section + 16..], edata.len() as u32);
        LittleEndian::write_u32(&mut headers[section + 20..], SECTION_FILE_OFFSET);

        let mut file = headers.clone();
        file.extend_from_slice(&edata);

        let mut mapped = vec![0u8; IMAGE_SIZE as usize];
        mapped[..headers.len()].copy_from_slice(&headers);
        let start = SECTION_RVA as usize;
        mapped[start..start + edata.len()].copy_from_slice(&edata);

        (file, mapped)
    }
}
