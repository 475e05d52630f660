//! Disassembler seam
//!
//! Instruction decoding is delegated to an implementation of
//! [`Disassembler`]. Builds without one report [`Disassembly::Unavailable`]
//! instead of failing.

use crate::core::types::{Address, MemoryResult, PointerWidth};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction set to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    X86,
    X64,
}

impl From<PointerWidth> for Architecture {
    fn from(width: PointerWidth) -> Self {
        match width {
            PointerWidth::Four => Architecture::X86,
            PointerWidth::Eight => Architecture::X64,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X64 => write!(f, "x64"),
        }
    }
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub address: Address,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub operands: String,
    pub size: usize,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex: Vec<String> = self.bytes.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{}  {:<24} {}", self.address, hex.join(" "), self.mnemonic)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disassembly {
    Decoded(Vec<Instruction>),
    /// No decoder is available; carries the reason
    Unavailable(String),
}

impl Disassembly {
    pub fn instructions(&self) -> &[Instruction] {
        match self {
            Disassembly::Decoded(instructions) => instructions,
            Disassembly::Unavailable(_) => &[],
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Disassembly::Decoded(_))
    }
}

/// Decodes machine code into instructions
pub trait Disassembler: Send + Sync {
    /// Decodes `bytes` as if mapped at `address`; stops at the first invalid instruction
    fn decode(&self, bytes: &[u8], address: Address, arch: Architecture) -> MemoryResult<Vec<Instruction>>;
}

/// The decoder compiled into this build, if any
pub fn default_disassembler() -> Option<Box<dyn Disassembler>> {
    #[cfg(feature = "capstone")]
    {
        Some(Box::new(capstone_backend::CapstoneDisassembler))
    }
    #[cfg(not(feature = "capstone"))]
    {
        None
    }
}

/// Runs `disassembler` if present, reporting its absence as [`Disassembly::Unavailable`]
pub fn disassemble(
    disassembler: Option<&dyn Disassembler>,
    bytes: &[u8],
    address: Address,
    arch: Architecture,
) -> MemoryResult<Disassembly> {
    match disassembler {
        Some(decoder) => Ok(Disassembly::Decoded(decoder.decode(bytes, address, arch)?)),
        None => {
            tracing::warn!("Disassembly requested but no decoder is available");
            Ok(Disassembly::Unavailable(
                "no disassembler compiled in (enable the `capstone` feature)".to_string(),
            ))
        }
    }
}

#[cfg(feature = "capstone")]
pub mod capstone_backend {
    use super::{Architecture, Disassembler, Instruction};
    use crate::core::types::{Address, MemoryError, MemoryResult};
    use capstone::prelude::*;

    /// Capstone-backed decoder; an engine is built per call since handles are not `Send`
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CapstoneDisassembler;

    impl Disassembler for CapstoneDisassembler {
        fn decode(
            &self,
            bytes: &[u8],
            address: Address,
            arch: Architecture,
        ) -> MemoryResult<Vec<Instruction>> {
            let mode = match arch {
                Architecture::X86 => arch::x86::ArchMode::Mode32,
                Architecture::X64 => arch::x86::ArchMode::Mode64,
            };
            let engine = Capstone::new()
                .x86()
                .mode(mode)
                .syntax(arch::x86::ArchSyntax::Intel)
                .build()
                .map_err(|e| MemoryError::PlatformApi(format!("capstone: {}", e)))?;

            let decoded = engine
                .disasm_all(bytes, address.as_u64())
                .map_err(|e| MemoryError::PlatformApi(format!("capstone: {}", e)))?;

            Ok(decoded
                .iter()
                .map(|insn| Instruction {
                    address: Address::new(insn.address() as usize),
                    bytes: insn.bytes().to_vec(),
                    mnemonic: insn.mnemonic().unwrap_or_default().to_string(),
                    operands: insn.op_str().unwrap_or_default().to_string(),
                    size: insn.bytes().len(),
                })
                .collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_decodes_prologue() {
            let code = [0x55, 0x48, 0x89, 0xE5, 0xC3];
            let insns = CapstoneDisassembler
                .decode(&code, Address::new(0x1000), Architecture::X64)
                .unwrap();
            let mnemonics: Vec<_> = insns.iter().map(|i| i.mnemonic.as_str()).collect();
            assert_eq!(mnemonics, vec!["push", "mov", "ret"]);
            assert_eq!(insns[1].address, Address::new(0x1001));
            assert_eq!(insns[1].size, 3);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decodes every byte as a one-byte `db`
    struct ByteDecoder;

    impl Disassembler for ByteDecoder {
        fn decode(&self, bytes: &[u8], address: Address, _arch: Architecture) -> MemoryResult<Vec<Instruction>> {
            Ok(bytes
                .iter()
                .enumerate()
                .map(|(i, b)| Instruction {
                    address: Address::new(address.as_usize() + i),
                    bytes: vec![*b],
                    mnemonic: "db".to_string(),
                    operands: format!("0x{:02X}", b),
                    size: 1,
                })
                .collect())
        }
    }

    #[test]
    fn test_missing_decoder_is_reported() {
        let result = disassemble(None, &[0x90], Address::new(0x1000), Architecture::X64).unwrap();
        assert!(!result.is_available());
        assert!(result.instructions().is_empty());
    }

    #[test]
    fn test_decoder_is_used() {
        let result = disassemble(Some(&ByteDecoder), &[0x90, 0xC3], Address::new(0x1000), Architecture::X86).unwrap();
        assert!(result.is_available());
        assert_eq!(result.instructions().len(), 2);
        assert_eq!(result.instructions()[1].address, Address::new(0x1001));
        assert_eq!(result.instructions()[1].to_string(), format!("{}  {:<24} db 0xC3", Address::new(0x1001), "C3"));
    }

    #[test]
    fn test_architecture_from_width() {
        assert_eq!(Architecture::from(PointerWidth::Four), Architecture::X86);
        assert_eq!(Architecture::from(PointerWidth::Eight).to_string(), "x64");
    }
}
