//! Debug-symbol file discovery and loading

use super::Symbol;
#[cfg(feature = "pdb")]
use super::SymbolKind;
use crate::core::types::{Address, MemoryResult};
use std::path::{Path, PathBuf};

/// Machine-wide directories searched after the module's own directory
pub const SYSTEM_SYMBOL_DIRS: &[&str] = &[r"C:\Windows\Symbols", r"C:\Symbols"];

/// Finds `<stem>.pdb` for a module
///
/// Search order: beside the module, `<module dir>/symbols`, each of
/// `search_paths`, then [`SYSTEM_SYMBOL_DIRS`].
pub fn find_debug_file(module_path: &Path, search_paths: &[PathBuf]) -> Option<PathBuf> {
    candidates(module_path, search_paths)
        .into_iter()
        .find(|candidate| candidate.is_file())
}

fn candidates(module_path: &Path, search_paths: &[PathBuf]) -> Vec<PathBuf> {
    let Some(stem) = module_path.file_stem() else {
        return Vec::new();
    };
    let mut file_name = stem.to_os_string();
    file_name.push(".pdb");

    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(dir) = module_path.parent() {
        dirs.push(dir.to_path_buf());
        dirs.push(dir.join("symbols"));
    }
    dirs.extend(search_paths.iter().cloned());
    dirs.extend(SYSTEM_SYMBOL_DIRS.iter().map(PathBuf::from));

    dirs.into_iter().map(|dir| dir.join(&file_name)).collect()
}

/// Reads public and global symbols from a debug-symbol file
pub trait DebugSymbolLoader: Send + Sync {
    /// Symbols with addresses rebased onto `base`, attributed to `module`
    fn load(&self, path: &Path, base: Address, module: &str) -> MemoryResult<Vec<Symbol>>;
}

/// The loader compiled into this build, if any
pub fn default_loader() -> Option<Box<dyn DebugSymbolLoader>> {
    #[cfg(feature = "pdb")]
    {
        Some(Box::new(PdbLoader))
    }
    #[cfg(not(feature = "pdb"))]
    {
        None
    }
}

/// Loader backed by the `pdb` crate
#[cfg(feature = "pdb")]
#[derive(Debug, Default, Clone, Copy)]
pub struct PdbLoader;

#[cfg(feature = "pdb")]
impl DebugSymbolLoader for PdbLoader {
    fn load(&self, path: &Path, base: Address, module: &str) -> MemoryResult<Vec<Symbol>> {
        use crate::core::types::MemoryError;
        use pdb::FallibleIterator;

        let pdb_error = |e: pdb::Error| MemoryError::malformed_image(format!("{}: {}", path.display(), e));

        let file = std::fs::File::open(path)?;
        let mut pdb = pdb::PDB::open(file).map_err(pdb_error)?;
        let globals = pdb.global_symbols().map_err(pdb_error)?;
        let address_map = pdb.address_map().map_err(pdb_error)?;

        let mut symbols = Vec::new();
        let mut iter = globals.iter();
        while let Some(symbol) = iter.next().map_err(pdb_error)? {
            let (name, offset, kind) = match symbol.parse() {
                Ok(pdb::SymbolData::Public(data)) => (
                    data.name.to_string().into_owned(),
                    data.offset,
                    if data.function {
                        SymbolKind::Function
                    } else {
                        SymbolKind::Public
                    },
                ),
                Ok(pdb::SymbolData::Data(data)) if data.global => {
                    (data.name.to_string().into_owned(), data.offset, SymbolKind::Global)
                }
                _ => continue,
            };
            let Some(rva) = offset.to_rva(&address_map) else {
                continue;
            };
            let Some(address) = base.checked_add(rva.0 as usize) else {
                continue;
            };
            symbols.push(Symbol::new(name, address, kind, module));
        }
        Ok(symbols)
    }
}
