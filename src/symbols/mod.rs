//! Symbol resolution for loaded modules
//!
//! Export tables (from the module file or its mapped image) and, when a
//! loader is available, debug-symbol files feed one address-ordered
//! collection. Lookups by address pick the nearest symbol at or below the
//! target inside the owning module; lookups by name take glob patterns and
//! are cached per `(pattern, module)`.

pub mod export;
pub mod pdb;
pub mod pe;

pub use export::ExportFormat;
pub use pdb::{default_loader, find_debug_file, DebugSymbolLoader};

use crate::config::SymbolConfig;
use crate::core::types::{Address, MemoryResult, ModuleInfo};
use crate::memory::reader::MemoryReader;
use crate::memory::source::MemorySource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// Span assumed for a function with no size and no following symbol
pub const DEFAULT_FUNCTION_SPAN: usize = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Function,
    Public,
    Global,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "function"),
            SymbolKind::Public => write!(f, "public"),
            SymbolKind::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub address: Address,
    pub size: Option<usize>,
    pub kind: SymbolKind,
    pub module: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, address: Address, kind: SymbolKind, module: impl Into<String>) -> Self {
        Symbol {
            name: name.into(),
            address,
            size: None,
            kind,
            module: module.into(),
            file: None,
            line: None,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_source(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Whether `address` is covered; symbols without a size cover everything above them
    pub fn covers(&self, address: Address) -> bool {
        match (address.offset_from(self.address), self.size) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(distance), Some(size)) => distance < size,
        }
    }
}

/// A module known to the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolModule {
    pub info: ModuleInfo,
    pub has_symbols: bool,
    pub symbol_file: Option<PathBuf>,
}

/// Module listing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub base_address: Address,
    pub size: usize,
    pub path: PathBuf,
    pub has_symbols: bool,
    pub symbol_file: Option<PathBuf>,
    pub symbol_count: usize,
}

/// Human-facing location of an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressDescription {
    Symbol {
        address: Address,
        symbol: Symbol,
        offset: usize,
    },
    Module {
        address: Address,
        module: String,
        offset: usize,
        has_symbols: bool,
    },
    Unknown(Address),
}

impl fmt::Display for AddressDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressDescription::Symbol { symbol, offset: 0, .. } => {
                write!(f, "{}!{}", symbol.module, symbol.name)
            }
            AddressDescription::Symbol { symbol, offset, .. } => {
                write!(f, "{}!{}+0x{:X}", symbol.module, symbol.name, offset)
            }
            AddressDescription::Module { module, offset, .. } => write!(f, "{}+0x{:X}", module, offset),
            AddressDescription::Unknown(address) => write!(f, "{}", address),
        }
    }
}

pub struct SymbolResolver {
    /// Ordered by base address
    modules: Vec<SymbolModule>,
    symbols: BTreeMap<Address, Symbol>,
    name_cache: HashMap<(String, Option<String>), Vec<Symbol>>,
    cache_size: usize,
    search_paths: Vec<PathBuf>,
    debug_loader: Option<Box<dyn DebugSymbolLoader>>,
}

impl Default for SymbolResolver {
    fn default() -> Self {
        SymbolResolver {
            modules: Vec::new(),
            symbols: BTreeMap::new(),
            name_cache: HashMap::new(),
            cache_size: 1000,
            search_paths: Vec::new(),
            debug_loader: default_loader(),
        }
    }
}

impl SymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SymbolConfig) -> Self {
        SymbolResolver {
            cache_size: config.cache_size,
            search_paths: config.search_paths.clone(),
            ..Self::default()
        }
    }

    pub fn with_debug_loader(mut self, loader: Option<Box<dyn DebugSymbolLoader>>) -> Self {
        self.debug_loader = loader;
        self
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// All symbols in address order
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    /// Registers a module; a module with the same name is replaced
    pub fn add_module(&mut self, info: ModuleInfo) {
        self.modules.retain(|m| !m.info.name_matches(&info.name));
        let at = self
            .modules
            .partition_point(|m| m.info.base_address < info.base_address);
        self.modules.insert(
            at,
            SymbolModule {
                info,
                has_symbols: false,
                symbol_file: None,
            },
        );
    }

    /// Adds symbols to a registered module; returns how many were stored
    pub fn add_symbols(&mut self, module: &str, symbols: impl IntoIterator<Item = Symbol>) -> usize {
        let mut added = 0;
        for symbol in symbols {
            self.symbols.insert(symbol.address, symbol);
            added += 1;
        }
        if added > 0 {
            if let Some(entry) = self.modules.iter_mut().find(|m| m.info.name_matches(module)) {
                entry.has_symbols = true;
            }
            self.name_cache.clear();
        }
        added
    }

    /// Loads exports from the module file on disk, then debug symbols
    pub fn load_module_file(&mut self, module: &ModuleInfo) -> MemoryResult<usize> {
        let data = std::fs::read(&module.path)?;
        let exports = pe::exports(&data, pe::Layout::File)?;
        Ok(self.register(module, exports))
    }

    /// Loads exports from the image mapped in the target, then debug symbols
    pub fn load_module_image<S: MemorySource + ?Sized>(
        &mut self,
        reader: &MemoryReader<'_, S>,
        module: &ModuleInfo,
    ) -> MemoryResult<usize> {
        let exports = pe::mapped_exports(reader, module.base_address)?;
        Ok(self.register(module, exports))
    }

    /// Loads every module, preferring files on disk; failures are skipped
    ///
    /// Returns the number of symbols loaded.
    pub fn load_modules<S: MemorySource + ?Sized>(
        &mut self,
        reader: &MemoryReader<'_, S>,
        modules: &[ModuleInfo],
    ) -> usize {
        let mut total = 0;
        for module in modules {
            let loaded = if module.path.is_file() {
                self.load_module_file(module)
            } else {
                self.load_module_image(reader, module)
            };
            match loaded {
                Ok(count) => total += count,
                Err(e) => {
                    debug!("No exports for {}: {}", module.name, e);
                    if !self.modules.iter().any(|m| m.info.name_matches(&module.name)) {
                        self.add_module(module.clone());
                    }
                }
            }
        }
        info!("Loaded {} symbols from {} modules", total, modules.len());
        total
    }

    fn register(&mut self, module: &ModuleInfo, exports: Vec<pe::Export>) -> usize {
        self.add_module(module.clone());

        let symbols: Vec<Symbol> = exports
            .into_iter()
            .filter(|e| e.forwarder.is_none())
            .filter_map(|e| {
                let address = module.base_address.checked_add(e.rva as usize)?;
                Some(Symbol::new(e.name, address, SymbolKind::Function, &module.name))
            })
            .collect();
        let mut count = self.add_symbols(&module.name, symbols);
        debug!("Loaded {} exports for {}", count, module.name);

        count += self.load_debug_symbols(module);
        count
    }

    fn load_debug_symbols(&mut self, module: &ModuleInfo) -> usize {
        let Some(loader) = self.debug_loader.as_ref() else {
            return 0;
        };
        if module.path.as_os_str().is_empty() {
            return 0;
        }
        let Some(path) = find_debug_file(&module.path, &self.search_paths) else {
            return 0;
        };

        match loader.load(&path, module.base_address, &module.name) {
            Ok(symbols) => {
                let count = self.add_symbols(&module.name, symbols);
                if let Some(entry) = self.modules.iter_mut().find(|m| m.info.name_matches(&module.name)) {
                    entry.symbol_file = Some(path.clone());
                }
                info!("Loaded {} debug symbols for {} from {}", count, module.name, path.display());
                count
            }
            Err(e) => {
                debug!("Failed to load {}: {}", path.display(), e);
                0
            }
        }
    }

    /// Module whose image contains `address`
    pub fn module_at(&self, address: Address) -> Option<&SymbolModule> {
        let at = self
            .modules
            .partition_point(|m| m.info.base_address <= address);
        at.checked_sub(1)
            .map(|i| &self.modules[i])
            .filter(|m| m.info.contains_address(address))
    }

    /// Nearest symbol at or below `address` inside its owning module
    ///
    /// An exact match always wins. Otherwise sized symbols qualify only when
    /// they cover the address; unsized symbols qualify unconditionally.
    pub fn resolve(&self, address: Address) -> Option<&Symbol> {
        let module = self.module_at(address)?;
        if let Some(exact) = self.symbols.get(&address) {
            return Some(exact);
        }
        self.symbols
            .range(module.info.base_address..=address)
            .rev()
            .map(|(_, symbol)| symbol)
            .find(|symbol| symbol.covers(address))
    }

    /// Case-insensitive glob search (`*`, `?`, `[..]`), optionally limited to one module
    pub fn find_by_name(&mut self, pattern: &str, module: Option<&str>) -> Vec<Symbol> {
        let key = (
            pattern.to_ascii_lowercase(),
            module.map(|m| m.to_ascii_lowercase()),
        );
        if let Some(hit) = self.name_cache.get(&key) {
            return hit.clone();
        }

        let (glob, module_filter) = (&key.0, key.1.as_deref());
        let found: Vec<Symbol> = self
            .symbols
            .values()
            .filter(|s| module_filter.map_or(true, |m| s.module.eq_ignore_ascii_case(m)))
            .filter(|s| glob_match::glob_match(glob, &s.name.to_ascii_lowercase()))
            .cloned()
            .collect();

        if self.name_cache.len() >= self.cache_size {
            self.name_cache.clear();
        }
        if self.cache_size > 0 {
            self.name_cache.insert(key, found.clone());
        }
        found
    }

    /// Symbol+offset when a symbol resolves, else module+offset
    pub fn describe(&self, address: Address) -> AddressDescription {
        if let Some(symbol) = self.resolve(address) {
            return AddressDescription::Symbol {
                address,
                offset: address.offset_from(symbol.address).unwrap_or(0),
                symbol: symbol.clone(),
            };
        }
        match self.module_at(address) {
            Some(module) => AddressDescription::Module {
                address,
                module: module.info.name.clone(),
                offset: address.offset_from(module.info.base_address).unwrap_or(0),
                has_symbols: module.has_symbols,
            },
            None => AddressDescription::Unknown(address),
        }
    }

    /// `[start, end)` of the function containing `address`
    ///
    /// Uses the symbol size when known, else the next symbol's address, else
    /// [`DEFAULT_FUNCTION_SPAN`].
    pub fn function_bounds(&self, address: Address) -> Option<(Address, Address)> {
        let symbol = self.resolve(address)?;
        let start = symbol.address;
        let end = match symbol.size {
            Some(size) => start.checked_add(size),
            None => self
                .symbols
                .range(start..)
                .nth(1)
                .map(|(next, _)| *next)
                .or_else(|| start.checked_add(DEFAULT_FUNCTION_SPAN)),
        }?;
        Some((start, end))
    }

    pub fn export(&self, format: ExportFormat) -> MemoryResult<String> {
        export::render(self.symbols.values(), format)
    }

    pub fn clear_cache(&mut self) {
        self.name_cache.clear();
    }

    pub fn modules(&self) -> Vec<ModuleSummary> {
        self.modules
            .iter()
            .map(|m| ModuleSummary {
                name: m.info.name.clone(),
                base_address: m.info.base_address,
                size: m.info.size,
                path: m.info.path.clone(),
                has_symbols: m.has_symbols,
                symbol_file: m.symbol_file.clone(),
                symbol_count: self
                    .symbols
                    .range(m.info.base_address..m.info.end_address())
                    .count(),
            })
            .collect()
    }
}

impl fmt::Debug for SymbolResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolResolver")
            .field("modules", &self.modules.len())
            .field("symbols", &self.symbols.len())
            .field("cached_queries", &self.name_cache.len())
            .field("debug_loader", &self.debug_loader.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PointerWidth;
    use crate::memory::reader::ReadLimits;
    use crate::memory::source::MemoryImage;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn resolver() -> SymbolResolver {
        let mut r = SymbolResolver::new().with_debug_loader(None);
        r.add_module(ModuleInfo::new("game.exe", Address::new(0x40_0000), 0x10_0000));
        r.add_module(ModuleInfo::new("engine.dll", Address::new(0x1000_0000), 0x1_0000));
        r.add_symbols(
            "game.exe",
            vec![
                Symbol::new("main", Address::new(0x40_1000), SymbolKind::Function, "game.exe").with_size(0x100),
                Symbol::new("Update", Address::new(0x40_2000), SymbolKind::Function, "game.exe"),
                Symbol::new("g_world", Address::new(0x48_0000), SymbolKind::Global, "game.exe").with_size(8),
            ],
        );
        r.add_symbols(
            "engine.dll",
            vec![Symbol::new("Render", Address::new(0x1000_1000), SymbolKind::Function, "engine.dll")],
        );
        r
    }

    fn name(symbol: Option<&Symbol>) -> Option<&str> {
        symbol.map(|s| s.name.as_str())
    }

    #[test]
    fn test_resolve_nearest_below() {
        let r = resolver();
        assert_eq!(name(r.resolve(Address::new(0x40_1000))), Some("main"));
        assert_eq!(name(r.resolve(Address::new(0x40_10FF))), Some("main"));
        assert_eq!(name(r.resolve(Address::new(0x40_2500))), Some("Update"));
    }

    #[test]
    fn test_sized_symbol_does_not_overreach() {
        let r = resolver();
        // Past main's size with no unsized symbol below it in the module
        assert_eq!(r.resolve(Address::new(0x40_1100)), None);
        // Past g_world's size; the unsized Update below still qualifies
        assert_eq!(name(r.resolve(Address::new(0x48_0010))), Some("Update"));
    }

    #[test]
    fn test_resolution_stays_in_owning_module() {
        let r = resolver();
        // Inside engine.dll but below its only symbol
        assert_eq!(r.resolve(Address::new(0x1000_0800)), None);
        // Outside every module
        assert_eq!(r.resolve(Address::new(0x2000_0000)), None);
    }

    #[test]
    fn test_find_by_name_glob_and_cache() {
        let mut r = resolver();
        let found: Vec<String> = r.find_by_name("*E*", None).into_iter().map(|s| s.name).collect();
        assert_eq!(found, vec!["Update".to_string(), "Render".to_string()]);

        let only_engine = r.find_by_name("*e*", Some("ENGINE.DLL"));
        assert_eq!(only_engine.len(), 1);
        assert_eq!(r.name_cache.len(), 2);

        r.add_symbols(
            "engine.dll",
            vec![Symbol::new("Present", Address::new(0x1000_2000), SymbolKind::Function, "engine.dll")],
        );
        assert!(r.name_cache.is_empty());
        assert_eq!(r.find_by_name("*e*", Some("engine.dll")).len(), 2);

        r.clear_cache();
        assert!(r.name_cache.is_empty());
    }

    #[test]
    fn test_name_cache_is_bounded() {
        let mut r = SymbolResolver::from_config(&SymbolConfig {
            enable_symbol_loading: true,
            cache_size: 2,
            search_paths: Vec::new(),
        });
        r.find_by_name("a*", None);
        r.find_by_name("b*", None);
        r.find_by_name("c*", None);
        assert!(r.name_cache.len() <= 2);
    }

    #[test]
    fn test_describe() {
        let r = resolver();
        assert_eq!(r.describe(Address::new(0x40_1010)).to_string(), "game.exe!main+0x10");
        assert_eq!(r.describe(Address::new(0x40_1000)).to_string(), "game.exe!main");
        assert_eq!(r.describe(Address::new(0x40_1100)).to_string(), "game.exe+0x1100");
        assert!(matches!(
            r.describe(Address::new(0x10)),
            AddressDescription::Unknown(_)
        ));
    }

    #[test]
    fn test_function_bounds() {
        let r = resolver();
        assert_eq!(
            r.function_bounds(Address::new(0x40_1010)),
            Some((Address::new(0x40_1000), Address::new(0x40_1100)))
        );
        // Unsized: ends at the next symbol
        assert_eq!(
            r.function_bounds(Address::new(0x40_2010)),
            Some((Address::new(0x40_2000), Address::new(0x48_0000)))
        );
        // Last symbol overall: default span
        assert_eq!(
            r.function_bounds(Address::new(0x1000_1004)),
            Some((Address::new(0x1000_1000), Address::new(0x1000_2000)))
        );
    }

    #[test]
    fn test_module_summaries() {
        let r = resolver();
        let modules = r.modules();
        assert_eq!(modules[0].name, "game.exe");
        assert_eq!(modules[0].symbol_count, 3);
        assert!(modules[0].has_symbols);
        assert_eq!(modules[1].symbol_count, 1);
    }

    #[test]
    fn test_load_exports_from_file_and_image() {
        let (file, mapped) = pe::testing::build_image(&[("Init", 0x1800), ("Tick", 0x1900)], None);
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plugin.dll");
        std::fs::write(&path, &file).unwrap();

        let on_disk = ModuleInfo::new("plugin.dll", Address::new(0x7000_0000), 0x3000).with_path(&path);
        let mut r = SymbolResolver::new().with_debug_loader(None);
        assert_eq!(r.load_module_file(&on_disk).unwrap(), 2);
        assert_eq!(name(r.resolve(Address::new(0x7000_1904))), Some("Tick"));

        let base = Address::new(0x7100_0000);
        let image = MemoryImage::from_bytes(base, mapped, PointerWidth::Eight);
        let reader = MemoryReader::new(&image, ReadLimits::default());
        let in_memory = ModuleInfo::new("mapped.dll", base, 0x3000).with_path(Path::new("/nonexistent/mapped.dll"));
        assert_eq!(r.load_modules(&reader, &[in_memory]), 2);
        assert_eq!(name(r.resolve(Address::new(0x7100_1800))), Some("Init"));
        assert_eq!(r.modules().len(), 2);
    }

    #[test]
    fn test_export_in_address_order() {
        let r = resolver();
        let csv = r.export(ExportFormat::Csv).unwrap();
        let names: Vec<&str> = csv.lines().skip(1).map(|l| l.split(',').nth(1).unwrap()).collect();
        assert_eq!(names, vec!["main", "Update", "g_world", "Render"]);
    }
}
