//! One attachment to one target
//!
//! A [`Session`] owns its memory source together with everything derived
//! from it: read limits, the cancellation token shared by long operations,
//! the symbol resolver and the disassembler. It is built per attach and
//! dropped (or [`detach`](Session::detach)ed) afterwards; nothing here is
//! process-wide.

use crate::analysis::{default_disassembler, Disassembler, StructureAnalyzer};
use crate::config::Config;
use crate::core::types::{CancellationToken, MemoryResult, ModuleInfo};
use crate::memory::pointer::{PointerResolver, PointerSearchOptions};
use crate::memory::reader::{MemoryReader, ReadLimits};
use crate::memory::scanner::{ScanOptions, Scanner};
use crate::memory::snapshot::SnapshotEngine;
use crate::memory::source::MemorySource;
use crate::process::handle::ProcessHandle;
use crate::symbols::{default_loader, SymbolResolver};
use std::fmt;
use tracing::{debug, info, warn};

pub struct Session<S: MemorySource> {
    source: S,
    config: Config,
    limits: ReadLimits,
    cancel: CancellationToken,
    symbols: Option<SymbolResolver>,
    disassembler: Option<Box<dyn Disassembler>>,
}

impl Session<ProcessHandle> {
    /// Opens `pid` read-only and builds a session around the handle
    pub fn attach(pid: u32, config: Config) -> MemoryResult<Self> {
        let handle = ProcessHandle::open_read_only(pid)?;
        info!("Attached to process {}", pid);
        Ok(Session::new(handle, config))
    }

    /// Releases the process handle
    pub fn detach(self) -> MemoryResult<()> {
        let pid = self.source.pid();
        self.cancel.cancel();
        self.source.close()?;
        info!("Detached from process {}", pid);
        Ok(())
    }
}

impl<S: MemorySource> Session<S> {
    pub fn new(source: S, config: Config) -> Self {
        if !config.memory.read_only_mode {
            warn!("read_only_mode = false has no effect; memory is never written");
        }

        let disassembler = if config.analysis.enable_disassembly {
            let disassembler = default_disassembler();
            if disassembler.is_none() {
                warn!("Disassembly requested but no disassembler is compiled in");
            }
            disassembler
        } else {
            None
        };

        Session {
            limits: ReadLimits::from(&config.memory),
            source,
            config,
            cancel: CancellationToken::new(),
            symbols: None,
            disassembler,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn limits(&self) -> ReadLimits {
        self.limits
    }

    /// Token observed by every scan, snapshot and pointer search of this session
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels running operations; later ones start with a fresh token
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }

    pub fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        self.source.modules()
    }

    pub fn reader(&self) -> MemoryReader<'_, S> {
        MemoryReader::new(&self.source, self.limits)
    }

    /// Scanner with the configured options
    pub fn scanner(&self) -> Scanner<'_, S> {
        self.scanner_with(ScanOptions::from(&self.config.scanner))
    }

    pub fn scanner_with(&self, options: ScanOptions) -> Scanner<'_, S> {
        Scanner::new(&self.source, self.limits, options).with_cancellation(self.cancel.clone())
    }

    pub fn pointers(&self) -> PointerResolver<'_, S> {
        PointerResolver::new(&self.source, self.limits).with_cancellation(self.cancel.clone())
    }

    pub fn pointer_search_options(&self) -> PointerSearchOptions {
        let mut options = PointerSearchOptions::from(&self.config.pointers);
        options.parallel = self.config.scanner.parallel;
        options
    }

    pub fn snapshots(&self) -> SnapshotEngine<'_, S> {
        SnapshotEngine::new(&self.source, self.limits).with_cancellation(self.cancel.clone())
    }

    pub fn analyzer(&self) -> StructureAnalyzer<'_, S> {
        StructureAnalyzer::new(self.reader(), self.config.analysis.structure_depth)
            .with_disassembler(self.disassembler.as_deref())
    }

    /// The symbol resolver, populated from the target's modules on first use
    ///
    /// With symbol loading disabled the resolver only knows module bounds.
    pub fn symbols(&mut self) -> MemoryResult<&mut SymbolResolver> {
        let resolver = match self.symbols.take() {
            Some(resolver) => resolver,
            None => self.load_symbols()?,
        };
        Ok(self.symbols.insert(resolver))
    }

    fn load_symbols(&self) -> MemoryResult<SymbolResolver> {
        let modules = self.source.modules()?;
        let mut resolver = SymbolResolver::from_config(&self.config.symbols).with_debug_loader(default_loader());
        if self.config.symbols.enable_symbol_loading {
            let loaded = resolver.load_modules(&self.reader(), &modules);
            info!("Loaded {} symbols from {} modules", loaded, modules.len());
        } else {
            debug!("Symbol loading disabled; registering {} modules", modules.len());
            for module in modules {
                resolver.add_module(module);
            }
        }
        Ok(resolver)
    }

    /// Drops cached symbols so the next [`symbols`](Self::symbols) call reloads them
    pub fn reload_symbols(&mut self) {
        self.symbols = None;
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

impl<S: MemorySource + fmt::Debug> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("source", &self.source)
            .field("limits", &self.limits)
            .field("symbols_loaded", &self.symbols.is_some())
            .field("disassembler", &self.disassembler.is_some())
            .finish()
    }
}
