//! Configuration loader
//!
//! Handles loading configuration from TOML files and merging with defaults.

use super::defaults::default_config;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up by [`load_config`]
pub const DEFAULT_CONFIG_FILE: &str = "memory-probe.toml";

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_memory")]
    pub memory: MemoryConfig,

    #[serde(default = "default_scanner")]
    pub scanner: ScannerConfig,

    #[serde(default = "default_pointers")]
    pub pointers: PointerConfig,

    #[serde(default = "default_analysis")]
    pub analysis: AnalysisConfig,

    #[serde(default = "default_symbols")]
    pub symbols: SymbolConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,
}

/// Memory access limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Writes are never performed; `false` is accepted and ignored
    #[serde(default = "default_read_only_mode")]
    pub read_only_mode: bool,
    #[serde(default = "default_max_read_size")]
    pub max_read_size: usize,
    #[serde(default = "default_min_valid_address")]
    pub min_valid_address: usize,
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

/// Reverse pointer search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_pointer_max_results")]
    pub max_results: usize,
    #[serde(default = "default_frontier_cap")]
    pub frontier_cap: usize,
    #[serde(default = "default_aligned")]
    pub aligned: bool,
}

/// Structure analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_structure_depth")]
    pub structure_depth: usize,
    #[serde(default = "default_enable_disassembly")]
    pub enable_disassembly: bool,
}

/// Symbol loading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    #[serde(default = "default_enable_symbol_loading")]
    pub enable_symbol_loading: bool,
    #[serde(default = "default_symbol_cache_size")]
    pub cache_size: usize,
    /// Extra directories searched for debug-symbol files
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Configuration loader
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ConfigLoader {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Loads configuration from file
    pub fn load(&self) -> Result<Config, ConfigError> {
        if !self.config_path.exists() {
            return Err(ConfigError::FileNotFound(
                self.config_path.display().to_string(),
            ));
        }

        let contents = fs::read_to_string(&self.config_path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Loads configuration, falling back to defaults only when the file is missing
    pub fn load_or_default(&self) -> Result<Config, ConfigError> {
        match self.load() {
            Err(ConfigError::FileNotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Saves configuration to file
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Loads configuration from the default location
pub fn load_config() -> Result<Config, ConfigError> {
    ConfigLoader::new(DEFAULT_CONFIG_FILE).load_or_default()
}

// Section defaults for serde
fn default_memory() -> MemoryConfig {
    let defaults = default_config().memory;
    MemoryConfig {
        read_only_mode: defaults.read_only_mode,
        max_read_size: defaults.max_read_size,
        min_valid_address: defaults.min_valid_address,
    }
}

fn default_scanner() -> ScannerConfig {
    let defaults = default_config().scanner;
    ScannerConfig {
        max_results: defaults.max_results,
        chunk_size: defaults.chunk_size,
        parallel: defaults.parallel,
        max_threads: defaults.max_threads,
    }
}

fn default_pointers() -> PointerConfig {
    let defaults = default_config().pointers;
    PointerConfig {
        max_depth: defaults.max_depth,
        max_results: defaults.max_results,
        frontier_cap: defaults.frontier_cap,
        aligned: defaults.aligned,
    }
}

fn default_analysis() -> AnalysisConfig {
    let defaults = default_config().analysis;
    AnalysisConfig {
        structure_depth: defaults.structure_depth,
        enable_disassembly: defaults.enable_disassembly,
    }
}

fn default_symbols() -> SymbolConfig {
    let defaults = default_config().symbols;
    SymbolConfig {
        enable_symbol_loading: defaults.enable_symbol_loading,
        cache_size: defaults.cache_size,
        search_paths: Vec::new(),
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_config().logging.level,
    }
}

// Individual field defaults
fn default_read_only_mode() -> bool {
    default_config().memory.read_only_mode
}

fn default_max_read_size() -> usize {
    default_config().memory.max_read_size
}

fn default_min_valid_address() -> usize {
    default_config().memory.min_valid_address
}

fn default_max_results() -> usize {
    default_config().scanner.max_results
}

fn default_chunk_size() -> usize {
    default_config().scanner.chunk_size
}

fn default_parallel() -> bool {
    default_config().scanner.parallel
}

fn default_max_threads() -> usize {
    default_config().scanner.max_threads
}

fn default_max_depth() -> usize {
    default_config().pointers.max_depth
}

fn default_pointer_max_results() -> usize {
    default_config().pointers.max_results
}

fn default_frontier_cap() -> usize {
    default_config().pointers.frontier_cap
}

fn default_aligned() -> bool {
    default_config().pointers.aligned
}

fn default_structure_depth() -> usize {
    default_config().analysis.structure_depth
}

fn default_enable_disassembly() -> bool {
    default_config().analysis.enable_disassembly
}

fn default_enable_symbol_loading() -> bool {
    default_config().symbols.enable_symbol_loading
}

fn default_symbol_cache_size() -> usize {
    default_config().symbols.cache_size
}

fn default_log_level() -> String {
    default_config().logging.level
}

impl Default for Config {
    fn default() -> Self {
        Config {
            memory: default_memory(),
            scanner: default_scanner(),
            pointers: default_pointers(),
            analysis: default_analysis(),
            symbols: default_symbols(),
            logging: default_logging(),
        }
    }
}
