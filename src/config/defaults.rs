//! Default configuration values

use serde::{Deserialize, Serialize};

/// Default configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDefaults {
    pub memory: MemoryDefaults,
    pub scanner: ScannerDefaults,
    pub pointers: PointerDefaults,
    pub analysis: AnalysisDefaults,
    pub symbols: SymbolDefaults,
    pub logging: LoggingDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDefaults {
    pub read_only_mode: bool,
    pub max_read_size: usize,
    pub min_valid_address: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerDefaults {
    pub max_results: usize,
    pub chunk_size: usize,
    pub parallel: bool,
    pub max_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerDefaults {
    pub max_depth: usize,
    pub max_results: usize,
    pub frontier_cap: usize,
    pub aligned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDefaults {
    pub structure_depth: usize,
    pub enable_disassembly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolDefaults {
    pub enable_symbol_loading: bool,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingDefaults {
    pub level: String,
}

/// Hard ceiling for a single read, whatever the configuration says
pub const MAX_READ_CEILING: usize = 1024 * 1024 * 1024;

/// Returns the default configuration
pub fn default_config() -> ConfigDefaults {
    ConfigDefaults {
        memory: MemoryDefaults {
            read_only_mode: true,
            max_read_size: 10 * 1024 * 1024, // 10MB
            min_valid_address: 0x1000,
        },
        scanner: ScannerDefaults {
            max_results: 10_000,
            chunk_size: 1024 * 1024, // 1MB
            parallel: true,
            max_threads: num_cpus::get().min(8),
        },
        pointers: PointerDefaults {
            max_depth: 3,
            max_results: 100,
            frontier_cap: 1000,
            aligned: true,
        },
        analysis: AnalysisDefaults {
            structure_depth: 3,
            enable_disassembly: true,
        },
        symbols: SymbolDefaults {
            enable_symbol_loading: true,
            cache_size: 1000,
        },
        logging: LoggingDefaults {
            level: "info".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_defaults() {
        let config = default_config();
        assert!(config.memory.read_only_mode);
        assert_eq!(config.memory.max_read_size, 10485760);
        assert_eq!(config.memory.min_valid_address, 0x1000);
    }

    #[test]
    fn test_scanner_defaults() {
        let config = default_config();
        assert_eq!(config.scanner.max_results, 10_000);
        assert_eq!(config.scanner.chunk_size, 1048576);
        assert!(config.scanner.max_threads > 0);
        assert!(config.scanner.max_threads <= 8);
    }

    #[test]
    fn test_pointer_and_analysis_defaults() {
        let config = default_config();
        assert_eq!(config.pointers.frontier_cap, 1000);
        assert_eq!(config.pointers.max_depth, 3);
        assert!(config.pointers.aligned);
        assert_eq!(config.analysis.structure_depth, 3);
        assert_eq!(config.symbols.cache_size, 1000);
    }

    #[test]
    fn test_serialization() {
        let config = default_config();
        let serialized = toml::to_string(&config).unwrap();
        assert!(serialized.contains("max_read_size"));
        assert!(serialized.contains("frontier_cap"));

        let deserialized: ConfigDefaults = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.scanner.chunk_size, config.scanner.chunk_size);
        assert_eq!(deserialized.logging.level, config.logging.level);
    }
}
