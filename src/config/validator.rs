//! Configuration validator
//!
//! Validates configuration values to ensure they are within acceptable ranges.

use super::defaults::MAX_READ_CEILING;
use super::loader::{
    AnalysisConfig, Config, ConfigError, LoggingConfig, MemoryConfig, PointerConfig,
    ScannerConfig, SymbolConfig,
};
use tracing::warn;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire configuration
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        Self::validate_memory(&config.memory)?;
        Self::validate_scanner(&config.scanner, &config.memory)?;
        Self::validate_pointers(&config.pointers)?;
        Self::validate_analysis(&config.analysis)?;
        Self::validate_symbols(&config.symbols)?;
        Self::validate_logging(&config.logging)?;
        Ok(())
    }

    fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
        if memory.max_read_size == 0 {
            return Err(ConfigError::Invalid(
                "Maximum read size must be greater than 0".to_string(),
            ));
        }

        if memory.max_read_size > MAX_READ_CEILING {
            return Err(ConfigError::Invalid(format!(
                "Maximum read size cannot exceed {} bytes",
                MAX_READ_CEILING
            )));
        }

        if memory.min_valid_address == 0 {
            return Err(ConfigError::Invalid(
                "Minimum valid address must be above the null page".to_string(),
            ));
        }

        if !memory.read_only_mode {
            warn!("read_only_mode = false is ignored: memory writes are never performed");
        }

        Ok(())
    }

    fn validate_scanner(scanner: &ScannerConfig, memory: &MemoryConfig) -> Result<(), ConfigError> {
        if scanner.max_results == 0 {
            return Err(ConfigError::Invalid(
                "Scanner result cap must be at least 1".to_string(),
            ));
        }

        if scanner.max_threads == 0 || scanner.max_threads > 128 {
            return Err(ConfigError::Invalid(
                "Scanner threads must be between 1 and 128".to_string(),
            ));
        }

        // Chunk size must be a power of 2 so aligned slots never straddle chunks
        if scanner.chunk_size == 0 || !scanner.chunk_size.is_power_of_two() {
            return Err(ConfigError::Invalid(
                "Chunk size must be a power of 2".to_string(),
            ));
        }

        if scanner.chunk_size > memory.max_read_size {
            return Err(ConfigError::Invalid(
                "Chunk size cannot exceed the maximum read size".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_pointers(pointers: &PointerConfig) -> Result<(), ConfigError> {
        if pointers.max_depth == 0 || pointers.max_depth > 16 {
            return Err(ConfigError::Invalid(
                "Pointer search depth must be between 1 and 16".to_string(),
            ));
        }

        if pointers.frontier_cap == 0 || pointers.max_results == 0 {
            return Err(ConfigError::Invalid(
                "Pointer frontier cap and result cap must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_analysis(analysis: &AnalysisConfig) -> Result<(), ConfigError> {
        if analysis.structure_depth > 8 {
            return Err(ConfigError::Invalid(
                "Structure analysis depth cannot exceed 8".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_symbols(symbols: &SymbolConfig) -> Result<(), ConfigError> {
        if symbols.cache_size == 0 {
            return Err(ConfigError::Invalid(
                "Symbol cache size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                logging.level, valid_levels
            )));
        }

        Ok(())
    }
}

/// Validates a configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    ConfigValidator::validate(config)
}
