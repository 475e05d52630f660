//! Configuration module
//!
//! Provides configuration loading, validation, and default settings. The
//! core consumes configuration read-only; it never writes memory whatever
//! the configuration says.

mod defaults;
mod loader;
mod validator;

pub use defaults::{default_config, ConfigDefaults, MAX_READ_CEILING};
pub use loader::{
    load_config, AnalysisConfig, Config, ConfigError, ConfigLoader, LoggingConfig, MemoryConfig,
    PointerConfig, ScannerConfig, SymbolConfig, DEFAULT_CONFIG_FILE,
};
pub use validator::{validate_config, ConfigValidator};

// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;
