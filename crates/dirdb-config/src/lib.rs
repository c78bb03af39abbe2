//! Backend index configuration for dirdb.
//!
//! Parses the TOML description of which attribute and VLV indexes an entry
//! container maintains, and validates it before the core opens any tree.

mod error;
mod model;


pub use error::ConfigError;
pub use model::{
    AttributeIndexConfig, BackendIndexConfig, DEFAULT_CURSOR_ENTRY_LIMIT,
    DEFAULT_INDEX_ENTRY_LIMIT, DEFAULT_MAX_BLOCK_SIZE, IndexType, SearchScope, VlvIndexConfig,
};

use std::path::Path;

/// Parse and validate a backend index configuration from TOML text.
pub fn from_toml_str(source: &str) -> Result<BackendIndexConfig, ConfigError> {
    let config: BackendIndexConfig = toml::from_str(source)?;
    config.validate()?;

    Ok(config)
}

/// Read, parse and validate a backend index configuration file.
pub fn load(path: impl AsRef<Path>) -> Result<BackendIndexConfig, ConfigError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    from_toml_str(&source)
}
