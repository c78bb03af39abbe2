use thiserror::Error as ThisError;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("attribute index name must not be empty")]
    EmptyAttribute,

    #[error("attribute index '{0}' is configured more than once")]
    DuplicateAttribute(String),

    #[error("attribute index '{0}' has no index types")]
    NoIndexTypes(String),

    #[error("vlv index name must not be empty")]
    EmptyVlvName,

    #[error("vlv index '{0}' is configured more than once")]
    DuplicateVlvName(String),

    #[error("vlv index '{name}' has an invalid sort order: {reason}")]
    InvalidSortOrder { name: String, reason: String },

    #[error("vlv index '{name}' max block size {size} is below the minimum of 2")]
    BlockSizeTooSmall { name: String, size: usize },

    #[error("vlv index '{0}' has an empty filter")]
    EmptyFilter(String),
}
