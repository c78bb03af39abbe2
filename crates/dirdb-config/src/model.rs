use crate::ConfigError;
use serde::Deserialize;
use std::{collections::BTreeSet, fmt};

///
/// Constants
///

/// Entry limit applied to attribute indexes that do not override it.
pub const DEFAULT_INDEX_ENTRY_LIMIT: usize = 4000;

/// Upper bound on IDs a single range read may accumulate.
pub const DEFAULT_CURSOR_ENTRY_LIMIT: usize = 100_000;

/// Default capacity of one VLV sort-values block.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 4000;

///
/// BackendIndexConfig
///
/// All index definitions of one entry container.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BackendIndexConfig {
    #[serde(default = "default_index_entry_limit")]
    pub index_entry_limit: usize,

    #[serde(default = "default_cursor_entry_limit")]
    pub cursor_entry_limit: usize,

    #[serde(default, rename = "index")]
    pub indexes: Vec<AttributeIndexConfig>,

    #[serde(default, rename = "vlv_index")]
    pub vlv_indexes: Vec<VlvIndexConfig>,
}

impl BackendIndexConfig {
    /// Check naming, uniqueness and per-index constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut attributes = BTreeSet::new();
        for index in &self.indexes {
            index.validate()?;
            if !attributes.insert(index.attribute.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateAttribute(index.attribute.clone()));
            }
        }

        let mut names = BTreeSet::new();
        for vlv in &self.vlv_indexes {
            vlv.validate()?;
            if !names.insert(vlv.name.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateVlvName(vlv.name.clone()));
            }
        }

        Ok(())
    }

    /// Entry limit in force for one attribute index.
    #[must_use]
    pub fn entry_limit_for(&self, index: &AttributeIndexConfig) -> usize {
        index.index_entry_limit.unwrap_or(self.index_entry_limit)
    }
}

impl Default for BackendIndexConfig {
    fn default() -> Self {
        Self {
            index_entry_limit: DEFAULT_INDEX_ENTRY_LIMIT,
            cursor_entry_limit: DEFAULT_CURSOR_ENTRY_LIMIT,
            indexes: Vec::new(),
            vlv_indexes: Vec::new(),
        }
    }
}

const fn default_index_entry_limit() -> usize {
    DEFAULT_INDEX_ENTRY_LIMIT
}

const fn default_cursor_entry_limit() -> usize {
    DEFAULT_CURSOR_ENTRY_LIMIT
}

const fn default_max_block_size() -> usize {
    DEFAULT_MAX_BLOCK_SIZE
}

///
/// IndexType
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(rename_all = "kebab-case")]
pub enum IndexType {
    Equality,
    Presence,
    Ordering,
    Substring,
    Approximate,
}

impl IndexType {
    /// Suffix used when naming the index tree.
    #[must_use]
    pub const fn tree_suffix(self) -> &'static str {
        match self {
            Self::Equality => "equality",
            Self::Presence => "presence",
            Self::Ordering => "ordering",
            Self::Substring => "substring",
            Self::Approximate => "approximate",
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tree_suffix())
    }
}

///
/// AttributeIndexConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AttributeIndexConfig {
    pub attribute: String,

    pub types: Vec<IndexType>,

    #[serde(default)]
    pub index_entry_limit: Option<usize>,

    #[serde(default)]
    pub maintain_count: bool,
}

impl AttributeIndexConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.attribute.trim().is_empty() {
            return Err(ConfigError::EmptyAttribute);
        }
        if self.types.is_empty() {
            return Err(ConfigError::NoIndexTypes(self.attribute.clone()));
        }

        Ok(())
    }
}

///
/// SearchScope
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SearchScope {
    BaseObject,
    SingleLevel,
    WholeSubtree,
    SubordinateSubtree,
}

///
/// VlvIndexConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VlvIndexConfig {
    pub name: String,
    pub base_dn: String,
    pub scope: SearchScope,
    pub filter: String,
    pub sort_order: String,

    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,
}

impl VlvIndexConfig {
    /// Split the sort order into `(attribute, ascending)` pairs.
    ///
    /// Keys are whitespace separated; a leading `-` marks a descending key and
    /// an optional leading `+` an ascending one.
    pub fn sort_keys(&self) -> Result<Vec<(String, bool)>, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidSortOrder {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        let mut keys = Vec::new();
        for token in self.sort_order.split_whitespace() {
            let (attribute, ascending) = if let Some(rest) = token.strip_prefix('-') {
                (rest, false)
            } else if let Some(rest) = token.strip_prefix('+') {
                (rest, true)
            } else {
                (token, true)
            };

            if attribute.is_empty() || attribute.starts_with(['+', '-']) {
                return Err(invalid(&format!("malformed sort key '{token}'")));
            }
            keys.push((attribute.to_ascii_lowercase(), ascending));
        }

        if keys.is_empty() {
            return Err(invalid("no sort keys"));
        }

        Ok(keys)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyVlvName);
        }
        if self.filter.trim().is_empty() {
            return Err(ConfigError::EmptyFilter(self.name.clone()));
        }
        if self.max_block_size < 2 {
            return Err(ConfigError::BlockSizeTooSmall {
                name: self.name.clone(),
                size: self.max_block_size,
            });
        }
        self.sort_keys()?;

        Ok(())
    }
}
