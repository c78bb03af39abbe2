use crate::db::{EntryID, entry::DirectoryEntry};
use dirdb_config::{ConfigError, VlvIndexConfig};
use derive_more::Deref;
use std::{cmp::Ordering, fmt};

///
/// SortKey
///
/// One attribute of a sort order. Values compare bytewise on their normalized
/// form; a missing value sorts after every present one in both directions.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SortKey {
    attribute: String,
    ascending: bool,
}

impl SortKey {
    #[must_use]
    pub fn new(attribute: impl Into<String>, ascending: bool) -> Self {
        Self {
            attribute: attribute.into().to_ascii_lowercase(),
            ascending,
        }
    }

    #[must_use]
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self::new(attribute, true)
    }

    #[must_use]
    pub fn descending(attribute: impl Into<String>) -> Self {
        Self::new(attribute, false)
    }

    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    #[must_use]
    pub const fn is_ascending(&self) -> bool {
        self.ascending
    }

    /// Compare two values of this key, nulls last.
    #[must_use]
    pub fn compare_values(&self, a: Option<&[u8]>, b: Option<&[u8]>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) if self.ascending => a.cmp(b),
            (Some(a), Some(b)) => b.cmp(a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    // A multi-valued attribute sorts by the value that would come first.
    fn select_value(&self, values: Vec<&[u8]>) -> Option<Vec<u8>> {
        values
            .into_iter()
            .filter(|value| !value.is_empty())
            .min_by(|a, b| self.compare_values(Some(*a), Some(*b)))
            .map(<[u8]>::to_vec)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ascending {
            f.write_str(&self.attribute)
        } else {
            write!(f, "-{}", self.attribute)
        }
    }
}

///
/// SortOrder
///

#[derive(Clone, Debug, Deref, Eq, Hash, PartialEq)]
pub struct SortOrder(Vec<SortKey>);

impl SortOrder {
    #[must_use]
    pub const fn new(keys: Vec<SortKey>) -> Self {
        Self(keys)
    }

    /// Sort order of a configured VLV index.
    pub fn from_config(config: &VlvIndexConfig) -> Result<Self, ConfigError> {
        let keys = config
            .sort_keys()?
            .into_iter()
            .map(|(attribute, ascending)| SortKey::new(attribute, ascending))
            .collect();

        Ok(Self(keys))
    }

    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    /// Compare values only, ignoring entry IDs.
    #[must_use]
    pub fn compare_values(&self, a: &SortValues, b: &SortValues) -> Ordering {
        for (i, key) in self.0.iter().enumerate() {
            let ordering = key.compare_values(a.value(i), b.value(i));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    }

    /// Total order of index elements: values, then ascending entry ID.
    #[must_use]
    pub fn compare(&self, a: &SortValues, b: &SortValues) -> Ordering {
        self.compare_values(a, b)
            .then_with(|| a.entry_id.cmp(&b.entry_id))
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}")?;
        }

        Ok(())
    }
}

///
/// SortValues
///
/// One VLV element: an entry ID and its value for each sort key.
/// Empty values are stored as null.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SortValues {
    entry_id: EntryID,
    values: Vec<Option<Vec<u8>>>,
}

impl SortValues {
    #[must_use]
    pub fn new(entry_id: EntryID, values: Vec<Option<Vec<u8>>>) -> Self {
        let values = values
            .into_iter()
            .map(|value| value.filter(|v| !v.is_empty()))
            .collect();

        Self { entry_id, values }
    }

    /// Extract the values of `entry` for every key of `order`.
    #[must_use]
    pub fn from_entry(entry_id: EntryID, entry: &dyn DirectoryEntry, order: &SortOrder) -> Self {
        let values = order
            .iter()
            .map(|key| key.select_value(entry.attribute_values(key.attribute())))
            .collect();

        Self { entry_id, values }
    }

    #[must_use]
    pub const fn entry_id(&self) -> EntryID {
        self.entry_id
    }

    #[must_use]
    pub fn values(&self) -> &[Option<Vec<u8>>] {
        &self.values
    }

    /// Value for sort key `i`; absent positions read as null.
    #[must_use]
    pub fn value(&self, i: usize) -> Option<&[u8]> {
        self.values.get(i).and_then(Option::as_deref)
    }
}
