//! Module: db::entry
//! Responsibility: the view of directory entries that index maintenance needs.
//! Does not own: schema, matching rules, or filter evaluation; entries supply those.
//! Boundary: indexes see entries only through `DirectoryEntry` and `Indexer`.

use crate::error::InternalError;
use dirdb_config::{IndexType, SearchScope};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// Key written by presence indexes for every entry holding the attribute.
pub const PRESENCE_KEY: &[u8] = b"+";

///
/// Dn
///
/// Distinguished name as a list of normalized RDNs, leaf first.
/// Normalization trims whitespace around separators and lowercases.
///

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Dn {
    rdns: Vec<String>,
}

impl Dn {
    /// The empty root DN.
    #[must_use]
    pub const fn root() -> Self {
        Self { rdns: Vec::new() }
    }

    /// Parse a DN string. Escaped commas (`\,`) stay inside their RDN.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut rdns = Vec::new();
        let mut current = String::new();
        let mut escaped = false;

        for ch in text.chars() {
            match ch {
                _ if escaped => {
                    current.push(ch);
                    escaped = false;
                }
                '\\' => {
                    current.push(ch);
                    escaped = true;
                }
                ',' => rdns.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            }
        }
        rdns.push(current);

        let rdns = rdns
            .iter()
            .map(|rdn| normalize_rdn(rdn))
            .filter(|rdn| !rdn.is_empty())
            .collect();

        Self { rdns }
    }

    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    #[must_use]
    pub const fn depth(&self) -> usize {
        self.rdns.len()
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        Some(Self {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    /// True when `self` equals `base` or sits below it.
    #[must_use]
    pub fn is_within(&self, base: &Self) -> bool {
        self.rdns.ends_with(&base.rdns)
    }

    #[must_use]
    pub fn matches_base_and_scope(&self, base: &Self, scope: SearchScope) -> bool {
        match scope {
            SearchScope::BaseObject => self == base,
            SearchScope::SingleLevel => self.depth() == base.depth() + 1 && self.is_within(base),
            SearchScope::WholeSubtree => self.is_within(base),
            SearchScope::SubordinateSubtree => self.depth() > base.depth() && self.is_within(base),
        }
    }
}

fn normalize_rdn(rdn: &str) -> String {
    rdn.split('+')
        .map(|ava| match ava.split_once('=') {
            Some((attr, value)) => format!(
                "{}={}",
                attr.trim().to_ascii_lowercase(),
                value.trim().to_lowercase()
            ),
            None => ava.trim().to_lowercase(),
        })
        .collect::<Vec<_>>()
        .join("+")
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rdns.join(","))
    }
}

///
/// DirectoryEntry
///
/// One directory entry as seen by index maintenance. Attribute values are
/// returned already normalized by the attribute's matching rule.
///

pub trait DirectoryEntry {
    fn dn(&self) -> &Dn;

    /// Normalized values of `attribute` (case-insensitive name); empty when absent.
    fn attribute_values(&self, attribute: &str) -> Vec<&[u8]>;

    /// Evaluate a configured search filter against this entry.
    fn matches_filter(&self, filter: &str) -> bool;
}

///
/// Indexer
///
/// Derives the index keys of one entry for one attribute index.
///

pub trait Indexer: fmt::Debug + Send + Sync {
    /// Identifier of the index tree, e.g. `cn.equality`.
    fn index_id(&self) -> String;

    fn index_entry(&self, entry: &dyn DirectoryEntry, keys: &mut BTreeSet<Vec<u8>>);

    /// Signed per-key diff between two versions of an entry:
    /// `true` for keys to insert, `false` for keys to remove.
    fn modify_entry(
        &self,
        old_entry: &dyn DirectoryEntry,
        new_entry: &dyn DirectoryEntry,
        modified: &mut BTreeMap<Vec<u8>, bool>,
    ) {
        let mut old_keys = BTreeSet::new();
        let mut new_keys = BTreeSet::new();
        self.index_entry(old_entry, &mut old_keys);
        self.index_entry(new_entry, &mut new_keys);

        for key in old_keys.difference(&new_keys) {
            modified.insert(key.clone(), false);
        }
        for key in new_keys.difference(&old_keys) {
            modified.insert(key.clone(), true);
        }
    }
}

///
/// EqualityIndexer
///
/// One key per normalized attribute value. Ordering indexes reuse it, since
/// normalized values already sort bytewise.
///

#[derive(Clone, Debug)]
pub struct EqualityIndexer {
    attribute: String,
    index_type: IndexType,
}

impl EqualityIndexer {
    #[must_use]
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into().to_ascii_lowercase(),
            index_type: IndexType::Equality,
        }
    }

    #[must_use]
    pub fn ordering(attribute: impl Into<String>) -> Self {
        Self {
            index_type: IndexType::Ordering,
            ..Self::new(attribute)
        }
    }
}

impl Indexer for EqualityIndexer {
    fn index_id(&self) -> String {
        format!("{}.{}", self.attribute, self.index_type.tree_suffix())
    }

    fn index_entry(&self, entry: &dyn DirectoryEntry, keys: &mut BTreeSet<Vec<u8>>) {
        keys.extend(
            entry
                .attribute_values(&self.attribute)
                .into_iter()
                .map(<[u8]>::to_vec),
        );
    }
}

///
/// PresenceIndexer
///

#[derive(Clone, Debug)]
pub struct PresenceIndexer {
    attribute: String,
}

impl PresenceIndexer {
    #[must_use]
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into().to_ascii_lowercase(),
        }
    }
}

impl Indexer for PresenceIndexer {
    fn index_id(&self) -> String {
        format!("{}.{}", self.attribute, IndexType::Presence.tree_suffix())
    }

    fn index_entry(&self, entry: &dyn DirectoryEntry, keys: &mut BTreeSet<Vec<u8>>) {
        if !entry.attribute_values(&self.attribute).is_empty() {
            keys.insert(PRESENCE_KEY.to_vec());
        }
    }
}

/// Build the indexer for one configured index type.
pub fn indexer_for(
    attribute: &str,
    index_type: IndexType,
) -> Result<Box<dyn Indexer>, InternalError> {
    match index_type {
        IndexType::Equality => Ok(Box::new(EqualityIndexer::new(attribute))),
        IndexType::Ordering => Ok(Box::new(EqualityIndexer::ordering(attribute))),
        IndexType::Presence => Ok(Box::new(PresenceIndexer::new(attribute))),
        IndexType::Substring | IndexType::Approximate => Err(InternalError::index_unsupported(
            format!("{index_type} indexing of '{attribute}' requires a matching-rule indexer"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestEntry;

    #[test]
    fn dn_parsing_normalizes_and_keeps_escaped_commas() {
        let dn = Dn::parse(" CN=Smith\\, John , ou=People,DC=Example,dc=com");

        assert_eq!(dn.depth(), 4);
        assert_eq!(dn.to_string(), "cn=smith\\, john,ou=people,dc=example,dc=com");
        assert_eq!(
            dn.parent().unwrap(),
            Dn::parse("ou=people,dc=example,dc=com")
        );
        assert!(Dn::parse("").is_root());
    }

    #[test]
    fn scope_matching() {
        let base = Dn::parse("dc=example,dc=com");
        let child = Dn::parse("ou=people,dc=example,dc=com");
        let grandchild = Dn::parse("cn=a,ou=people,dc=example,dc=com");
        let other = Dn::parse("dc=other,dc=com");

        assert!(base.matches_base_and_scope(&base, SearchScope::BaseObject));
        assert!(!child.matches_base_and_scope(&base, SearchScope::BaseObject));
        assert!(child.matches_base_and_scope(&base, SearchScope::SingleLevel));
        assert!(!grandchild.matches_base_and_scope(&base, SearchScope::SingleLevel));
        assert!(grandchild.matches_base_and_scope(&base, SearchScope::WholeSubtree));
        assert!(base.matches_base_and_scope(&base, SearchScope::WholeSubtree));
        assert!(!base.matches_base_and_scope(&base, SearchScope::SubordinateSubtree));
        assert!(!other.matches_base_and_scope(&base, SearchScope::WholeSubtree));
    }

    #[test]
    fn equality_diff_only_reports_changed_values() {
        let indexer = EqualityIndexer::new("cn");
        let old = TestEntry::new("cn=a,dc=example").with("cn", &["a", "b"]);
        let new = TestEntry::new("cn=a,dc=example").with("cn", &["b", "c"]);

        let mut modified = BTreeMap::new();
        indexer.modify_entry(&old, &new, &mut modified);

        assert_eq!(
            modified.into_iter().collect::<Vec<_>>(),
            vec![(b"a".to_vec(), false), (b"c".to_vec(), true)]
        );
    }

    #[test]
    fn presence_indexer_emits_single_key() {
        let indexer = PresenceIndexer::new("Mail");
        let entry = TestEntry::new("cn=a").with("mail", &["x@example.com", "y@example.com"]);

        let mut keys = BTreeSet::new();
        indexer.index_entry(&entry, &mut keys);

        assert_eq!(indexer.index_id(), "mail.presence");
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec![PRESENCE_KEY.to_vec()]);
    }

    #[test]
    fn substring_indexes_are_unsupported() {
        assert!(indexer_for("cn", IndexType::Substring).is_err());
        assert_eq!(
            indexer_for("cn", IndexType::Ordering).unwrap().index_id(),
            "cn.ordering"
        );
    }
}
