use crate::{
    db::{
        EntryID,
        id_set::{DefinedIds, EntryIDSet},
        key_hex,
    },
    error::{ErrorOrigin, InternalError},
};
use thiserror::Error as ThisError;

// Undefined values are one marker byte plus a big-endian count. Nine bytes is
// never a multiple of the ID width, so the two layouts cannot be confused.
const UNDEFINED_MARKER: u8 = 0xFF;
const UNDEFINED_LEN: usize = 1 + 8;
const UNKNOWN_COUNT: u64 = u64::MAX;

///
/// EntryIdSetCorruption
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum EntryIdSetCorruption {
    #[error("value length {len} is neither a multiple of 8 nor an undefined marker")]
    InvalidLength { len: usize },

    #[error("undefined marker byte is 0x{byte:02x}")]
    InvalidMarker { byte: u8 },

    #[error("entry IDs are not strictly ascending at position {position}")]
    NotAscending { position: usize },
}

impl EntryIDSet {
    /// Stored form of the set, or `None` when the key row should be removed.
    #[must_use]
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        if self.is_empty() {
            return None;
        }

        let mut out = Vec::new();
        self.encode_into(&mut out);

        Some(out)
    }

    /// Append the stored form to a caller-owned buffer.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Defined(ids) => {
                out.reserve(ids.len() * EntryID::STORED_SIZE);
                for id in ids.iter() {
                    out.extend_from_slice(&id.to_be_bytes());
                }
            }
            Self::UndefinedCounted(count) => {
                // Saturate below the unknown sentinel.
                let count = (*count).min(UNKNOWN_COUNT - 1);
                out.push(UNDEFINED_MARKER);
                out.extend_from_slice(&count.to_be_bytes());
            }
            Self::UndefinedUnknown => {
                out.push(UNDEFINED_MARKER);
                out.extend_from_slice(&UNKNOWN_COUNT.to_be_bytes());
            }
        }
    }

    /// Decode a stored value.
    pub fn decode(bytes: &[u8]) -> Result<Self, EntryIdSetCorruption> {
        if bytes.len() == UNDEFINED_LEN {
            if bytes[0] != UNDEFINED_MARKER {
                return Err(EntryIdSetCorruption::InvalidMarker { byte: bytes[0] });
            }
            let count = u64::from_be_bytes(bytes[1..].try_into().map_err(|_| {
                EntryIdSetCorruption::InvalidLength { len: bytes.len() }
            })?);

            return Ok(if count == UNKNOWN_COUNT {
                Self::UndefinedUnknown
            } else {
                Self::UndefinedCounted(count)
            });
        }

        if !bytes.len().is_multiple_of(EntryID::STORED_SIZE) {
            return Err(EntryIdSetCorruption::InvalidLength { len: bytes.len() });
        }

        let mut ids = Vec::with_capacity(bytes.len() / EntryID::STORED_SIZE);
        for (position, chunk) in bytes.chunks_exact(EntryID::STORED_SIZE).enumerate() {
            let id = EntryID::from_be_slice(chunk)
                .ok_or(EntryIdSetCorruption::InvalidLength { len: bytes.len() })?;
            if ids.last().is_some_and(|last| *last >= id) {
                return Err(EntryIdSetCorruption::NotAscending { position });
            }
            ids.push(id);
        }

        Ok(Self::Defined(DefinedIds::from_sorted(ids)))
    }

    /// Decode the value stored under `key`, mapping malformed bytes to a
    /// corruption error that names the key.
    pub fn from_bytes(key: &[u8], bytes: &[u8]) -> Result<Self, InternalError> {
        Self::decode(bytes).map_err(|err| {
            InternalError::corruption(
                ErrorOrigin::IdSet,
                format!("index key {}: {err}", key_hex(key)),
            )
        })
    }
}
