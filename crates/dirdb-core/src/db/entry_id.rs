use derive_more::{Display, From};

///
/// EntryID
///
/// Monotonically assigned identifier of one directory entry. Ordering is
/// numeric, which is also the byte order of the big-endian encoding.
///

#[derive(Clone, Copy, Debug, Default, Display, Eq, From, Hash, Ord, PartialEq, PartialOrd)]
pub struct EntryID(u64);

impl EntryID {
    pub const STORED_SIZE: usize = 8;

    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; Self::STORED_SIZE] {
        self.0.to_be_bytes()
    }

    /// Decode an ID from exactly eight big-endian bytes.
    #[must_use]
    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; Self::STORED_SIZE] = bytes.try_into().ok()?;

        Some(Self(u64::from_be_bytes(array)))
    }
}
