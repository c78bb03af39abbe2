use crate::db::{EntryID, entry::Dn, vlv::sort::SortOrder};
use dirdb_config::SearchScope;

///
/// SearchRequest
///
/// The parts of a search a VLV index must match exactly to serve it.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchRequest {
    pub base_dn: Dn,
    pub scope: SearchScope,
    pub filter: String,
}

impl SearchRequest {
    #[must_use]
    pub fn new(base_dn: &str, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base_dn: Dn::parse(base_dn),
            scope,
            filter: filter.into(),
        }
    }
}

///
/// SortControl
///
/// Server-side sort requested by the client.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SortControl {
    pub sort_order: SortOrder,
}

impl SortControl {
    #[must_use]
    pub const fn new(sort_order: SortOrder) -> Self {
        Self { sort_order }
    }
}

///
/// VlvRequest
///
/// Page selection: a window of `before_count` elements before the target and
/// `after_count` after it. Offsets start at 1.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VlvRequest {
    ByOffset {
        before_count: usize,
        after_count: usize,
        offset: i64,
    },
    ByAssertion {
        before_count: usize,
        after_count: usize,
        assertion: Vec<u8>,
    },
}

impl VlvRequest {
    #[must_use]
    pub const fn by_offset(before_count: usize, after_count: usize, offset: i64) -> Self {
        Self::ByOffset {
            before_count,
            after_count,
            offset,
        }
    }

    #[must_use]
    pub fn by_assertion(
        before_count: usize,
        after_count: usize,
        assertion: impl Into<Vec<u8>>,
    ) -> Self {
        Self::ByAssertion {
            before_count,
            after_count,
            assertion: assertion.into(),
        }
    }

    #[must_use]
    pub const fn before_count(&self) -> usize {
        match self {
            Self::ByOffset { before_count, .. } | Self::ByAssertion { before_count, .. } => {
                *before_count
            }
        }
    }

    #[must_use]
    pub const fn after_count(&self) -> usize {
        match self {
            Self::ByOffset { after_count, .. } | Self::ByAssertion { after_count, .. } => {
                *after_count
            }
        }
    }
}

///
/// VlvResultCode
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VlvResultCode {
    Success,
    OffsetRangeError,
}

///
/// VlvResponse
///
/// What the client is told about the page: the 1-based position of the
/// target and the (approximate) size of the whole list.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VlvResponse {
    pub target_position: i64,
    pub content_count: u64,
    pub result_code: VlvResultCode,
}

impl VlvResponse {
    #[must_use]
    pub const fn success(target_position: i64, content_count: u64) -> Self {
        Self {
            target_position,
            content_count,
            result_code: VlvResultCode::Success,
        }
    }
}

///
/// VlvResult
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VlvResult {
    /// Selected entry IDs in sort order.
    pub ids: Vec<EntryID>,

    /// Absent when the search carried no VLV request.
    pub response: Option<VlvResponse>,
}
