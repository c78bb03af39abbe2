use crate::db::{storage::StorageError, vlv::VlvResponse};
use dirdb_config::ConfigError;
use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable classification.
/// Index inconsistencies are never reported through this type; they demote
/// trust instead.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    /// The variant (if present) must correspond to `origin`.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct a corruption error for a specific origin.
    pub(crate) fn corruption(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Corruption, origin, message)
    }

    /// Construct an index-origin invariant violation.
    pub(crate) fn index_invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, ErrorOrigin::Index, message)
    }

    /// Construct a vlv-origin invariant violation.
    pub(crate) fn vlv_invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, ErrorOrigin::Vlv, message)
    }

    /// Construct an index-origin unsupported error.
    pub(crate) fn index_unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, ErrorOrigin::Index, message)
    }

    /// Reject a VLV request, carrying the response the client should see.
    pub(crate) fn vlv_rejected(message: impl Into<String>, response: VlvResponse) -> Self {
        Self {
            class: ErrorClass::InvalidRequest,
            origin: ErrorOrigin::Vlv,
            message: message.into(),
            detail: Some(ErrorDetail::Vlv(response)),
        }
    }

    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self.class, ErrorClass::Corruption)
    }

    /// The VLV response attached to a rejected VLV request, if any.
    #[must_use]
    pub const fn vlv_response(&self) -> Option<&VlvResponse> {
        match &self.detail {
            Some(ErrorDetail::Vlv(response)) => Some(response),
            _ => None,
        }
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

impl From<StorageError> for InternalError {
    fn from(err: StorageError) -> Self {
        Self::new(ErrorClass::Storage, ErrorOrigin::Storage, err.to_string())
    }
}

impl From<ConfigError> for InternalError {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorClass::Config, ErrorOrigin::Config, err.to_string())
    }
}

///
/// ErrorDetail
///
/// Structured, origin-specific error detail carried by [`InternalError`].
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("vlv response: {0:?}")]
    Vlv(VlvResponse),
}

///
/// ErrorClass
/// Error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// The storage engine failed; the caller aborts or retries the transaction.
    Storage,
    /// Stored bytes could not be decoded.
    Corruption,
    InvariantViolation,
    Unsupported,
    /// The request itself is malformed (for example a negative VLV offset).
    InvalidRequest,
    Config,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Storage => "storage",
            Self::Corruption => "corruption",
            Self::InvariantViolation => "invariant_violation",
            Self::Unsupported => "unsupported",
            Self::InvalidRequest => "invalid_request",
            Self::Config => "config",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Storage,
    IdSet,
    Index,
    Vlv,
    State,
    Config,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Storage => "storage",
            Self::IdSet => "id_set",
            Self::Index => "index",
            Self::Vlv => "vlv",
            Self::State => "state",
            Self::Config => "config",
        };
        write!(f, "{label}")
    }
}
