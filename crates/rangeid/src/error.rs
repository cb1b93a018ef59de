//! Error types for ID allocation, consumption sync, and pool management.
//!
//! Every failure carries a stable machine-readable [`Error::kind`] so that the
//! surrounding dispatch layer can map it to a transport status without
//! matching on message text.
//!
//! ## Error Classes
//! - Validation: `InvalidQuantity`, `InvalidRange`, `InvalidIdentifier`.
//!   Rejected before any store access and never retried.
//! - Transient: `ConcurrencyExhausted`, `Conflict`, `Storage`. Safe to retry
//!   with the same payload because no partial write occurs.
//! - Precondition: `AlreadyPooled`, `DeleteNotPermitted`, `RangeConflict`,
//!   `NotFound`.
//!
//! Note that running out of free identifiers is *not* an error; it is reported
//! as a successful allocation with `available: false`.

use crate::ObjectType;

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors that `rangeid` can produce.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The requested quantity was zero or negative.
    #[error("Invalid quantity: {quantity} (must be a positive integer)")]
    InvalidQuantity { quantity: i64 },

    /// A declared or requested range was malformed, overlapping, or outside
    /// the declared ranges.
    #[error("Invalid range: {reason}")]
    InvalidRange { reason: String },

    /// An app or pool identifier failed validation.
    #[error("Invalid identifier {value:?}: {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    /// The optimistic update loop gave up before a write succeeded.
    #[error("Concurrency exhausted for {key} after {attempts} attempt(s)")]
    ConcurrencyExhausted { key: String, attempts: u32 },

    /// The app already belongs to a different pool.
    #[error("App {app_id} already belongs to pool {pool_id}")]
    AlreadyPooled { app_id: String, pool_id: String },

    /// The delete precondition did not hold.
    #[error("Delete not permitted for {key}: {reason}")]
    DeleteNotPermitted { key: String, reason: &'static str },

    /// The app, pool, or membership does not exist.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A range declaration would strand already-consumed identifiers.
    #[error("Ranges exclude {} consumed {object_type} identifier(s): {ids:?}", ids.len())]
    RangeConflict { object_type: ObjectType, ids: Vec<u64> },

    /// The document changed between read and write.
    #[error("Version conflict on {key}")]
    Conflict { key: String },

    /// A document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store failed.
    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl Error {
    /// Stable machine-readable name of this error.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidQuantity { .. } => "InvalidQuantity",
            Self::InvalidRange { .. } => "InvalidRange",
            Self::InvalidIdentifier { .. } => "InvalidIdentifier",
            Self::ConcurrencyExhausted { .. } => "ConcurrencyExhausted",
            Self::AlreadyPooled { .. } => "AlreadyPooled",
            Self::DeleteNotPermitted { .. } => "DeleteNotPermitted",
            Self::NotFound { .. } => "NotFound",
            Self::RangeConflict { .. } => "RangeConflict",
            Self::Conflict { .. } => "Conflict",
            Self::Serialization(_) => "Serialization",
            Self::Storage { .. } => "Storage",
        }
    }

    /// Returns `true` when retrying the whole operation with the same payload
    /// may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyExhausted { .. } | Self::Conflict { .. } | Self::Storage { .. }
        )
    }

    pub(crate) fn invalid_range(reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}
