use core::{fmt, future::Future};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, store::DocumentKey};

/// Opaque per-document version token used for conflict detection.
///
/// Callers only ever compare it for equality with the version they read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Store-maintained facts about a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub version: Version,
    /// Last write time, milliseconds since the Unix epoch.
    pub modified: u64,
}

/// A document together with the version it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned {
    pub document: Value,
    pub metadata: DocumentMetadata,
}

/// One entry of a [`Page`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEntry {
    pub key: DocumentKey,
    pub document: Value,
    pub metadata: DocumentMetadata,
}

/// One page of a bulk listing.
///
/// Callers loop, passing `continuation_token` back, until it is `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub entries: Vec<DocumentEntry>,
    pub continuation_token: Option<String>,
}

/// Abstract key-addressed JSON document store.
///
/// Implementations must be safe for concurrent use and must never cache
/// documents across calls: conflict detection relies on every read observing
/// the latest committed version.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`read`](DocumentStore::read) | Current document, or `None` if absent |
/// | [`write`](DocumentStore::write) | Version-checked write |
/// | [`read_all`](DocumentStore::read_all) | One page of a key-ordered scan |
/// | [`delete`](DocumentStore::delete) | Predicate-guarded removal |
pub trait DocumentStore: Send + Sync {
    /// Reads the current document at `key`.
    fn read(&self, key: &DocumentKey) -> impl Future<Output = Result<Option<Versioned>>> + Send;

    /// Writes `document` at `key` only if the stored version still equals
    /// `expected` (`None` meaning "must be absent").
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`](crate::Error::Conflict) when the stored
    /// version differs from `expected`.
    fn write(
        &self,
        key: &DocumentKey,
        expected: Option<Version>,
        document: Value,
    ) -> impl Future<Output = Result<Version>> + Send;

    /// Returns up to `limit` documents with keys after `token`, in key order.
    ///
    /// The returned continuation token is `None` once the listing is
    /// exhausted.
    fn read_all(
        &self,
        token: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Page>> + Send;

    /// Removes the document at `key` if `can_delete` accepts it.
    ///
    /// The predicate is evaluated atomically with the removal and returns a
    /// reason when the delete must be refused.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`](crate::Error::NotFound) if no document exists.
    /// - [`Error::DeleteNotPermitted`](crate::Error::DeleteNotPermitted) if
    ///   the predicate refuses.
    fn delete<P>(&self, key: &DocumentKey, can_delete: P) -> impl Future<Output = Result<()>> + Send
    where
        P: FnOnce(&Value) -> core::result::Result<(), &'static str> + Send;
}
