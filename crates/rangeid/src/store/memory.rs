//! In-memory document store.
//!
//! [`MemoryStore`] keeps documents in a [`BTreeMap`] behind a
//! [`parking_lot::RwLock`], which gives ordered listing for free and makes
//! each version check + write a single critical section.
//!
//! # Limitations
//!
//! - Documents are not persisted; all data is lost when the process exits
//! - No replication; a single process is the only writer

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::Arc,
};

use parking_lot::RwLock;
use serde_json::Value;

use crate::{
    Error, Result, SystemClock, TimeSource,
    store::{DocumentEntry, DocumentKey, DocumentMetadata, DocumentStore, Page, Version, Versioned},
};

#[derive(Clone, Debug)]
struct Slot {
    document: Value,
    metadata: DocumentMetadata,
}

/// In-memory [`DocumentStore`].
///
/// `MemoryStore` is cheaply cloneable via [`Arc`]. All clones share the same
/// documents.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<DocumentKey, Slot>>>,
    clock: SystemClock,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl DocumentStore for MemoryStore {
    async fn read(&self, key: &DocumentKey) -> Result<Option<Versioned>> {
        Ok(self.data.read().get(key).map(|slot| Versioned {
            document: slot.document.clone(),
            metadata: slot.metadata,
        }))
    }

    async fn write(
        &self,
        key: &DocumentKey,
        expected: Option<Version>,
        document: Value,
    ) -> Result<Version> {
        let mut guard = self.data.write();
        let current = guard.get(key).map(|slot| slot.metadata.version);
        if current != expected {
            return Err(Error::Conflict {
                key: key.to_string(),
            });
        }

        let version = Version(current.map_or(1, |v| v.0 + 1));
        guard.insert(
            key.clone(),
            Slot {
                document,
                metadata: DocumentMetadata {
                    version,
                    modified: self.clock.current_millis(),
                },
            },
        );
        Ok(version)
    }

    async fn read_all(&self, token: Option<&str>, limit: usize) -> Result<Page> {
        let limit = limit.max(1);
        let guard = self.data.read();
        let lower = match token {
            Some(token) => Bound::Excluded(DocumentKey::from_raw(token)),
            None => Bound::Unbounded,
        };

        let mut iter = guard.range((lower, Bound::Unbounded));
        let entries: Vec<DocumentEntry> = iter
            .by_ref()
            .take(limit)
            .map(|(key, slot)| DocumentEntry {
                key: key.clone(),
                document: slot.document.clone(),
                metadata: slot.metadata,
            })
            .collect();

        let continuation_token = match (iter.next(), entries.last()) {
            (Some(_), Some(last)) => Some(last.key.to_string()),
            _ => None,
        };

        Ok(Page {
            entries,
            continuation_token,
        })
    }

    async fn delete<P>(&self, key: &DocumentKey, can_delete: P) -> Result<()>
    where
        P: FnOnce(&Value) -> core::result::Result<(), &'static str> + Send,
    {
        let mut guard = self.data.write();
        let Some(slot) = guard.get(key) else {
            return Err(Error::not_found(format!("document {key}")));
        };
        can_delete(&slot.document).map_err(|reason| Error::DeleteNotPermitted {
            key: key.to_string(),
            reason,
        })?;
        guard.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    fn key(raw: &str) -> DocumentKey {
        DocumentKey::from_raw(raw)
    }

    #[tokio::test]
    async fn write_requires_matching_version() {
        let store = MemoryStore::new();
        let k = key("app/a");

        let v1 = store.write(&k, None, json!({ "n": 1 })).await.unwrap();
        assert_eq!(v1, Version(1));

        // Create-if-absent on an existing key conflicts.
        let err = store.write(&k, None, json!({ "n": 2 })).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let v2 = store.write(&k, Some(v1), json!({ "n": 2 })).await.unwrap();
        assert_eq!(v2, Version(2));

        // Stale version conflicts and leaves the document untouched.
        let err = store.write(&k, Some(v1), json!({ "n": 3 })).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        let current = store.read(&k).await.unwrap().unwrap();
        assert_eq!(current.document, json!({ "n": 2 }));
        assert_eq!(current.metadata.version, v2);
    }

    #[tokio::test]
    async fn read_absent_is_none() {
        let store = MemoryStore::new();
        assert!(store.read(&key("app/missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pagination_visits_every_document_once() {
        let store = MemoryStore::new();
        for i in 0..23 {
            store
                .write(&key(&format!("app/{i:03}")), None, json!(i))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = store.read_all(token.as_deref(), 5).await.unwrap();
            pages += 1;
            assert!(page.entries.len() <= 5);
            seen.extend(page.entries.into_iter().map(|e| e.key));
            token = page.continuation_token;
            if token.is_none() {
                break;
            }
        }

        assert_eq!(pages, 5);
        assert_eq!(seen.len(), 23);
        assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 23);
    }

    #[tokio::test]
    async fn exact_page_boundary_ends_with_null_token() {
        let store = MemoryStore::new();
        for i in 0..4 {
            store.write(&key(&format!("k{i}")), None, json!(i)).await.unwrap();
        }
        let first = store.read_all(None, 4).await.unwrap();
        assert_eq!(first.entries.len(), 4);
        assert_eq!(first.continuation_token, None);

        let empty = MemoryStore::new().read_all(None, 10).await.unwrap();
        assert!(empty.entries.is_empty());
        assert_eq!(empty.continuation_token, None);
    }

    #[tokio::test]
    async fn delete_respects_predicate() {
        let store = MemoryStore::new();
        let k = key("pool/p");
        store.write(&k, None, json!({ "members": ["a"] })).await.unwrap();

        let err = store
            .delete(&k, |doc| {
                if doc["members"].as_array().is_some_and(|m| !m.is_empty()) {
                    Err("pool has members")
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeleteNotPermitted { .. }));
        assert_eq!(store.len(), 1);

        store.delete(&k, |_| Ok(())).await.unwrap();
        assert!(store.is_empty());

        let err = store.delete(&k, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
