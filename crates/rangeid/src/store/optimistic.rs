//! The optimistic read-mutate-write loop.
//!
//! [`optimistic_update`] is the only way this crate mutates a document. Each
//! attempt reads a fresh copy, hands it to a pure mutator, and writes the
//! result back conditioned on the version read. A version conflict means a
//! concurrent writer committed first; the loop backs off and tries again
//! against the new base.
//!
//! # Backoff Strategy
//!
//! - Base delay doubles with each attempt: `initial_backoff * 2^(attempt - 1)`
//! - Delay is capped at `max_backoff` and at the time left before `timeout`
//! - Random jitter of 0-50% of the computed delay is added so racing callers
//!   spread out

use core::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::time::{Instant, sleep, timeout_at};

use crate::{
    Error, Result,
    store::{DocumentKey, DocumentStore},
};

/// Bounds for the optimistic retry loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdatePolicy {
    /// Maximum read-mutate-write cycles before giving up.
    pub max_attempts: u32,
    /// Wall-clock bound for the whole loop, including store calls.
    pub timeout: Duration,
    /// Delay after the first conflict.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay (before jitter).
    pub max_backoff: Duration,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 64,
            timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(250),
        }
    }
}

impl UpdatePolicy {
    /// Delay to wait after the `attempt`-th failed cycle (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let base = self
            .initial_backoff
            .saturating_mul(1 << exp)
            .min(self.max_backoff);
        let jitter_cap = base.as_millis() as u64 / 2;
        let jitter = if jitter_cap > 0 {
            rand::rng().random_range(0..=jitter_cap)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }
}

/// What a mutator decided for one attempt.
#[derive(Debug)]
pub enum Update<T, R> {
    /// Write `document` and return `output` once the write commits.
    Commit { document: T, output: R },
    /// Leave the document untouched and return `output`.
    Skip(R),
}

/// Result of a completed optimistic update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Updated<R> {
    pub output: R,
    /// Read-mutate-write cycles used, including the successful one.
    pub attempts: u32,
    /// `false` when the mutator chose [`Update::Skip`].
    pub committed: bool,
}

/// Reads and decodes the document at `key`.
///
/// # Errors
///
/// Propagates store failures and [`Error::Serialization`] for documents that
/// do not decode as `T`.
pub async fn read_document<S, T>(store: &S, key: &DocumentKey) -> Result<Option<T>>
where
    S: DocumentStore,
    T: DeserializeOwned,
{
    store
        .read(key)
        .await?
        .map(|versioned| serde_json::from_value(versioned.document))
        .transpose()
        .map_err(Error::from)
}

/// Runs `mutator` against the document at `key` until its result commits.
///
/// The mutator receives the freshly read document (`None` if absent) and may
/// be invoked several times per call, so it must not touch external state.
/// Errors it returns abort the loop immediately without writing.
///
/// # Errors
///
/// - [`Error::ConcurrencyExhausted`] when `policy.max_attempts` cycles all
///   conflicted or `policy.timeout` elapsed first.
/// - Any error returned by the mutator or the store (other than conflicts).
pub async fn optimistic_update<S, T, R, F>(
    store: &S,
    key: &DocumentKey,
    policy: &UpdatePolicy,
    mutator: F,
) -> Result<Updated<R>>
where
    S: DocumentStore,
    T: Serialize + DeserializeOwned + Send,
    R: Send,
    F: FnMut(Option<T>) -> Result<Update<T, R>> + Send,
{
    optimistic_update_until(store, key, policy, Instant::now() + policy.timeout, mutator).await
}

/// [`optimistic_update`] bounded by an explicit `deadline` instead of
/// `policy.timeout`, for callers that run several loops under one budget.
///
/// # Errors
///
/// Same as [`optimistic_update`], with `deadline` in place of the timeout.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip(store, key, policy, deadline, mutator), fields(key = %key))
)]
pub async fn optimistic_update_until<S, T, R, F>(
    store: &S,
    key: &DocumentKey,
    policy: &UpdatePolicy,
    deadline: Instant,
    mut mutator: F,
) -> Result<Updated<R>>
where
    S: DocumentStore,
    T: Serialize + DeserializeOwned + Send,
    R: Send,
    F: FnMut(Option<T>) -> Result<Update<T, R>> + Send,
{
    let exhausted = |attempts: u32| Error::ConcurrencyExhausted {
        key: key.to_string(),
        attempts,
    };

    let mut attempts = 0;
    loop {
        attempts += 1;
        if Instant::now() >= deadline {
            return Err(exhausted(attempts));
        }

        let current = timeout_at(deadline, store.read(key))
            .await
            .map_err(|_| exhausted(attempts))??;
        let (version, base) = match current {
            Some(versioned) => (
                Some(versioned.metadata.version),
                Some(serde_json::from_value(versioned.document)?),
            ),
            None => (None, None),
        };

        let (document, output) = match mutator(base)? {
            Update::Skip(output) => {
                return Ok(Updated {
                    output,
                    attempts,
                    committed: false,
                });
            }
            Update::Commit { document, output } => (serde_json::to_value(&document)?, output),
        };

        match timeout_at(deadline, store.write(key, version, document))
            .await
            .map_err(|_| exhausted(attempts))?
        {
            Ok(_) => {
                #[cfg(feature = "tracing")]
                {
                    if attempts > 1 {
                        tracing::debug!(attempts, "update committed after retry");
                    }
                }
                return Ok(Updated {
                    output,
                    attempts,
                    committed: true,
                });
            }
            Err(Error::Conflict { .. }) => {}
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if attempts >= policy.max_attempts || now >= deadline {
            #[cfg(feature = "tracing")]
            tracing::warn!(attempts, "optimistic update gave up");
            return Err(exhausted(attempts));
        }

        let delay = policy.backoff(attempts).min(deadline - now);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            attempts,
            delay_ms = delay.as_millis() as u64,
            "version conflict, retrying after backoff"
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use serde_json::{Value, json};

    use super::*;
    use crate::store::{MemoryStore, Page, Version, Versioned};

    /// Store wrapper that sneaks in a competing write before the first
    /// `conflicts` writes of the caller, forcing version conflicts.
    struct ContendedStore {
        inner: MemoryStore,
        conflicts: AtomicU32,
    }

    impl DocumentStore for ContendedStore {
        async fn read(&self, key: &DocumentKey) -> Result<Option<Versioned>> {
            self.inner.read(key).await
        }

        async fn write(
            &self,
            key: &DocumentKey,
            expected: Option<Version>,
            document: Value,
        ) -> Result<Version> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                let current = self.inner.read(key).await?;
                let (version, mut doc) = match current {
                    Some(v) => (Some(v.metadata.version), v.document),
                    None => (None, json!({ "n": 0 })),
                };
                doc["n"] = json!(doc["n"].as_u64().unwrap_or(0) + 100);
                self.inner.write(key, version, doc).await?;
            }
            self.inner.write(key, expected, document).await
        }

        async fn read_all(&self, token: Option<&str>, limit: usize) -> Result<Page> {
            self.inner.read_all(token, limit).await
        }

        async fn delete<P>(&self, key: &DocumentKey, can_delete: P) -> Result<()>
        where
            P: FnOnce(&Value) -> core::result::Result<(), &'static str> + Send,
        {
            self.inner.delete(key, can_delete).await
        }
    }

    #[derive(Debug, Serialize, serde::Deserialize)]
    struct Counter {
        n: u64,
    }

    fn fast_policy(max_attempts: u32) -> UpdatePolicy {
        UpdatePolicy {
            max_attempts,
            timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn increment(doc: Option<Counter>) -> Result<Update<Counter, u64>> {
        let n = doc.map_or(0, |c| c.n) + 1;
        Ok(Update::Commit {
            document: Counter { n },
            output: n,
        })
    }

    #[tokio::test]
    async fn retries_against_the_newer_base() {
        let store = ContendedStore {
            inner: MemoryStore::new(),
            conflicts: AtomicU32::new(2),
        };
        let key = DocumentKey::from_raw("counter");

        let updated = optimistic_update(&store, &key, &fast_policy(10), increment)
            .await
            .unwrap();

        // Two competing writes of +100 each landed first; ours is based on them.
        assert_eq!(updated.attempts, 3);
        assert!(updated.committed);
        assert_eq!(updated.output, 201);
        let stored: Counter = read_document(&store, &key).await.unwrap().unwrap();
        assert_eq!(stored.n, 201);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let store = ContendedStore {
            inner: MemoryStore::new(),
            conflicts: AtomicU32::new(u32::MAX),
        };
        let key = DocumentKey::from_raw("counter");

        let err = optimistic_update(&store, &key, &fast_policy(4), increment)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConcurrencyExhausted { attempts: 4, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn skip_does_not_write() {
        let store = MemoryStore::new();
        let key = DocumentKey::from_raw("counter");

        let updated = optimistic_update(&store, &key, &fast_policy(3), |_: Option<Counter>| {
            Ok(Update::Skip("nothing to do"))
        })
        .await
        .unwrap();

        assert!(!updated.committed);
        assert_eq!(updated.attempts, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn mutator_errors_abort_without_retry() {
        let store = MemoryStore::new();
        let key = DocumentKey::from_raw("counter");
        let calls = Arc::new(AtomicU32::new(0));

        let seen = Arc::clone(&calls);
        let err = optimistic_update(&store, &key, &fast_policy(3), move |_: Option<Counter>| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err::<Update<Counter, ()>, _>(Error::InvalidQuantity { quantity: 0 })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::InvalidQuantity { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn an_elapsed_deadline_fails_before_touching_the_store() {
        let store = MemoryStore::new();
        let key = DocumentKey::from_raw("counter");
        let deadline = Instant::now();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let err = optimistic_update_until(&store, &key, &fast_policy(3), deadline, increment)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConcurrencyExhausted { attempts: 1, .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn backoff_is_capped_with_bounded_jitter() {
        let policy = UpdatePolicy {
            max_attempts: 10,
            timeout: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        };
        for _ in 0..50 {
            let first = policy.backoff(1);
            assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(15));
            let late = policy.backoff(30);
            assert!(late >= Duration::from_millis(40) && late <= Duration::from_millis(60));
        }
    }
}
