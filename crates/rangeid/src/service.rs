use std::collections::BTreeMap;

use serde::Serialize;
use tokio::time::{Instant, sleep, timeout_at};

use crate::{
    AppId, Error, ObjectType, PoolId, Result, SystemClock, TimeSource,
    engine::{
        AdmitMember, Allocation, AllocationPlan, AllocationRequest, ClaimMembership,
        JoinPoolRequest, Mutation, PoolJoined, PoolLeft, RangesDeclared, RangesPlan,
        ReleaseMembership, RemoveMember, SyncOutcome, SyncPlan, SyncRequest, can_delete,
    },
    record::{Consumption, ConsumptionRecord, Range, validate_ranges},
    store::{
        DocumentKey, DocumentStore, Page, UpdatePolicy, Updated, optimistic_update_until,
        read_document,
    },
};

/// Largest listing page served unless configured otherwise.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 100;

/// An app's record together with the record its operations resolve to.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub app: ConsumptionRecord,
    /// Shared pool record, present when the app is pooled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<ConsumptionRecord>,
    /// Consumed identifiers outside the resolved record's current ranges.
    pub out_of_range: BTreeMap<ObjectType, Vec<u64>>,
}

/// Where an app's allocation and sync traffic lands.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Target {
    App(DocumentKey),
    Pool(DocumentKey, PoolId),
}

/// Allocation, sync, and pool operations over a [`DocumentStore`].
///
/// Every operation resolves `appId` to its target document once, then runs
/// an engine [`Mutation`] against that document under the optimistic update
/// protocol. No document is cached between calls. One [`UpdatePolicy::timeout`]
/// bounds each operation, however many documents or re-resolutions it takes.
///
/// # Example
///
/// ```
/// use rangeid::{AppId, MemoryStore, ObjectIdService, ObjectType, Range, engine::AllocationRequest};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> rangeid::Result<()> {
/// let service = ObjectIdService::new(MemoryStore::new());
/// let app = AppId::new("my-app")?;
/// service
///     .declare_ranges(&app, &[Range::new(50_000, 50_099)], None)
///     .await?;
///
/// let allocation = service
///     .allocate(&AllocationRequest::new(app, ObjectType::Table))
///     .await?;
/// assert_eq!(allocation.ids(), &[50_000]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ObjectIdService<S, T = SystemClock> {
    store: S,
    policy: UpdatePolicy,
    clock: T,
    max_page_size: usize,
}

impl<S> ObjectIdService<S, SystemClock>
where
    S: DocumentStore,
{
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S, T> ObjectIdService<S, T>
where
    S: DocumentStore,
    T: TimeSource + Send + Sync,
{
    /// Creates a service whose log timestamps come from `clock`.
    pub fn with_clock(store: S, clock: T) -> Self {
        Self {
            store,
            policy: UpdatePolicy::default(),
            clock,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &UpdatePolicy {
        &self.policy
    }

    /// Allocates the lowest free identifier(s) for the requested type.
    ///
    /// An exhausted candidate space is a successful response with
    /// `available: false`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidQuantity`] / [`Error::InvalidRange`] before any
    ///   store access.
    /// - [`Error::ConcurrencyExhausted`] when the retry bound is hit.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "debug",
            skip(self, request),
            fields(app_id = %request.app_id, object_type = %request.object_type)
        )
    )]
    pub async fn allocate(&self, request: &AllocationRequest) -> Result<Allocation> {
        let count = request.validate()?;
        let plan = AllocationPlan {
            object_type: request.object_type,
            count,
            from_range: request.from_range.as_ref(),
            user: request.user.as_deref(),
            now: self.clock.current_millis(),
        };

        let updated = self.apply_resolved(&request.app_id, &plan).await?;
        let allocation = plan.respond(updated.output, updated.attempts);

        #[cfg(feature = "tracing")]
        {
            if allocation.available {
                tracing::info!(ids = ?allocation.ids(), attempts = allocation.update_attempts, "allocated");
            } else {
                tracing::info!("no free identifier in candidate space");
            }
        }
        Ok(allocation)
    }

    /// Reconciles client-reported consumption with the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConcurrencyExhausted`] when the retry bound is hit.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "debug",
            skip(self, request),
            fields(app_id = %request.app_id, mode = ?request.mode)
        )
    )]
    pub async fn sync(&self, request: &SyncRequest) -> Result<SyncOutcome> {
        let plan = SyncPlan {
            ids: &request.ids,
            mode: request.mode,
            user: request.user.as_deref(),
            now: self.clock.current_millis(),
        };

        let updated = self.apply_resolved(&request.app_id, &plan).await?;
        Ok(updated.output.respond(updated.committed, updated.attempts))
    }

    /// Replaces the declared ranges of the app's resolved record.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] for inverted or overlapping ranges.
    /// - [`Error::RangeConflict`] when consumed identifiers would fall
    ///   outside the new ranges.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self, ranges, user))
    )]
    pub async fn declare_ranges(
        &self,
        app_id: &AppId,
        ranges: &[Range],
        user: Option<&str>,
    ) -> Result<RangesDeclared> {
        let plan = RangesPlan {
            ranges,
            user,
            now: self.clock.current_millis(),
        };
        plan.validate()?;

        let updated = self.apply_resolved(app_id, &plan).await?;
        Ok(RangesDeclared {
            ranges: updated.output,
            updated: updated.committed,
            update_attempts: updated.attempts,
        })
    }

    /// Joins `request.app_id` to a pool, creating the pool when needed.
    ///
    /// The app record is claimed first; if admitting the app to the pool
    /// record then fails, the claim is undone before the error is returned.
    /// Until the admission commits, the app's traffic waits rather than
    /// reaching a pool that does not yet hold its consumption.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] for malformed request ranges.
    /// - [`Error::AlreadyPooled`] when the app belongs to another pool.
    /// - [`Error::ConcurrencyExhausted`] when the retry bound is hit.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self, request), fields(app_id = %request.app_id))
    )]
    pub async fn join_pool(&self, request: &JoinPoolRequest) -> Result<PoolJoined> {
        validate_ranges(&request.ranges)?;

        let app_id = &request.app_id;
        let pool_id = request.pool_id.clone().unwrap_or_else(PoolId::generate);
        let user = request.user.as_deref();
        let now = self.clock.current_millis();
        let deadline = self.deadline();

        let app_key = DocumentKey::app(app_id);
        let claim = ClaimMembership {
            app_id,
            pool_id: &pool_id,
            user,
            now,
        };
        let claimed = self
            .run(&app_key, app_id.as_str(), &claim, deadline)
            .await?;

        let mut ranges = request.ranges.clone();
        ranges.extend(claimed.output.ranges);
        let admit = AdmitMember {
            app_id,
            ranges: &ranges,
            consumption: &claimed.output.consumption,
            user,
            now,
        };

        let pool_key = DocumentKey::pool(&pool_id);
        let admitted = match self
            .run(&pool_key, pool_id.as_str(), &admit, deadline)
            .await
        {
            Ok(admitted) => admitted,
            Err(e) => {
                if claimed.committed {
                    // The pool never served the app, so there is nothing to hand back.
                    let undo = ReleaseMembership {
                        pool_id: &pool_id,
                        consumption: &Consumption::new(),
                        user,
                        now,
                    };
                    let undone = self
                        .run(&app_key, app_id.as_str(), &undo, self.deadline())
                        .await;
                    if let Err(_undo_err) = undone {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            pool_id = %pool_id,
                            error = %_undo_err,
                            "failed to undo pool claim"
                        );
                    }
                }
                return Err(e);
            }
        };

        #[cfg(feature = "tracing")]
        tracing::info!(pool_id = %pool_id, "joined pool");

        let (members, ranges) = admitted.output;
        Ok(PoolJoined {
            pool_id,
            members,
            ranges,
            update_attempts: claimed.attempts + admitted.attempts,
        })
    }

    /// Removes the app from its pool.
    ///
    /// The pool keeps its consumption, and the app record takes a union of it
    /// so identifiers the app drew while pooled stay taken once it is
    /// standalone again. Retrying after a partial failure completes the leave.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the app is unknown or not pooled.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self, user))
    )]
    pub async fn leave_pool(&self, app_id: &AppId, user: Option<&str>) -> Result<PoolLeft> {
        let app_key = DocumentKey::app(app_id);
        let record: Option<ConsumptionRecord> = read_document(&self.store, &app_key).await?;
        let pool_id = record
            .and_then(|record| record.pool_id)
            .ok_or_else(|| Error::not_found(format!("pool membership of app {app_id}")))?;
        let now = self.clock.current_millis();
        let deadline = self.deadline();

        let remove = RemoveMember { app_id, user, now };
        let removed = self
            .run(&DocumentKey::pool(&pool_id), pool_id.as_str(), &remove, deadline)
            .await?;

        let release = ReleaseMembership {
            pool_id: &pool_id,
            consumption: &removed.output.consumption,
            user,
            now,
        };
        let released = self
            .run(&app_key, app_id.as_str(), &release, deadline)
            .await?;

        Ok(PoolLeft {
            pool_id,
            update_attempts: removed.attempts + released.attempts,
        })
    }

    /// Reads the app's record and, when pooled, the shared pool record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the app has no record.
    pub async fn record(&self, app_id: &AppId) -> Result<RecordView> {
        let app: ConsumptionRecord = read_document(&self.store, &DocumentKey::app(app_id))
            .await?
            .ok_or_else(|| Error::not_found(format!("app {app_id}")))?;

        let pool: Option<ConsumptionRecord> = match &app.pool_id {
            Some(pool_id) => read_document(&self.store, &DocumentKey::pool(pool_id)).await?,
            None => None,
        };
        let out_of_range = pool.as_ref().unwrap_or(&app).out_of_range();

        Ok(RecordView {
            app,
            pool,
            out_of_range,
        })
    }

    /// Deletes a standalone app record.
    ///
    /// # Errors
    ///
    /// - [`Error::DeleteNotPermitted`] while the app is pooled.
    /// - [`Error::NotFound`] if the app has no record.
    pub async fn delete_app(&self, app_id: &AppId) -> Result<()> {
        self.store.delete(&DocumentKey::app(app_id), can_delete).await
    }

    /// Deletes a pool record that no longer has members.
    ///
    /// # Errors
    ///
    /// - [`Error::DeleteNotPermitted`] while the pool has members.
    /// - [`Error::NotFound`] if the pool has no record.
    pub async fn delete_pool(&self, pool_id: &PoolId) -> Result<()> {
        self.store.delete(&DocumentKey::pool(pool_id), can_delete).await
    }

    /// Returns one page of all stored documents in key order.
    ///
    /// `limit` is clamped to `1..=max_page_size`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list(&self, token: Option<&str>, limit: usize) -> Result<Page> {
        self.store
            .read_all(token, limit.clamp(1, self.max_page_size))
            .await
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.policy.timeout
    }

    /// Resolves `app_id` to its target document from a fresh read.
    async fn resolve(&self, app_id: &AppId) -> Result<Target> {
        let key = DocumentKey::app(app_id);
        let record: Option<ConsumptionRecord> = read_document(&self.store, &key).await?;
        Ok(match record.and_then(|record| record.pool_id) {
            Some(pool_id) => Target::Pool(DocumentKey::pool(&pool_id), pool_id),
            None => Target::App(key),
        })
    }

    /// Runs `plan` against the document `app_id` currently resolves to.
    ///
    /// The target is re-resolved, after a backoff, when it no longer matches
    /// the app's membership at write time: a standalone record that became
    /// pooled, or a pool that does not list the app (a join or leave is
    /// between its two writes). Neither document is written in that case.
    async fn apply_resolved<M>(&self, app_id: &AppId, plan: &M) -> Result<Updated<M::Output>>
    where
        M: Mutation + Sync,
    {
        let deadline = self.deadline();
        let app_key = DocumentKey::app(app_id);
        let exhausted = |attempts: u32| Error::ConcurrencyExhausted {
            key: app_key.to_string(),
            attempts,
        };

        let mut spent = 0;
        loop {
            let target = timeout_at(deadline, self.resolve(app_id))
                .await
                .map_err(|_| exhausted(spent + 1))??;
            let (key, owner) = match &target {
                Target::App(key) => (key, app_id.as_str()),
                Target::Pool(key, pool_id) => (key, pool_id.as_str()),
            };

            let result = optimistic_update_until(
                &self.store,
                key,
                &self.policy,
                deadline,
                |record: Option<ConsumptionRecord>| {
                    let stale = match &target {
                        Target::App(_) => record.as_ref().is_some_and(|r| r.pool_id.is_some()),
                        Target::Pool(..) => {
                            !record.as_ref().is_some_and(|r| r.members.contains(app_id))
                        }
                    };
                    if stale {
                        return Err(Error::Conflict {
                            key: key.to_string(),
                        });
                    }
                    plan.apply(owner, record)
                },
            )
            .await;

            match result {
                Ok(mut updated) => {
                    updated.attempts += spent;
                    return Ok(updated);
                }
                Err(Error::Conflict { .. }) => {
                    spent += 1;
                    let now = Instant::now();
                    if spent >= self.policy.max_attempts || now >= deadline {
                        return Err(exhausted(spent));
                    }
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%key, "pool membership changed mid-update, re-resolving");
                    sleep(self.policy.backoff(spent).min(deadline - now)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run<M>(
        &self,
        key: &DocumentKey,
        owner: &str,
        mutation: &M,
        deadline: Instant,
    ) -> Result<Updated<M::Output>>
    where
        M: Mutation + Sync,
    {
        optimistic_update_until(&self.store, key, &self.policy, deadline, |record| {
            mutation.apply(owner, record)
        })
        .await
    }
}
