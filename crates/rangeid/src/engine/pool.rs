//! Pool membership mutations.
//!
//! Joining touches two documents: the app record (which gains a `poolId`
//! back-reference) and the pool record (which gains the member, its ranges,
//! and its consumption). Each side is its own [`Mutation`]; the service
//! commits the app claim first so the app is never admitted to two pools,
//! then admits it to the pool record.
//!
//! A pool only serves an app listed in its `members`, so traffic arriving
//! between the two writes of a join or a leave waits for the second one.
//! Leaving hands the pool's consumption back to the app record.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    AppId, Error, PoolId, Result,
    engine::Mutation,
    record::{Consumption, ConsumptionRecord, EventType, Range, coalesce},
    store::Update,
};

/// A request to join (or create) a pool.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPoolRequest {
    pub app_id: AppId,
    /// Pool to join; a new pool is created when omitted or absent.
    #[serde(default)]
    pub pool_id: Option<PoolId>,
    #[serde(default)]
    pub ranges: Vec<Range>,
    #[serde(default)]
    pub user: Option<String>,
}

/// Response of a pool join.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolJoined {
    pub pool_id: PoolId,
    pub members: Vec<AppId>,
    pub ranges: Vec<Range>,
    pub update_attempts: u32,
}

/// Response of a pool leave.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolLeft {
    pub pool_id: PoolId,
    pub update_attempts: u32,
}

/// The app record's own state, carried into the pool by [`AdmitMember`].
///
/// The record is frozen while pooled, so a repeated claim of the same pool
/// returns the state it had when it first joined.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Claim {
    pub ranges: Vec<Range>,
    pub consumption: Consumption,
}

/// Outcome of [`RemoveMember`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Removal {
    /// `false` when the app was not a member (or the pool is gone).
    pub removed: bool,
    /// The pool's consumption once the app no longer draws from it.
    pub consumption: Consumption,
}

/// Sets the app record's pool back-reference.
#[derive(Clone, Debug)]
pub struct ClaimMembership<'a> {
    pub app_id: &'a AppId,
    pub pool_id: &'a PoolId,
    pub user: Option<&'a str>,
    pub now: u64,
}

impl Mutation for ClaimMembership<'_> {
    type Output = Claim;

    fn apply(
        &self,
        owner: &str,
        record: Option<ConsumptionRecord>,
    ) -> Result<Update<ConsumptionRecord, Claim>> {
        let mut record = record.unwrap_or_else(|| ConsumptionRecord::new(owner));
        let claim = Claim {
            ranges: record.ranges.clone(),
            consumption: record.consumption.clone(),
        };
        match &record.pool_id {
            Some(current) if current == self.pool_id => return Ok(Update::Skip(claim)),
            Some(current) => {
                return Err(Error::AlreadyPooled {
                    app_id: self.app_id.to_string(),
                    pool_id: current.to_string(),
                });
            }
            None => {}
        }

        record.pool_id = Some(self.pool_id.clone());
        record.append_log(
            EventType::PoolJoined,
            self.now,
            self.user,
            json!({ "poolId": self.pool_id }),
        );

        Ok(Update::Commit {
            output: claim,
            document: record,
        })
    }
}

/// Adds a member to the pool record, creating the pool if needed.
///
/// The member's ranges are coalesced into the pool's. Its consumption is
/// union-merged when it is newly admitted, so identifiers it already used
/// stay taken.
#[derive(Clone, Debug)]
pub struct AdmitMember<'a> {
    pub app_id: &'a AppId,
    pub ranges: &'a [Range],
    pub consumption: &'a Consumption,
    pub user: Option<&'a str>,
    pub now: u64,
}

impl Mutation for AdmitMember<'_> {
    type Output = (Vec<AppId>, Vec<Range>);

    fn apply(
        &self,
        owner: &str,
        record: Option<ConsumptionRecord>,
    ) -> Result<Update<ConsumptionRecord, Self::Output>> {
        let mut record = record.unwrap_or_else(|| ConsumptionRecord::new(owner));

        let joined = record.members.insert(self.app_id.clone());
        let ranges = coalesce(record.ranges.iter().chain(self.ranges).copied());
        let ranges_changed = ranges != record.ranges;
        record.ranges = ranges;

        let merged = if joined {
            merge_consumption(&mut record, self.consumption)
        } else {
            0
        };

        let output = (
            record.members.iter().cloned().collect(),
            record.ranges.clone(),
        );
        if !joined && !ranges_changed && merged == 0 {
            return Ok(Update::Skip(output));
        }

        record.append_log(
            EventType::MemberJoined,
            self.now,
            self.user,
            json!({ "appId": self.app_id, "ranges": self.ranges, "merged": merged }),
        );
        Ok(Update::Commit {
            document: record,
            output,
        })
    }
}

/// Clears the app record's back-reference to `pool_id` and union-merges
/// `consumption` (the pool's, on a leave) into the record.
///
/// Only a membership of that exact pool is cleared, so a leave (or the undo
/// of a claim whose admission failed) never clobbers a newer membership.
#[derive(Clone, Debug)]
pub struct ReleaseMembership<'a> {
    pub pool_id: &'a PoolId,
    pub consumption: &'a Consumption,
    pub user: Option<&'a str>,
    pub now: u64,
}

impl Mutation for ReleaseMembership<'_> {
    type Output = bool;

    fn apply(
        &self,
        _owner: &str,
        record: Option<ConsumptionRecord>,
    ) -> Result<Update<ConsumptionRecord, bool>> {
        let Some(mut record) = record else {
            return Ok(Update::Skip(false));
        };
        if record.pool_id.as_ref() != Some(self.pool_id) {
            return Ok(Update::Skip(false));
        }

        record.pool_id = None;
        let merged = merge_consumption(&mut record, self.consumption);
        record.append_log(
            EventType::PoolLeft,
            self.now,
            self.user,
            json!({ "poolId": self.pool_id, "merged": merged }),
        );
        Ok(Update::Commit {
            document: record,
            output: true,
        })
    }
}

/// Removes a member from the pool record. Consumption stays with the pool.
#[derive(Clone, Debug)]
pub struct RemoveMember<'a> {
    pub app_id: &'a AppId,
    pub user: Option<&'a str>,
    pub now: u64,
}

impl Mutation for RemoveMember<'_> {
    type Output = Removal;

    fn apply(
        &self,
        _owner: &str,
        record: Option<ConsumptionRecord>,
    ) -> Result<Update<ConsumptionRecord, Removal>> {
        let Some(mut record) = record else {
            return Ok(Update::Skip(Removal::default()));
        };
        let removed = record.members.remove(self.app_id);
        let output = Removal {
            removed,
            consumption: record.consumption.clone(),
        };
        if !removed {
            return Ok(Update::Skip(output));
        }

        record.append_log(
            EventType::MemberLeft,
            self.now,
            self.user,
            json!({ "appId": self.app_id }),
        );
        Ok(Update::Commit {
            document: record,
            output,
        })
    }
}

/// Union-merges `consumption` into `record`, returning how many ids were new.
fn merge_consumption(record: &mut ConsumptionRecord, consumption: &Consumption) -> usize {
    let mut merged = 0;
    for (object_type, ids) in consumption {
        let stored = record.consumption.entry(*object_type).or_default();
        let before = stored.len();
        stored.extend(ids.iter().copied());
        merged += stored.len() - before;
    }
    record.consumption.retain(|_, ids| !ids.is_empty());
    merged
}

/// `canDelete` precondition for app and pool documents.
///
/// # Errors
///
/// Refuses pooled app records and pool records that still have members.
pub fn can_delete(document: &Value) -> core::result::Result<(), &'static str> {
    if document.get("poolId").is_some_and(|v| !v.is_null()) {
        return Err("app belongs to a pool; leave it first");
    }
    if document
        .get("members")
        .and_then(Value::as_array)
        .is_some_and(|members| !members.is_empty())
    {
        return Err("pool still has members");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::ObjectType;

    fn app(id: &str) -> AppId {
        AppId::new(id).unwrap()
    }

    fn pool(id: &str) -> PoolId {
        PoolId::new(id).unwrap()
    }

    fn commit<T, R>(update: Update<T, R>) -> (T, R) {
        match update {
            Update::Commit { document, output } => (document, output),
            Update::Skip(_) => panic!("expected a commit"),
        }
    }

    #[test]
    fn claim_carries_app_state_and_logs() {
        let app_id = app("a");
        let pool_id = pool("p");
        let mut record = ConsumptionRecord::new("a");
        record.ranges = vec![Range::new(1, 10)];
        record
            .consumption
            .insert(ObjectType::Table, BTreeSet::from([1, 2]));

        let claim = ClaimMembership {
            app_id: &app_id,
            pool_id: &pool_id,
            user: Some("alice"),
            now: 7,
        };
        let (record, output) = commit(claim.apply("a", Some(record)).unwrap());

        assert_eq!(record.pool_id, Some(pool_id));
        assert_eq!(record.log.len(), 1);
        assert_eq!(record.log[0].event_type, EventType::PoolJoined);
        assert_eq!(record.log[0].user.as_deref(), Some("alice"));
        assert_eq!(
            output,
            Claim {
                ranges: vec![Range::new(1, 10)],
                consumption: record.consumption.clone(),
            }
        );
    }

    #[test]
    fn claim_is_idempotent_and_exclusive() {
        let app_id = app("a");
        let mut record = ConsumptionRecord::new("a");
        record.pool_id = Some(pool("p"));
        record
            .consumption
            .insert(ObjectType::Table, BTreeSet::from([4]));

        let same = ClaimMembership {
            app_id: &app_id,
            pool_id: &pool("p"),
            user: None,
            now: 0,
        };
        // A repeated claim still reports the frozen pre-join state.
        match same.apply("a", Some(record.clone())).unwrap() {
            Update::Skip(claim) => assert_eq!(claim.consumption, record.consumption),
            Update::Commit { .. } => panic!("expected a skip"),
        }

        let other = pool("q");
        let different = ClaimMembership {
            pool_id: &other,
            ..same
        };
        let err = different.apply("a", Some(record)).unwrap_err();
        assert!(matches!(err, Error::AlreadyPooled { pool_id, .. } if pool_id == "p"));
    }

    #[test]
    fn admit_coalesces_ranges_and_merges_consumption() {
        let mut existing = ConsumptionRecord::new("p");
        existing.members.insert(app("a"));
        existing.ranges = vec![Range::new(1, 10)];
        existing
            .consumption
            .insert(ObjectType::Table, BTreeSet::from([1, 2]));

        let app_id = app("b");
        let consumption = Consumption::from([(ObjectType::Table, BTreeSet::from([2, 3]))]);
        let admit = AdmitMember {
            app_id: &app_id,
            ranges: &[Range::new(11, 20), Range::new(30, 40)],
            consumption: &consumption,
            user: None,
            now: 0,
        };
        let (record, (members, ranges)) = commit(admit.apply("p", Some(existing)).unwrap());

        assert_eq!(members, vec![app("a"), app("b")]);
        assert_eq!(ranges, vec![Range::new(1, 20), Range::new(30, 40)]);
        assert_eq!(
            record.consumed(&ObjectType::Table),
            Some(&BTreeSet::from([1, 2, 3]))
        );
        assert_eq!(record.log[0].data["merged"], json!(1));
    }

    #[test]
    fn admit_creates_pool_and_skips_repeat() {
        let app_id = app("a");
        let consumption = Consumption::new();
        let admit = AdmitMember {
            app_id: &app_id,
            ranges: &[Range::new(1, 5)],
            consumption: &consumption,
            user: None,
            now: 0,
        };
        let (record, _) = commit(admit.apply("p", None).unwrap());
        assert_eq!(record.app_id, "p");
        assert_eq!(record.members, BTreeSet::from([app("a")]));

        assert!(matches!(
            admit.apply("p", Some(record)).unwrap(),
            Update::Skip(_)
        ));
    }

    #[test]
    fn admit_merges_consumption_only_for_new_members() {
        let mut existing = ConsumptionRecord::new("p");
        existing.members.insert(app("a"));
        existing.ranges = vec![Range::new(1, 10)];

        let app_id = app("a");
        let consumption = Consumption::from([(ObjectType::Table, BTreeSet::from([3]))]);
        let admit = AdmitMember {
            app_id: &app_id,
            ranges: &[],
            consumption: &consumption,
            user: None,
            now: 0,
        };
        assert!(matches!(
            admit.apply("p", Some(existing.clone())).unwrap(),
            Update::Skip(_)
        ));

        existing.members.clear();
        let (record, _) = commit(admit.apply("p", Some(existing)).unwrap());
        assert_eq!(record.consumed(&ObjectType::Table), Some(&BTreeSet::from([3])));
    }

    #[test]
    fn release_only_clears_the_named_pool() {
        let mut record = ConsumptionRecord::new("a");
        record.pool_id = Some(pool("p"));
        record
            .consumption
            .insert(ObjectType::Table, BTreeSet::from([1]));

        let other = pool("q");
        let pooled = Consumption::from([
            (ObjectType::Table, BTreeSet::from([1, 2])),
            (ObjectType::Page, BTreeSet::from([7])),
        ]);
        let stale = ReleaseMembership {
            pool_id: &other,
            consumption: &pooled,
            user: None,
            now: 0,
        };
        assert!(matches!(
            stale.apply("a", Some(record.clone())).unwrap(),
            Update::Skip(false)
        ));

        let current = pool("p");
        let leave = ReleaseMembership {
            pool_id: &current,
            ..stale
        };
        let (record, released) = commit(leave.apply("a", Some(record)).unwrap());
        assert!(released);
        assert_eq!(record.pool_id, None);
        assert_eq!(record.consumption, pooled);
        assert_eq!(record.log[0].event_type, EventType::PoolLeft);
        assert_eq!(record.log[0].data["merged"], json!(2));

        assert!(matches!(
            leave.apply("a", Some(record)).unwrap(),
            Update::Skip(false)
        ));
        assert!(matches!(leave.apply("a", None).unwrap(), Update::Skip(false)));
    }

    #[test]
    fn remove_member_keeps_consumption() {
        let mut record = ConsumptionRecord::new("p");
        record.members.insert(app("a"));
        record
            .consumption
            .insert(ObjectType::Page, BTreeSet::from([9]));

        let app_id = app("a");
        let remove = RemoveMember {
            app_id: &app_id,
            user: None,
            now: 0,
        };
        let (record, removal) = commit(remove.apply("p", Some(record)).unwrap());
        assert!(removal.removed);
        assert_eq!(removal.consumption, record.consumption);
        assert!(record.members.is_empty());
        assert!(record.has_consumption(&ObjectType::Page));

        // A repeated removal still reports the pool's consumption.
        match remove.apply("p", Some(record)).unwrap() {
            Update::Skip(again) => assert_eq!(again, Removal { removed: false, ..removal }),
            Update::Commit { .. } => panic!("expected a skip"),
        }
        assert!(matches!(
            remove.apply("p", None).unwrap(),
            Update::Skip(Removal { removed: false, .. })
        ));
    }

    #[test]
    fn delete_precondition() {
        assert!(can_delete(&json!({ "appId": "a" })).is_ok());
        assert!(can_delete(&json!({ "appId": "p", "members": [] })).is_ok());
        assert!(can_delete(&json!({ "appId": "a", "poolId": "p" })).is_err());
        assert!(can_delete(&json!({ "appId": "p", "members": ["a"] })).is_err());
    }
}
