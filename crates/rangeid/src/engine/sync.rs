use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    AppId, Result,
    engine::Mutation,
    record::{Consumption, ConsumptionRecord, EventType, ObjectType},
    store::Update,
};

/// How reported identifiers reconcile with stored consumption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    /// Stored set becomes the union of stored and reported identifiers.
    Merge,
    /// Stored set for each reported type becomes exactly the reported set.
    Replace,
}

/// Client-reported consumption for one app.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub app_id: AppId,
    pub ids: BTreeMap<ObjectType, BTreeSet<u64>>,
    pub mode: SyncMode,
    #[serde(default)]
    pub user: Option<String>,
}

/// Response of a sync, echoing the resulting consumption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub consumption: Consumption,
    pub added: usize,
    pub removed: usize,
    pub updated: bool,
    pub update_attempts: u32,
}

/// Net change computed by one run of [`SyncPlan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncDelta {
    pub consumption: Consumption,
    pub added: usize,
    pub removed: usize,
}

impl SyncDelta {
    pub fn respond(self, committed: bool, attempts: u32) -> SyncOutcome {
        SyncOutcome {
            consumption: self.consumption,
            added: self.added,
            removed: self.removed,
            updated: committed,
            update_attempts: attempts,
        }
    }
}

/// Consumption reconciliation as a [`Mutation`].
///
/// Re-applying the same payload is a no-op: the second run finds nothing to
/// add or remove and skips the write (and the log entry).
#[derive(Clone, Debug)]
pub struct SyncPlan<'a> {
    pub ids: &'a BTreeMap<ObjectType, BTreeSet<u64>>,
    pub mode: SyncMode,
    pub user: Option<&'a str>,
    pub now: u64,
}

impl Mutation for SyncPlan<'_> {
    type Output = SyncDelta;

    fn apply(
        &self,
        owner: &str,
        record: Option<ConsumptionRecord>,
    ) -> Result<Update<ConsumptionRecord, SyncDelta>> {
        let mut record = record.unwrap_or_else(|| ConsumptionRecord::new(owner));
        let mut added = 0;
        let mut removed = 0;

        for (object_type, reported) in self.ids {
            let stored = record.consumption.entry(*object_type).or_default();
            if self.mode == SyncMode::Replace {
                let before = stored.len();
                stored.retain(|id| reported.contains(id));
                removed += before - stored.len();
            }
            let before = stored.len();
            stored.extend(reported.iter().copied());
            added += stored.len() - before;
        }
        record.consumption.retain(|_, ids| !ids.is_empty());

        let delta = SyncDelta {
            consumption: record.consumption.clone(),
            added,
            removed,
        };
        if added == 0 && removed == 0 {
            return Ok(Update::Skip(delta));
        }

        let event_type = match self.mode {
            SyncMode::Merge => EventType::SyncMerge,
            SyncMode::Replace => EventType::SyncReplace,
        };
        let types: Vec<ObjectType> = self.ids.keys().copied().collect();
        record.append_log(
            event_type,
            self.now,
            self.user,
            json!({ "types": types, "added": added, "removed": removed }),
        );

        Ok(Update::Commit {
            document: record,
            output: delta,
        })
    }
}
