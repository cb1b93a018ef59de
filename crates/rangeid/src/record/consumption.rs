use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    AppId, PoolId,
    record::{ObjectType, Range},
};

/// Identifiers consumed per object type.
pub type Consumption = BTreeMap<ObjectType, BTreeSet<u64>>;

/// Kind of event recorded in a [`ConsumptionRecord`]'s log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    /// Identifiers were allocated by the allocation engine.
    Allocated,
    /// The declared ranges were replaced.
    RangesDeclared,
    /// Reported identifiers were union-merged into consumption.
    SyncMerge,
    /// Consumption for the reported types was overwritten.
    SyncReplace,
    /// This app joined a pool.
    PoolJoined,
    /// This app left its pool.
    PoolLeft,
    /// An app joined this pool.
    MemberJoined,
    /// An app left this pool.
    MemberLeft,
}

/// One append-only audit entry.
///
/// `timestamp` is advisory; the authoritative order is the position in the
/// log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub event_type: EventType,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// The JSON document holding one app's (or one pool's) consumption state.
///
/// A record is either a standalone app record, a pooled app record (with
/// `pool_id` set, whose consumption is frozen while pooled), or a pool record
/// (with `members`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionRecord {
    /// Owning app ID, or the pool ID for pool records.
    pub app_id: String,
    #[serde(default)]
    pub ranges: Vec<Range>,
    #[serde(default)]
    pub consumption: Consumption,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<PoolId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub members: BTreeSet<AppId>,
}

impl ConsumptionRecord {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            app_id: owner.into(),
            ..Self::default()
        }
    }

    /// Identifiers consumed for `object_type`, if any were ever recorded.
    pub fn consumed(&self, object_type: &ObjectType) -> Option<&BTreeSet<u64>> {
        self.consumption.get(object_type)
    }

    pub fn has_consumption(&self, object_type: &ObjectType) -> bool {
        self.consumed(object_type).is_some_and(|ids| !ids.is_empty())
    }

    /// Returns `true` if any declared range contains `id`.
    pub fn covers(&self, id: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(id))
    }

    /// Consumed identifiers that lie outside the current ranges, per type.
    ///
    /// Types without stranded identifiers are omitted.
    pub fn out_of_range(&self) -> BTreeMap<ObjectType, Vec<u64>> {
        self.stranded_by(&self.ranges)
    }

    /// Consumed identifiers that `ranges` would not cover, per type.
    pub fn stranded_by(&self, ranges: &[Range]) -> BTreeMap<ObjectType, Vec<u64>> {
        self.consumption
            .iter()
            .filter_map(|(object_type, ids)| {
                let stranded: Vec<u64> = ids
                    .iter()
                    .copied()
                    .filter(|&id| !ranges.iter().any(|r| r.contains(id)))
                    .collect();
                (!stranded.is_empty()).then_some((*object_type, stranded))
            })
            .collect()
    }

    /// Appends an audit entry. The log is never edited in place.
    pub fn append_log(
        &mut self,
        event_type: EventType,
        timestamp: u64,
        user: Option<&str>,
        data: serde_json::Value,
    ) {
        self.log.push(LogEntry {
            event_type,
            timestamp,
            user: user.map(str::to_owned),
            data,
        });
    }
}
