use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    AppId, Error, Result,
    engine::Mutation,
    record::{CandidateSpace, ConsumptionRecord, EventType, ObjectType, Range},
    store::Update,
};

/// A request for the next free identifier(s) of one object type.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequest {
    pub app_id: AppId,
    #[serde(rename = "type", alias = "objectType")]
    pub object_type: ObjectType,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub from_range: Option<Range>,
    #[serde(default)]
    pub user: Option<String>,
}

impl AllocationRequest {
    pub fn new(app_id: AppId, object_type: ObjectType) -> Self {
        Self {
            app_id,
            object_type,
            quantity: None,
            from_range: None,
            user: None,
        }
    }

    #[must_use]
    pub const fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    #[must_use]
    pub const fn with_from_range(mut self, range: Range) -> Self {
        self.from_range = Some(range);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Validates the request shape and returns the number of identifiers to
    /// allocate. Runs before any store access.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidQuantity`] for a zero or negative quantity.
    /// - [`Error::InvalidRange`] for an inverted `from_range`.
    pub fn validate(&self) -> Result<usize> {
        let quantity = self.quantity.unwrap_or(1);
        let count = usize::try_from(quantity)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(Error::InvalidQuantity { quantity })?;
        if let Some(range) = &self.from_range {
            range.validate()?;
        }
        Ok(count)
    }
}

/// Identifier(s) handed out by an allocation.
///
/// Serializes as a bare integer for single allocations and as an ordered
/// array when more than one identifier was requested.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AllocatedIds {
    Single(u64),
    Many(Vec<u64>),
}

impl AllocatedIds {
    fn from_vec(mut ids: Vec<u64>, count: usize) -> Self {
        if count == 1 && ids.len() == 1 {
            Self::Single(ids.remove(0))
        } else {
            Self::Many(ids)
        }
    }

    pub fn as_slice(&self) -> &[u64] {
        match self {
            Self::Single(id) => core::slice::from_ref(id),
            Self::Many(ids) => ids,
        }
    }
}

/// Response of an allocation.
///
/// `available: false` is a successful outcome: the candidate space had fewer
/// free identifiers than requested and nothing was committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub id: Option<AllocatedIds>,
    pub updated: bool,
    pub available: bool,
    pub update_attempts: u32,
    /// Whether the type had any consumption before this request.
    pub has_consumption: bool,
}

impl Allocation {
    /// Allocated identifiers, empty when unavailable.
    pub fn ids(&self) -> &[u64] {
        self.id.as_ref().map_or(&[], AllocatedIds::as_slice)
    }
}

/// Identifiers picked by one run of [`AllocationPlan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Picked {
    pub ids: Vec<u64>,
    pub has_consumption: bool,
}

/// Allocation of `count` identifiers as a [`Mutation`].
#[derive(Clone, Debug)]
pub struct AllocationPlan<'a> {
    pub object_type: ObjectType,
    pub count: usize,
    pub from_range: Option<&'a Range>,
    pub user: Option<&'a str>,
    pub now: u64,
}

impl AllocationPlan<'_> {
    /// Wraps the picked identifiers into the caller-facing response.
    pub fn respond(&self, picked: Picked, attempts: u32) -> Allocation {
        let available = picked.ids.len() == self.count;
        Allocation {
            object_type: self.object_type,
            id: available.then(|| AllocatedIds::from_vec(picked.ids, self.count)),
            updated: available,
            available,
            update_attempts: attempts,
            has_consumption: picked.has_consumption,
        }
    }
}

impl Mutation for AllocationPlan<'_> {
    type Output = Picked;

    fn apply(
        &self,
        owner: &str,
        record: Option<ConsumptionRecord>,
    ) -> Result<Update<ConsumptionRecord, Picked>> {
        let mut record = record.unwrap_or_else(|| ConsumptionRecord::new(owner));
        let has_consumption = record.has_consumption(&self.object_type);

        let space = CandidateSpace::resolve(&record.ranges, self.from_range)?;
        let empty = Default::default();
        let consumed = record.consumed(&self.object_type).unwrap_or(&empty);
        let ids: Vec<u64> = space.free(consumed).take(self.count).collect();

        if ids.len() < self.count {
            // Partial fills are never committed.
            return Ok(Update::Skip(Picked {
                ids: Vec::new(),
                has_consumption,
            }));
        }

        record
            .consumption
            .entry(self.object_type)
            .or_default()
            .extend(ids.iter().copied());
        record.append_log(
            EventType::Allocated,
            self.now,
            self.user,
            json!({ "type": self.object_type, "ids": ids }),
        );

        Ok(Update::Commit {
            document: record,
            output: Picked {
                ids,
                has_consumption,
            },
        })
    }
}
