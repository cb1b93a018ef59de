use serde::Serialize;
use serde_json::json;

use crate::{
    Error, Result,
    engine::Mutation,
    record::{ConsumptionRecord, EventType, Range, validate_ranges},
    store::Update,
};

/// Response of a range declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangesDeclared {
    pub ranges: Vec<Range>,
    pub updated: bool,
    pub update_attempts: u32,
}

/// Replacement of the declared ranges as a [`Mutation`].
///
/// A declaration that would move consumed identifiers from inside the current
/// ranges to outside the new ones is refused with [`Error::RangeConflict`]; stored consumption is never
/// reinterpreted.
#[derive(Clone, Debug)]
pub struct RangesPlan<'a> {
    pub ranges: &'a [Range],
    pub user: Option<&'a str>,
    pub now: u64,
}

impl RangesPlan<'_> {
    /// Checks the declaration itself. Runs before any store access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] for inverted or overlapping ranges.
    pub fn validate(&self) -> Result<()> {
        validate_ranges(self.ranges)
    }
}

impl Mutation for RangesPlan<'_> {
    type Output = Vec<Range>;

    fn apply(
        &self,
        owner: &str,
        record: Option<ConsumptionRecord>,
    ) -> Result<Update<ConsumptionRecord, Vec<Range>>> {
        let mut record = record.unwrap_or_else(|| ConsumptionRecord::new(owner));

        // Identifiers already outside the current ranges (reported via sync)
        // do not block a declaration; only newly stranded ones do.
        let stranded = record
            .stranded_by(self.ranges)
            .into_iter()
            .find_map(|(object_type, ids)| {
                let ids: Vec<u64> = ids.into_iter().filter(|&id| record.covers(id)).collect();
                (!ids.is_empty()).then_some((object_type, ids))
            });
        if let Some((object_type, ids)) = stranded {
            return Err(Error::RangeConflict { object_type, ids });
        }
        if record.ranges == self.ranges {
            return Ok(Update::Skip(record.ranges));
        }

        record.append_log(
            EventType::RangesDeclared,
            self.now,
            self.user,
            json!({ "previous": record.ranges, "ranges": self.ranges }),
        );
        record.ranges = self.ranges.to_vec();

        Ok(Update::Commit {
            output: record.ranges.clone(),
            document: record,
        })
    }
}
