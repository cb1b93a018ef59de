//! Pure record mutations executed under the optimistic update protocol.
//!
//! Every operation that changes a [`ConsumptionRecord`] is expressed as a
//! [`Mutation`]: a function from the freshly read record (or its absence) to
//! an [`Update`]. Mutations never perform I/O and may run several times per
//! request, once per conflict retry.
//!
//! ## Structure
//!
//! - [`allocate`] - Pick the lowest free identifiers and mark them consumed.
//! - [`sync`] - Merge or replace client-reported consumption.
//! - [`ranges`] - Replace declared ranges without stranding consumption.
//! - [`pool`] - Claim, admit, release, and remove pool memberships.

pub mod allocate;
pub mod pool;
pub mod ranges;
pub mod sync;

pub use allocate::*;
pub use pool::*;
pub use ranges::*;
pub use sync::*;

use crate::{Result, record::ConsumptionRecord, store::Update};

/// A pure, re-runnable change to one consumption record.
pub trait Mutation {
    /// Value handed back to the caller once the update completes.
    type Output: Send;

    /// Computes the next state of `record`.
    ///
    /// `owner` is the app or pool ID the record belongs to; it seeds records
    /// that do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns a precondition error to abort the update without writing.
    fn apply(
        &self,
        owner: &str,
        record: Option<ConsumptionRecord>,
    ) -> Result<Update<ConsumptionRecord, Self::Output>>;
}
