//! Declared ranges and the candidate-space resolver.
//!
//! The resolver never materializes a range: [`CandidateSpace`] keeps the
//! (possibly narrowed) segments and hands out lazy iterators over them, so a
//! `1..=u64::MAX` declaration costs no more than a ten-element one.

pub use free_ids::FreeIds;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{Error, Result};

/// An inclusive interval of identifiers declared by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub from: u64,
    pub to: u64,
}

impl Range {
    pub const fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Checks that `from <= to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] for an inverted interval.
    pub fn validate(&self) -> Result<()> {
        if self.from > self.to {
            return Err(Error::invalid_range(format!(
                "from ({}) is greater than to ({})",
                self.from, self.to
            )));
        }
        Ok(())
    }

    pub const fn contains(&self, id: u64) -> bool {
        self.from <= id && id <= self.to
    }

    pub const fn overlaps(&self, other: &Self) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    /// Returns the overlapping part of two ranges, if any.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        self.overlaps(other).then(|| Self {
            from: self.from.max(other.from),
            to: self.to.min(other.to),
        })
    }
}

/// Validates a declaration: every range well formed and no two overlapping.
///
/// # Errors
///
/// Returns [`Error::InvalidRange`] naming the first offending range(s).
pub fn validate_ranges(ranges: &[Range]) -> Result<()> {
    for (i, range) in ranges.iter().enumerate() {
        range.validate()?;
        if let Some(other) = ranges[..i].iter().find(|other| other.overlaps(range)) {
            return Err(Error::invalid_range(format!(
                "{}..={} overlaps {}..={}",
                range.from, range.to, other.from, other.to
            )));
        }
    }
    Ok(())
}

/// Merges overlapping and adjacent ranges into an ascending disjoint set.
pub fn coalesce(ranges: impl IntoIterator<Item = Range>) -> Vec<Range> {
    let mut sorted: Vec<Range> = ranges.into_iter().collect();
    sorted.sort_unstable();

    let mut merged: Vec<Range> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.from <= last.to.saturating_add(1) => {
                last.to = last.to.max(range.to);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// The ordered identifier space an allocation may draw from.
///
/// Segments appear in declaration order and each is walked smallest-first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateSpace {
    segments: Vec<Range>,
}

impl CandidateSpace {
    /// Resolves the declared `ranges`, optionally narrowed by `from_range`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `from_range` is inverted or does not
    /// intersect any declared range.
    pub fn resolve(ranges: &[Range], from_range: Option<&Range>) -> Result<Self> {
        let Some(narrow) = from_range else {
            return Ok(Self {
                segments: ranges.to_vec(),
            });
        };

        narrow.validate()?;
        let segments: Vec<Range> = ranges.iter().filter_map(|r| r.intersect(narrow)).collect();
        if segments.is_empty() && !ranges.is_empty() {
            return Err(Error::invalid_range(format!(
                "{}..={} is outside the declared ranges",
                narrow.from, narrow.to
            )));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Range] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.segments.iter().any(|r| r.contains(id))
    }

    /// Every candidate, in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.segments.iter().flat_map(|r| r.from..=r.to)
    }

    /// Candidates not present in `consumed`, in allocation order.
    ///
    /// Skips runs of consumed identifiers using the set's ordering, so the
    /// cost is proportional to the consumed identifiers inspected rather than
    /// the width of the ranges.
    pub fn free<'a>(&'a self, consumed: &'a BTreeSet<u64>) -> FreeIds<'a> {
        FreeIds::new(&self.segments, consumed)
    }
}

mod free_ids {
    use core::slice;
    use std::collections::BTreeSet;

    use super::Range;

    /// Iterator returned by [`CandidateSpace::free`](super::CandidateSpace::free).
    pub struct FreeIds<'a> {
        segments: slice::Iter<'a, Range>,
        current: Option<Range>,
        consumed: &'a BTreeSet<u64>,
    }

    impl<'a> FreeIds<'a> {
        pub(super) fn new(segments: &'a [Range], consumed: &'a BTreeSet<u64>) -> Self {
            Self {
                segments: segments.iter(),
                current: None,
                consumed,
            }
        }
    }

    impl Iterator for FreeIds<'_> {
        type Item = u64;

        fn next(&mut self) -> Option<u64> {
            loop {
                let segment = match self.current.take() {
                    Some(segment) => segment,
                    None => *self.segments.next()?,
                };

                let mut candidate = Some(segment.from);
                for &used in self.consumed.range(segment.from..=segment.to) {
                    match candidate {
                        Some(c) if c == used => candidate = c.checked_add(1),
                        _ => break,
                    }
                }

                if let Some(id) = candidate.filter(|&c| c <= segment.to) {
                    self.current = id
                        .checked_add(1)
                        .filter(|&next| next <= segment.to)
                        .map(|next| Range::new(next, segment.to));
                    return Some(id);
                }
            }
        }
    }
}
