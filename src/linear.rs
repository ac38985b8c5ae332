//! Ordered, non-overlapping range sets.
//!
//! Used on its own for read-only multi-range extraction, and by the planner
//! to enforce patch ordering.

use crate::selector::{BoundsPolicy, ConcreteRange, RangeError, Resolver, Selector};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlapError {
    #[error("found overlapping range: {range} (cursor was at {cursor})")]
    Overlap { range: ConcreteRange, cursor: usize },

    #[error(transparent)]
    Range(#[from] RangeError),
}

/// Resolve `selectors` against `size`, sort them, and reject overlaps.
///
/// Adjacent ranges (`a.end == b.start`) are accepted; repeated non-empty
/// ranges are not.
pub fn linear_ranges(
    size: usize,
    selectors: &[Selector],
) -> Result<Vec<ConcreteRange>, OverlapError> {
    linear_ranges_with(size, selectors, BoundsPolicy::Clamp)
}

pub fn linear_ranges_with(
    size: usize,
    selectors: &[Selector],
    policy: BoundsPolicy,
) -> Result<Vec<ConcreteRange>, OverlapError> {
    let resolver = Resolver::new(size, policy);
    let mut ranges = selectors
        .iter()
        .map(|selector| resolver.resolve(selector))
        .collect::<Result<Vec<_>, _>>()?;

    // ConcreteRange orders by (start, end)
    ranges.sort();
    if let Some((index, cursor)) = first_overlap(&ranges) {
        return Err(OverlapError::Overlap {
            range: ranges[index],
            cursor,
        });
    }
    Ok(ranges)
}

/// Sweep ranges in the given order and return the index of the first one
/// behind the cursor, together with the cursor it collided with.
pub(crate) fn first_overlap(ranges: &[ConcreteRange]) -> Option<(usize, usize)> {
    let mut cursor = 0;
    for (index, range) in ranges.iter().enumerate() {
        if range.start < cursor || range.end < cursor {
            return Some((index, cursor));
        }
        cursor = range.end;
    }
    None
}

/// Extract each selected region of `input`, in ascending order.
pub fn extract<'a>(input: &'a [u8], selectors: &[Selector]) -> Result<Vec<&'a [u8]>, OverlapError> {
    Ok(linear_ranges(input.len(), selectors)?
        .into_iter()
        .map(|range| &input[range.as_range()])
        .collect())
}
