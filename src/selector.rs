//! Python-style range selectors and their resolution into concrete ranges.
//!
//! A [`Selector`] describes a byte range the way a Python slice does: either
//! bound may be omitted ("to the edge") or negative ("counted from the end").
//! Resolving it against a container size yields a [`ConcreteRange`], which is
//! always non-negative and never inverted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use thiserror::Error;

/// Abstract range selector, relative to a container of unknown size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    /// Inclusive start; `None` means the beginning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<isize>,
    /// Exclusive end; `None` means the end of the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<isize>,
}

impl Selector {
    /// The whole container (`[:]`).
    pub const ALL: Selector = Selector {
        start: None,
        end: None,
    };

    pub fn new(start: Option<isize>, end: Option<isize>) -> Self {
        Self { start, end }
    }

    /// Everything from `start` to the end (`[start:]`).
    pub fn starting_at(start: isize) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Everything before `end` (`[:end]`).
    pub fn up_to(end: isize) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    pub fn between(start: isize, end: isize) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Resolve against `size` under the given bounds policy.
    pub fn resolve(&self, size: usize, policy: BoundsPolicy) -> Result<ConcreteRange, RangeError> {
        Resolver::new(size, policy).resolve(self)
    }

    /// Resolve against `size` with Python clamping semantics. Never fails.
    pub fn clamp(&self, size: usize) -> ConcreteRange {
        let start = clamp_bound(self.start, 0, size);
        let end = clamp_bound(self.end, size, size);
        ConcreteRange {
            start,
            end: end.max(start),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(start) = self.start {
            write!(f, "{start}")?;
        }
        f.write_str(":")?;
        if let Some(end) = self.end {
            write!(f, "{end}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorParseError {
    #[error("selector '{0}' is missing ':' (expected start:end)")]
    MissingColon(String),

    #[error("invalid selector bound '{bound}' in '{input}'")]
    InvalidBound { input: String, bound: String },
}

impl FromStr for Selector {
    type Err = SelectorParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (start, end) = input
            .split_once(':')
            .ok_or_else(|| SelectorParseError::MissingColon(input.to_string()))?;

        let parse = |bound: &str| -> Result<Option<isize>, SelectorParseError> {
            let bound = bound.trim();
            if bound.is_empty() {
                return Ok(None);
            }
            bound
                .parse::<isize>()
                .map(Some)
                .map_err(|_| SelectorParseError::InvalidBound {
                    input: input.to_string(),
                    bound: bound.to_string(),
                })
        };

        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }
}

/// Fully resolved half-open byte range `[start, end)`.
///
/// Produced by resolution or [`ConcreteRange::new`], so `start <= end` holds.
/// Deserialization goes through the same check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct ConcreteRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Deserialize)]
struct RawRange {
    start: usize,
    end: usize,
}

impl TryFrom<RawRange> for ConcreteRange {
    type Error = RangeError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        ConcreteRange::new(raw.start, raw.end)
    }
}

impl ConcreteRange {
    /// Build a range from already-validated bounds.
    pub fn new(start: usize, end: usize) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Zero for a hand-built inverted range.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// True when both ranges share at least one byte.
    pub fn overlaps(&self, other: &ConcreteRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for ConcreteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// What to do with selectors that reach outside the container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundsPolicy {
    /// Python slice semantics: clamp into `[0, size]`, collapse inverted ranges
    #[default]
    Clamp,
    /// Reject anything outside `[0, size]` or inverted
    Strict,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("selector {selector} reaches outside container of size {size}")]
    OutOfBounds { selector: Selector, size: usize },

    #[error("inverted range: start {start} is past end {end}")]
    Inverted { start: usize, end: usize },
}

/// Resolves selectors against one fixed container size.
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    size: usize,
    policy: BoundsPolicy,
}

impl Resolver {
    pub fn new(size: usize, policy: BoundsPolicy) -> Self {
        Self { size, policy }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn resolve(&self, selector: &Selector) -> Result<ConcreteRange, RangeError> {
        match self.policy {
            BoundsPolicy::Clamp => Ok(selector.clamp(self.size)),
            BoundsPolicy::Strict => {
                let out_of_bounds = || RangeError::OutOfBounds {
                    selector: *selector,
                    size: self.size,
                };
                let start = strict_bound(selector.start, 0, self.size).ok_or_else(out_of_bounds)?;
                let end =
                    strict_bound(selector.end, self.size, self.size).ok_or_else(out_of_bounds)?;
                ConcreteRange::new(start, end)
            }
        }
    }
}

/// `None` when the bound lands outside `[0, size]`.
fn strict_bound(bound: Option<isize>, default: usize, size: usize) -> Option<usize> {
    let resolved = match bound {
        None => default,
        Some(x) if x < 0 => size.checked_sub(x.unsigned_abs())?,
        Some(x) => x.unsigned_abs(),
    };
    (resolved <= size).then_some(resolved)
}

fn clamp_bound(bound: Option<isize>, default: usize, size: usize) -> usize {
    match bound {
        None => default,
        Some(x) if x < 0 => size.saturating_sub(x.unsigned_abs()),
        Some(x) => x.unsigned_abs().min(size),
    }
}

/// Return the part of `input` addressed by `selector`, clamping like Python.
pub fn slice<'a>(input: &'a [u8], selector: &Selector) -> &'a [u8] {
    &input[selector.clamp(input.len()).as_range()]
}
