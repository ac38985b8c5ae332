//! Patch planning: turn a source length and a list of patches into an
//! ordered sequence of keep/insert steps.
//!
//! Every selector is resolved twice. The source pass measures what each patch
//! consumes and fixes the untouched source ranges between patches. The
//! destination pass places each selector against the length of the edited
//! object and enforces the ordering contract there. Both passes must see the
//! patches ascending and non-overlapping in input order.
//!
//! The resulting [`Plan`] never holds source bytes, only ranges of them, so
//! it can be executed against a store that streams the original.

use crate::linear::first_overlap;
use crate::patch::Patch;
use crate::selector::{BoundsPolicy, ConcreteRange, RangeError, Resolver};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanStep {
    /// Copy this range of the source verbatim
    Keep { start: usize, end: usize },
    /// Emit these literal bytes
    Insert { bytes: Vec<u8> },
}

impl PlanStep {
    pub fn keep(range: ConcreteRange) -> Self {
        PlanStep::Keep {
            start: range.start,
            end: range.end,
        }
    }

    pub fn insert(bytes: impl Into<Vec<u8>>) -> Self {
        PlanStep::Insert {
            bytes: bytes.into(),
        }
    }

    /// Number of output bytes this step produces.
    pub fn len(&self) -> usize {
        match self {
            PlanStep::Keep { start, end } => end.saturating_sub(*start),
            PlanStep::Insert { bytes } => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::Keep { start, end } => write!(f, "keep   {start}..{end}"),
            PlanStep::Insert { bytes } => write!(f, "insert {} bytes", bytes.len()),
        }
    }
}

/// Ordered keep/insert steps whose concatenation is the edited object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
#[must_use = "a Plan does nothing until it is applied or committed"]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn from_steps(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanStep> {
        self.steps.iter()
    }

    /// Total length of the object this plan produces.
    pub fn output_len(&self) -> usize {
        self.steps.iter().map(PlanStep::len).sum()
    }

    /// Bytes copied from the source.
    pub fn kept_len(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(step, PlanStep::Keep { .. }))
            .map(PlanStep::len)
            .sum()
    }

    /// Literal bytes carried by the plan itself.
    pub fn inserted_len(&self) -> usize {
        self.output_len() - self.kept_len()
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a PlanStep;
    type IntoIter = std::slice::Iter<'a, PlanStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

impl IntoIterator for Plan {
    type Item = PlanStep;
    type IntoIter = std::vec::IntoIter<PlanStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

/// Which coordinate system an ordering violation was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSpace {
    Source,
    Destination,
}

impl fmt::Display for CoordinateSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinateSpace::Source => f.write_str("source"),
            CoordinateSpace::Destination => f.write_str("destination"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error(
        "patch {index} is out of order or overlaps an earlier patch \
         in {space} coordinates ({range}, cursor at {cursor})"
    )]
    UnorderedPatch {
        index: usize,
        space: CoordinateSpace,
        range: ConcreteRange,
        cursor: usize,
    },

    #[error("patch {index} has an invalid selector: {source}")]
    Range {
        index: usize,
        #[source]
        source: RangeError,
    },

    #[error("patch {index}: source bytes at {range} do not match the expected content")]
    VerificationFailed { index: usize, range: ConcreteRange },

    #[error("plan keeps {range} but the source is only {source_length} bytes long")]
    KeepOutOfBounds {
        range: ConcreteRange,
        source_length: usize,
    },

    #[error("plan step {step} keeps an invalid range: {source}")]
    InvalidKeep {
        step: usize,
        #[source]
        source: RangeError,
    },
}

/// Knobs for planning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    /// How source-space selectors outside the object are handled
    #[serde(default)]
    pub bounds: BoundsPolicy,
}

/// A patch with its selector resolved in both coordinate spaces.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPatch<'a> {
    pub index: usize,
    pub patch: &'a Patch,
    /// Bytes of the source this patch consumes
    pub source: ConcreteRange,
    /// The same selector resolved against the destination length
    pub destination: ConcreteRange,
}

/// Patches resolved against a concrete source length, ready to be walked.
#[derive(Debug, Clone)]
pub struct Layout<'a> {
    source_length: usize,
    destination_length: usize,
    patches: Vec<ResolvedPatch<'a>>,
}

impl<'a> Layout<'a> {
    /// Run both resolution passes and enforce the ordering contract.
    #[instrument(level = "debug", skip(patches), fields(patches = patches.len()))]
    pub fn resolve(
        source_length: usize,
        patches: &'a [Patch],
        options: PlanOptions,
    ) -> Result<Self, PlanError> {
        // Source pass: what does each patch consume?
        let in_source = Resolver::new(source_length, options.bounds);
        let source_ranges = patches
            .iter()
            .enumerate()
            .map(|(index, patch)| {
                in_source
                    .resolve(&patch.selector)
                    .map_err(|source| PlanError::Range { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        ensure_ordered(&source_ranges, CoordinateSpace::Source)?;

        // Ordered and in bounds, so the removed total never exceeds the source.
        let removed: usize = source_ranges.iter().map(ConcreteRange::len).sum();
        let inserted: usize = patches.iter().map(|patch| patch.replacement.len()).sum();
        let destination_length = source_length - removed + inserted;
        debug!(
            source_length,
            destination_length,
            removed,
            inserted,
            "resolved source ranges"
        );

        // Destination pass: the same selectors against the edited length.
        // Always clamped; a deletion at the tail legitimately reaches past it.
        let in_destination = Resolver::new(destination_length, BoundsPolicy::Clamp);
        let destination_ranges = patches
            .iter()
            .enumerate()
            .map(|(index, patch)| {
                in_destination
                    .resolve(&patch.selector)
                    .map_err(|source| PlanError::Range { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        ensure_ordered(&destination_ranges, CoordinateSpace::Destination)?;

        let patches = patches
            .iter()
            .zip(source_ranges.into_iter().zip(destination_ranges))
            .enumerate()
            .map(|(index, (patch, (source, destination)))| ResolvedPatch {
                index,
                patch,
                source,
                destination,
            })
            .collect();

        Ok(Self {
            source_length,
            destination_length,
            patches,
        })
    }

    pub fn source_length(&self) -> usize {
        self.source_length
    }

    pub fn destination_length(&self) -> usize {
        self.destination_length
    }

    pub fn patches(&self) -> &[ResolvedPatch<'a>] {
        &self.patches
    }

    /// Net change in length.
    pub fn size_delta(&self) -> isize {
        // Both lengths describe real objects, so they fit in isize.
        self.destination_length as isize - self.source_length as isize
    }

    /// Check every patch that carries an expectation against the source bytes
    /// it consumes. `read` fetches a source range.
    pub fn verify_with<E>(
        &self,
        mut read: impl FnMut(ConcreteRange) -> Result<Vec<u8>, E>,
    ) -> Result<(), E>
    where
        E: From<PlanError>,
    {
        for resolved in &self.patches {
            if resolved.patch.expected.is_none() {
                continue;
            }
            let current = read(resolved.source)?;
            if !resolved.patch.verify(&current) {
                return Err(PlanError::VerificationFailed {
                    index: resolved.index,
                    range: resolved.source,
                }
                .into());
            }
            trace!(index = resolved.index, range = %resolved.source, "verified");
        }
        Ok(())
    }

    /// Walk the patches and emit the plan.
    ///
    /// The loop runs once per patch plus once for the tail, and the cursor
    /// only moves forward since `resolve` rejected unordered patches.
    pub fn plan(&self) -> Plan {
        let mut steps = Vec::with_capacity(self.patches.len() * 2 + 1);
        let mut cursor = 0;
        let mut written = 0;

        for resolved in &self.patches {
            // Checked in `resolve`.
            debug_assert!(resolved.source.start >= cursor);

            // In a gap: keep the untouched source bytes up to the patch.
            if resolved.source.start > cursor {
                let gap = ConcreteRange {
                    start: cursor,
                    end: resolved.source.start,
                };
                written += gap.len();
                steps.push(PlanStep::keep(gap));
            }

            // At the patch boundary.
            trace!(
                index = resolved.index,
                at = written,
                consumed = %resolved.source,
                bytes = resolved.patch.replacement.len(),
                "insert"
            );
            written += resolved.patch.replacement.len();
            steps.push(PlanStep::insert(resolved.patch.replacement.clone()));
            cursor = resolved.source.end;
        }

        if cursor < self.source_length || self.patches.is_empty() {
            let tail = ConcreteRange {
                start: cursor,
                end: self.source_length,
            };
            written += tail.len();
            steps.push(PlanStep::keep(tail));
        }

        debug_assert_eq!(written, self.destination_length);
        debug!(steps = steps.len(), output = written, "built plan");
        Plan { steps }
    }
}

/// The source range of the `Keep` at position `step`, checked for
/// `start <= end` since plans may arrive deserialized.
pub(crate) fn checked_keep(
    step: usize,
    start: usize,
    end: usize,
) -> Result<ConcreteRange, PlanError> {
    ConcreteRange::new(start, end).map_err(|source| PlanError::InvalidKeep { step, source })
}

/// Patches must already be linear in input order; nothing is sorted here.
fn ensure_ordered(ranges: &[ConcreteRange], space: CoordinateSpace) -> Result<(), PlanError> {
    match first_overlap(ranges) {
        Some((index, cursor)) => Err(PlanError::UnorderedPatch {
            index,
            space,
            range: ranges[index],
            cursor,
        }),
        None => Ok(()),
    }
}

/// Plan `patches` against a source of `source_length` bytes.
pub fn build_plan(source_length: usize, patches: &[Patch]) -> Result<Plan, PlanError> {
    build_plan_with(source_length, patches, PlanOptions::default())
}

pub fn build_plan_with(
    source_length: usize,
    patches: &[Patch],
    options: PlanOptions,
) -> Result<Plan, PlanError> {
    Ok(Layout::resolve(source_length, patches, options)?.plan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;

    fn keep(start: usize, end: usize) -> PlanStep {
        PlanStep::Keep { start, end }
    }

    fn insert(bytes: &str) -> PlanStep {
        PlanStep::insert(bytes.as_bytes())
    }

    #[test]
    fn test_no_patches_is_identity() {
        assert_eq!(build_plan(10, &[]).unwrap().steps(), &[keep(0, 10)]);
        assert_eq!(build_plan(0, &[]).unwrap().steps(), &[keep(0, 0)]);
    }

    #[test]
    fn test_populates_empty_object() {
        let plan = build_plan(0, &[Patch::new(Selector::ALL, "hello-world")]).unwrap();
        assert_eq!(plan.steps(), &[insert("hello-world")]);
        assert_eq!(plan.output_len(), 11);
    }

    #[test]
    fn test_truncates_short_object() {
        let plan = build_plan(10, &[Patch::delete(Selector::ALL)]).unwrap();
        assert_eq!(plan.steps(), &[insert("")]);
        assert_eq!(plan.output_len(), 0);
    }

    #[test]
    fn test_inserts_prefix() {
        let plan = build_plan(1, &[Patch::prepend("a")]).unwrap();
        assert_eq!(plan.steps(), &[insert("a"), keep(0, 1)]);
    }

    #[test]
    fn test_appends_suffix() {
        let plan = build_plan(1, &[Patch::append(1, "b")]).unwrap();
        assert_eq!(plan.steps(), &[keep(0, 1), insert("b")]);
    }

    #[test]
    fn test_prefix_and_suffix() {
        let plan = build_plan(1, &[Patch::prepend("a"), Patch::append(1, "c")]).unwrap();
        assert_eq!(plan.steps(), &[insert("a"), keep(0, 1), insert("c")]);
    }

    #[test]
    fn test_length_changes_do_not_shift_later_keeps() {
        // "abcdef": grow byte 1, then drop byte 4
        let patches = [
            Patch::new(Selector::between(1, 2), "XX"),
            Patch::delete(Selector::between(4, 5)),
        ];
        let plan = build_plan(6, &patches).unwrap();
        assert_eq!(
            plan.steps(),
            &[keep(0, 1), insert("XX"), keep(2, 4), insert(""), keep(5, 6)]
        );
        assert_eq!(plan.output_len(), 6);
    }

    #[test]
    fn test_negative_selector_deletes_tail() {
        let plan = build_plan(2, &[Patch::delete(Selector::starting_at(-1))]).unwrap();
        assert_eq!(plan.steps(), &[keep(0, 1), insert("")]);
    }

    #[test]
    fn test_rejects_unordered_source_patches() {
        let patches = [
            Patch::new(Selector::between(4, 5), "x"),
            Patch::new(Selector::between(0, 1), "y"),
        ];
        let err = build_plan(10, &patches).unwrap_err();
        assert!(matches!(
            err,
            PlanError::UnorderedPatch {
                index: 1,
                space: CoordinateSpace::Source,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_overlapping_patches() {
        let patches = [
            Patch::new(Selector::up_to(4), "x"),
            Patch::new(Selector::up_to(6), "y"),
        ];
        assert!(matches!(
            build_plan(11, &patches),
            Err(PlanError::UnorderedPatch { .. })
        ));
    }

    #[test]
    fn test_rejects_patches_unordered_in_destination_space() {
        // Ordered in the source, but shrinking the object pulls the
        // tail-relative selector of the second patch back over the first.
        let patches = [
            Patch::delete(Selector::between(5, 6)),
            Patch::delete(Selector::starting_at(-3)),
        ];
        let err = build_plan(10, &patches).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnorderedPatch {
                index: 1,
                space: CoordinateSpace::Destination,
                range: ConcreteRange { start: 3, end: 6 },
                cursor: 6,
            }
        );
    }

    #[test]
    fn test_strict_bounds_reject_out_of_range_selector() {
        let options = PlanOptions {
            bounds: BoundsPolicy::Strict,
        };
        let patches = [Patch::new(Selector::starting_at(20), "x")];
        let err = build_plan_with(10, &patches, options).unwrap_err();
        assert!(matches!(err, PlanError::Range { index: 0, .. }));

        // Clamping turns the same selector into an append.
        let plan = build_plan(10, &patches).unwrap();
        assert_eq!(plan.steps(), &[keep(0, 10), insert("x")]);
    }

    #[test]
    fn test_layout_records_both_coordinate_spaces() {
        let patches = [Patch::new(Selector::up_to(-1), "")];
        let layout = Layout::resolve(5, &patches, PlanOptions::default()).unwrap();
        assert_eq!(layout.destination_length(), 1);
        assert_eq!(layout.size_delta(), -4);
        let resolved = layout.patches()[0];
        assert_eq!(resolved.source, ConcreteRange { start: 0, end: 4 });
        assert_eq!(resolved.destination, ConcreteRange { start: 0, end: 0 });
    }

    #[test]
    fn test_verify_with_reports_mismatch() {
        let source = b"hello-world";
        let patches = [Patch::new(Selector::up_to(5), "HELLO")
            .with_verification(crate::patch::Verification::ExactMatch(b"howdy".to_vec()))];
        let layout = Layout::resolve(source.len(), &patches, PlanOptions::default()).unwrap();
        let err = layout
            .verify_with(|range| Ok::<_, PlanError>(source[range.as_range()].to_vec()))
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::VerificationFailed {
                index: 0,
                range: ConcreteRange { start: 0, end: 5 }
            }
        );
    }

    #[test]
    fn test_plan_statistics() {
        let plan = build_plan(11, &[Patch::new(Selector::between(5, 6), "__")]).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.kept_len(), 10);
        assert_eq!(plan.inserted_len(), 2);
        assert_eq!(plan.output_len(), 12);
    }

    #[test]
    fn test_plan_serializes_as_step_list() {
        let plan = build_plan(3, &[Patch::prepend("a")]).unwrap();
        let json = serde_json::to_string(&plan).unwrap();
        assert_eq!(
            json,
            r#"[{"op":"insert","bytes":[97]},{"op":"keep","start":0,"end":3}]"#
        );
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
