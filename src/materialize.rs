//! In-memory plan execution.

use crate::patch::Patch;
use crate::plan::{checked_keep, Layout, Plan, PlanError, PlanOptions, PlanStep};

/// Apply `patches` to `original` and return the edited bytes.
///
/// Expected-content checks on the patches are enforced before anything is
/// produced.
pub fn materialize(original: &[u8], patches: &[Patch]) -> Result<Vec<u8>, PlanError> {
    materialize_with(original, patches, PlanOptions::default())
}

pub fn materialize_with(
    original: &[u8],
    patches: &[Patch],
    options: PlanOptions,
) -> Result<Vec<u8>, PlanError> {
    let layout = Layout::resolve(original.len(), patches, options)?;
    layout.verify_with(|range| Ok::<_, PlanError>(original[range.as_range()].to_vec()))?;
    apply_plan(original, &layout.plan())
}

/// Concatenate the steps of `plan`, reading `Keep` ranges from `original`.
pub fn apply_plan(original: &[u8], plan: &Plan) -> Result<Vec<u8>, PlanError> {
    let mut output = Vec::with_capacity(plan.output_len());
    for (index, step) in plan.iter().enumerate() {
        match step {
            PlanStep::Keep { start, end } => {
                let range = checked_keep(index, *start, *end)?;
                let bytes = original
                    .get(range.as_range())
                    .ok_or(PlanError::KeepOutOfBounds {
                        range,
                        source_length: original.len(),
                    })?;
                output.extend_from_slice(bytes);
            }
            PlanStep::Insert { bytes } => output.extend_from_slice(bytes),
        }
    }
    Ok(output)
}
