//! Object Patcher: range-based byte patching with streaming plans
//!
//! Patches name a region of a source object with a Python-style selector and
//! give the bytes to put there. Planning turns a source length and a list of
//! patches into a [`Plan`]: an ordered sequence of "keep this source range"
//! and "insert these bytes" steps whose concatenation is the edited object.
//!
//! # Architecture
//!
//! - [`selector`] resolves possibly-negative, possibly-omitted bounds into
//!   concrete ranges.
//! - [`linear`] validates that a set of ranges is ordered and disjoint.
//! - [`plan`] resolves each patch in source and destination coordinates and
//!   walks them into a plan.
//! - [`materialize`] executes a plan in memory; [`store`] executes it against
//!   an injected [`ObjectStore`] without loading the whole object.
//!
//! # Example
//!
//! ```
//! use object_patcher::{materialize, Patch, Selector};
//!
//! let patches = [
//!     Patch::prepend("a"),
//!     Patch::new(Selector::starting_at(1), "c"),
//! ];
//! assert_eq!(materialize(b"b", &patches).unwrap(), b"abc");
//! ```

pub mod config;
pub mod linear;
pub mod materialize;
pub mod patch;
pub mod plan;
pub mod selector;
pub mod store;

// Re-exports
pub use config::{load_from_path, load_from_str, ConfigError, PatchSet};
pub use linear::{extract, linear_ranges, linear_ranges_with, OverlapError};
pub use materialize::{apply_plan, materialize, materialize_with};
pub use patch::{Patch, Verification};
pub use plan::{
    build_plan, build_plan_with, CoordinateSpace, Layout, Plan, PlanError, PlanOptions, PlanStep,
    ResolvedPatch,
};
pub use selector::{
    slice, BoundsPolicy, ConcreteRange, RangeError, Resolver, Selector, SelectorParseError,
};
pub use store::{patch_object, plan_object, FileStore, MemoryStore, ObjectStore, StoreError};
