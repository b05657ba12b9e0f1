//! Layout Pipeline - From Heap Snapshot to Finalized Placement
//!
//! Runs in three strictly ordered passes:
//!
//! 1. [`prune`] decides which classes survive a layered build.
//! 2. [`planner`] assigns every copied object a bin slot and registers the
//!    native structures it owns.
//! 3. [`finalize`] turns intra-bin slots into image-relative offsets,
//!    inserting region padding where required.
//!
//! All placement state lives in handle-keyed maps; the source heap is never
//! mutated.

pub mod bin;
pub mod classify;
pub mod finalize;
pub mod planner;
pub mod prune;
pub mod relocation;

pub use bin::{Bin, BinSlot};
pub use finalize::{FinalizedImage, FinalizedLayout};
pub use planner::LayoutPlan;
pub use prune::RetainedClasses;
pub use relocation::{bin_for_native_kind, NativeRelocation, RelocationTable};
