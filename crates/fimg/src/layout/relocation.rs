//! Relocation Table - Planned Destinations of Native Structures
//!
//! Maps every native structure reachable from a kept object to its planned
//! image offset. Entries are inserted exactly once during the layout walk;
//! inserting a structure twice or looking up an unregistered structure is
//! an invariant breach and panics with the structure's identity.

use indexmap::IndexMap;

use crate::heap::{NativeId, NativeKind};
use crate::layout::bin::Bin;

/// Planned destination of one native structure.
#[derive(Debug, Clone, Copy)]
pub struct NativeRelocation {
    /// Output image the structure belongs to.
    pub image_index: usize,
    /// Intra-bin offset until [`RelocationTable::rebase`]; image-relative
    /// offset afterwards.
    pub offset: u64,
    pub kind: NativeKind,
}

/// Destination bin for a native structure kind.
pub fn bin_for_native_kind(kind: NativeKind) -> Bin {
    match kind {
        NativeKind::FieldArray => Bin::FieldArray,
        NativeKind::MethodArrayClean => Bin::MethodClean,
        NativeKind::MethodArrayDirty => Bin::MethodDirty,
        NativeKind::DispatchTable => Bin::DispatchTable,
        NativeKind::ConflictTable => Bin::ConflictTable,
        NativeKind::RuntimeMethod => Bin::RuntimeMethod,
        NativeKind::GcRootArray => Bin::Metadata,
        NativeKind::CacheArray(_) => Bin::CacheArray,
    }
}

/// Insertion-ordered relocation table. Iteration order is registration
/// order, which keeps the native copy pass deterministic.
#[derive(Debug, Default)]
pub struct RelocationTable {
    entries: IndexMap<NativeId, NativeRelocation>,
}

impl RelocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native structure. Panics if it is already present.
    pub fn insert(&mut self, id: NativeId, relocation: NativeRelocation) {
        if let Some(existing) = self.entries.get(&id) {
            panic!(
                "native structure registered twice: {} #{} (existing: {} at {:#x})",
                relocation.kind.name(),
                id.0,
                existing.kind.name(),
                existing.offset
            );
        }
        self.entries.insert(id, relocation);
    }

    /// Whether `id` is already registered.
    #[inline]
    pub fn contains(&self, id: NativeId) -> bool {
        self.entries.contains_key(&id)
    }

    #[inline]
    pub fn lookup(&self, id: NativeId) -> Option<&NativeRelocation> {
        self.entries.get(&id)
    }

    /// Look up a structure that must be registered. Panics with the owner's
    /// identity when the planner missed it.
    pub fn expect(&self, id: NativeId, owner: &str) -> &NativeRelocation {
        match self.entries.get(&id) {
            Some(relocation) => relocation,
            None => panic!("no relocation entry for native structure #{} referenced by {owner}", id.0),
        }
    }

    /// Rebase every planned offset from intra-bin to image-relative by
    /// adding the finalized start offset of the entry's bin.
    pub fn rebase(&mut self, bin_offset: impl Fn(usize, Bin) -> u64) {
        for (_, relocation) in self.entries.iter_mut() {
            let bin = bin_for_native_kind(relocation.kind);
            relocation.offset += bin_offset(relocation.image_index, bin);
        }
    }

    /// Entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (NativeId, &NativeRelocation)> {
        self.entries.iter().map(|(id, relocation)| (*id, relocation))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
