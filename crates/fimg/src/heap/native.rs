//! Native (non-managed) structures referenced from the heap.
//!
//! Field-descriptor arrays, method-descriptor arrays, dispatch tables and
//! resolution-cache arrays live outside the managed heap but are copied
//! into dedicated image bins and relocated alongside the objects.

use super::{NativeId, ObjectId};

/// Typed sub-array of a resolution cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSlotKind {
    Method,
    Type,
    Field,
    Str,
    CallSite,
}

/// Kind of a native structure. Determines its destination bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    /// Field-descriptor array, header followed by per-field records.
    FieldArray,
    /// Method-descriptor array whose methods are unlikely to be dirtied.
    MethodArrayClean,
    /// Method-descriptor array with native or not-yet-initialized methods.
    MethodArrayDirty,
    /// Interface dispatch table.
    DispatchTable,
    /// Dispatch-conflict table.
    ConflictTable,
    /// Synthetic runtime method (trampolines, conflict stubs).
    RuntimeMethod,
    /// Resolution-cache slot array. Each entry stores a pointer-width value
    /// followed by the cached source index; the index bytes are preserved
    /// verbatim by the copy.
    CacheArray(CacheSlotKind),
    /// GC-root array owned by a resolution cache (preloaded strings).
    /// Placed in the metadata bin.
    GcRootArray,
}

impl NativeKind {
    /// Diagnostic name used in invariant-failure messages.
    pub fn name(self) -> &'static str {
        match self {
            NativeKind::FieldArray => "field array",
            NativeKind::MethodArrayClean => "clean method array",
            NativeKind::MethodArrayDirty => "dirty method array",
            NativeKind::DispatchTable => "dispatch table",
            NativeKind::ConflictTable => "conflict table",
            NativeKind::RuntimeMethod => "runtime method",
            NativeKind::CacheArray(_) => "resolution-cache array",
            NativeKind::GcRootArray => "gc-root array",
        }
    }
}

/// What an embedded pointer slot refers to.
#[derive(Debug, Clone, Copy)]
pub enum SlotTarget {
    Object(ObjectId),
    Native(NativeId),
    Null,
}

/// Stored width of an embedded pointer slot. Managed references are always
/// 32-bit; native pointers use the target pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWidth {
    Ref32,
    Ptr,
}

/// One embedded pointer inside a native structure.
#[derive(Debug, Clone, Copy)]
pub struct NativeSlot {
    /// Byte offset inside the structure.
    pub offset: u32,
    pub target: SlotTarget,
    pub width: SlotWidth,
}

/// One native structure: raw bytes plus the pointer slots to rewrite.
#[derive(Debug, Clone)]
pub struct NativeData {
    pub kind: NativeKind,
    pub bytes: Vec<u8>,
    pub slots: Vec<NativeSlot>,
}

impl NativeData {
    pub fn new(kind: NativeKind, size: usize) -> Self {
        Self {
            kind,
            bytes: vec![0u8; size],
            slots: Vec::new(),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}
