//! Managed object representation.
//!
//! Every managed object carries an 8-byte prefix inside its payload bytes:
//!
//! ```text
//! bytes 0‥4: header word — lock/hash state, rewritten during copy
//! bytes 4‥8: class reference (32-bit image address after relocation)
//! bytes 8‥:  instance fields / array elements
//! ```
//!
//! The pipeline never mutates a source object; placement is tracked out of
//! band, keyed by [`ObjectId`](super::ObjectId).

use super::{ModuleId, NativeId, ObjectId};

/// Byte offset of the header word inside an object's payload.
pub const HEADER_OFFSET: usize = 0;
/// Byte offset of the class reference inside an object's payload.
pub const CLASS_REF_OFFSET: usize = 4;
/// Byte offset of the first field / first array element.
pub const FIELDS_OFFSET: usize = 8;
/// Byte offset of the element area of a pointer array.
pub const POINTER_ARRAY_ELEMENTS_OFFSET: usize = 8;
/// Byte offset of the length word written into padding filler objects.
pub const FILLER_LENGTH_OFFSET: usize = 8;

const STATE_SHIFT: u32 = 30;
const STATE_UNLOCKED: u32 = 0;
const STATE_THIN: u32 = 1;
const STATE_FAT: u32 = 2;
const STATE_HASH: u32 = 3;
const VALUE_MASK: u32 = (1 << STATE_SHIFT) - 1;

/// State of an object's header word.
///
/// Only `Unlocked` and `HashCode` may be observed during an image build; a
/// locked object means the quiescence contract was violated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderWord {
    /// No lock, no cached identity hash.
    Unlocked,
    /// Identity hash has been computed and cached in the header.
    HashCode(u32),
    /// Thin lock held by `owner`. Fatal during a build.
    ThinLocked { owner: u32 },
    /// Inflated monitor `monitor_id`. Fatal during a build.
    FatLocked { monitor_id: u32 },
}

impl HeaderWord {
    /// Encode the value written into the image. Locked states are never
    /// serialized; callers must have rejected them during layout.
    pub fn encode(self) -> u32 {
        match self {
            HeaderWord::Unlocked => STATE_UNLOCKED << STATE_SHIFT,
            HeaderWord::HashCode(hash) => (STATE_HASH << STATE_SHIFT) | (hash & VALUE_MASK),
            HeaderWord::ThinLocked { owner } => (STATE_THIN << STATE_SHIFT) | (owner & VALUE_MASK),
            HeaderWord::FatLocked { monitor_id } => {
                (STATE_FAT << STATE_SHIFT) | (monitor_id & VALUE_MASK)
            }
        }
    }

    #[inline]
    pub fn is_locked(self) -> bool {
        matches!(
            self,
            HeaderWord::ThinLocked { .. } | HeaderWord::FatLocked { .. }
        )
    }
}

impl Default for HeaderWord {
    fn default() -> Self {
        HeaderWord::Unlocked
    }
}

/// One outgoing reference slot of an object, in object-layout order.
#[derive(Debug, Clone, Copy)]
pub struct RefSlot {
    /// Byte offset of the 32-bit reference inside the object payload.
    pub offset: u32,
    /// Referent, or `None` for a null slot.
    pub target: Option<ObjectId>,
    /// Whether this is a weak-reference referent slot.
    pub weak: bool,
}

/// Initialization progress of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassStatus {
    Loaded,
    Verified,
    Initialized,
}

impl ClassStatus {
    /// Value persisted into the image's status word. The high half of the
    /// status word holds the initializing-thread id at runtime and never
    /// survives serialization.
    pub fn wire_value(self) -> u32 {
        match self {
            ClassStatus::Loaded => 1,
            ClassStatus::Verified => 2,
            ClassStatus::Initialized => 3,
        }
    }
}

/// Class-specific metadata attached to a class node.
#[derive(Debug, Clone)]
pub struct ClassData {
    /// Module file this class is defined in.
    pub module: ModuleId,
    /// Definition index within the module file.
    pub def_index: u32,
    /// Array dimension; 0 for non-array classes. Array classes share the
    /// definition index of their element class.
    pub array_dim: u32,
    /// Human-readable descriptor, used for dirty-list matching and
    /// diagnostics.
    pub descriptor: String,
    pub status: ClassStatus,
    pub num_static_fields: u32,
    /// True when every static field is final.
    pub statics_all_final: bool,
    pub super_class: Option<ObjectId>,
    pub interfaces: Vec<ObjectId>,
    /// Method pointer array holding the virtual dispatch targets, if not
    /// embedded. A heap object whose elements are native method pointers.
    pub vtable: Option<ObjectId>,
    /// Per-interface method pointer arrays.
    pub iftable_method_arrays: Vec<ObjectId>,
    /// Native field-descriptor arrays (static and instance).
    pub field_arrays: Vec<NativeId>,
    /// Native method-descriptor arrays (virtual and direct).
    pub method_arrays: Vec<NativeId>,
    /// Interface dispatch table, if present.
    pub dispatch_table: Option<NativeId>,
    /// Dispatch-conflict tables, if present.
    pub conflict_tables: Vec<NativeId>,
    /// Native pointers embedded in the class payload: `(byte offset, target)`.
    /// Rewritten to image addresses during copy.
    pub native_refs: Vec<(u32, NativeId)>,
    /// Byte offset of the status word inside the payload.
    pub status_offset: u32,
    /// Byte offset of the fast-subtype counter inside the payload. Reset to
    /// zero during copy because the parent chain may not be reachable
    /// deterministically.
    pub subtype_counter_offset: u32,
}

/// Resolution-cache metadata attached to a cache node.
#[derive(Debug, Clone)]
pub struct CacheData {
    /// Module file this cache serves.
    pub module: ModuleId,
    /// Native pointers to the typed sub-arrays embedded in the cache
    /// payload: `(byte offset, array)`.
    pub arrays: Vec<(u32, NativeId)>,
    /// Byte offset of the runtime-only back-pointer to the source file.
    /// Nulled during copy; re-established at load time.
    pub backptr_offset: u32,
}

/// Closed set of object kinds the copy engine dispatches over, computed
/// once per object from its class identity.
#[derive(Debug, Clone)]
pub enum ObjectKind {
    Regular,
    Class(Box<ClassData>),
    /// Interned string; `value` is the string contents.
    Str { value: String },
    ResolutionCache(Box<CacheData>),
    /// Boxed method/constructor wrapper holding one native descriptor
    /// pointer at `slot_offset`.
    BoxedMethod { method: NativeId, slot_offset: u32 },
    /// Class loader; both offsets address transient native words dropped
    /// during copy and rebuilt lazily after load.
    ClassLoader {
        cache_offset: u32,
        allocator_offset: u32,
    },
    /// Int/long array whose elements are really native pointers. Only
    /// relocated when flagged as a method/field pointer array during layout.
    PointerArray { elements: Vec<NativeId> },
}

/// One managed object in the source heap.
#[derive(Debug, Clone)]
pub struct ObjectData {
    /// Payload size in bytes, including the 8-byte prefix.
    pub size: usize,
    /// Raw payload. `bytes.len() == size`.
    pub bytes: Vec<u8>,
    /// Class node, or `None` for detached fixtures.
    pub class: Option<ObjectId>,
    /// Outgoing reference slots in layout order.
    pub refs: Vec<RefSlot>,
    pub kind: ObjectKind,
    pub header: HeaderWord,
    /// Address inside an already-loaded base image. Objects with a base
    /// address are never copied; references to them pass through unchanged.
    pub base_address: Option<u32>,
    /// True when the object has ever been used for synchronization. Such
    /// objects dirty their page when locked again after load.
    pub sync_history: bool,
}

impl ObjectData {
    /// New zero-filled regular object of `size` bytes.
    pub fn new(size: usize) -> Self {
        assert!(size >= FIELDS_OFFSET, "object smaller than its prefix");
        Self {
            size,
            bytes: vec![0u8; size],
            class: None,
            refs: Vec::new(),
            kind: ObjectKind::Regular,
            header: HeaderWord::Unlocked,
            base_address: None,
            sync_history: false,
        }
    }

    #[inline]
    pub fn is_class(&self) -> bool {
        matches!(self.kind, ObjectKind::Class(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self.kind, ObjectKind::Str { .. })
    }

    #[inline]
    pub fn is_resolution_cache(&self) -> bool {
        matches!(self.kind, ObjectKind::ResolutionCache(_))
    }

    #[inline]
    pub fn in_base_image(&self) -> bool {
        self.base_address.is_some()
    }

    /// Class metadata, or `None` for non-class objects.
    pub fn class_data(&self) -> Option<&ClassData> {
        match &self.kind {
            ObjectKind::Class(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_word_encoding() {
        assert_eq!(HeaderWord::Unlocked.encode(), 0);
        let hash = HeaderWord::HashCode(0x1234_5678).encode();
        assert_eq!(hash >> STATE_SHIFT, STATE_HASH);
        assert_eq!(hash & VALUE_MASK, 0x1234_5678);
    }

    #[test]
    fn test_locked_detection() {
        assert!(!HeaderWord::Unlocked.is_locked());
        assert!(!HeaderWord::HashCode(7).is_locked());
        assert!(HeaderWord::ThinLocked { owner: 3 }.is_locked());
        assert!(HeaderWord::FatLocked { monitor_id: 9 }.is_locked());
    }

    #[test]
    #[should_panic(expected = "smaller than its prefix")]
    fn test_rejects_undersized_object() {
        let _ = ObjectData::new(4);
    }
}
