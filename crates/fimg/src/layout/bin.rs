//! Bins - Dirtiness Categories for Image Layout
//!
//! Objects are grouped into bins ordered from "known dirty" to "likely
//! clean" so that objects unlikely to be written after load share pages.
//! In a multi-process runtime this keeps those pages shared copy-on-write
//! after fork. Bin choice never affects correctness, only paging behavior.

use crate::util::{is_aligned, OBJECT_ALIGNMENT};

/// Destination bin of an object or native structure.
///
/// Variant order is the layout order inside the image. The first
/// [`Bin::HEAP_COUNT`] bins hold managed objects; the rest hold native
/// structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Bin {
    /// Classes matched by the dirty-object override list.
    KnownDirty,
    /// Objects known to be dirtied at runtime: resolution caches, objects
    /// with synchronization history.
    MiscDirty,
    /// Verified-but-uninitialized classes; their initializers run at
    /// runtime and overwrite static fields.
    ClassVerified,
    /// Everything without a better category.
    Regular,
    /// Fully initialized classes.
    ClassInitialized,
    /// Fully initialized classes whose static fields are all final.
    ClassInitializedFinalStatics,
    /// Interned strings; immutable except for the header.
    Str,
    /// Native field-descriptor arrays.
    FieldArray,
    /// Method descriptors unlikely to be dirtied.
    MethodClean,
    /// Method descriptors that are native or whose class is uninitialized.
    MethodDirty,
    /// Interface dispatch tables.
    DispatchTable,
    /// Dispatch-conflict tables.
    ConflictTable,
    /// Synthetic runtime methods.
    RuntimeMethod,
    /// Transient metadata (preloaded resolution-cache root arrays).
    Metadata,
    /// Per-file resolution-cache slot arrays. Kept last: they are large and
    /// addressed PC-relatively, so their position among the dirty/clean
    /// split does not matter.
    CacheArray,
}

impl Bin {
    /// All bins in layout order.
    pub const ALL: [Bin; 15] = [
        Bin::KnownDirty,
        Bin::MiscDirty,
        Bin::ClassVerified,
        Bin::Regular,
        Bin::ClassInitialized,
        Bin::ClassInitializedFinalStatics,
        Bin::Str,
        Bin::FieldArray,
        Bin::MethodClean,
        Bin::MethodDirty,
        Bin::DispatchTable,
        Bin::ConflictTable,
        Bin::RuntimeMethod,
        Bin::Metadata,
        Bin::CacheArray,
    ];

    /// Total number of bins.
    pub const COUNT: usize = Self::ALL.len();

    /// Number of leading bins that hold managed heap objects.
    pub const HEAP_COUNT: usize = 7;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn from_index(index: usize) -> Bin {
        Self::ALL[index]
    }

    /// Whether this bin holds managed heap objects (and therefore takes
    /// part in region alignment).
    #[inline]
    pub fn is_heap_bin(self) -> bool {
        self.index() < Self::HEAP_COUNT
    }
}

const BIN_SHIFT: u32 = 28;
const OFFSET_MASK: u32 = (1 << BIN_SHIFT) - 1;

// 15 bins must fit in the tag above the offset.
const _: () = assert!(Bin::COUNT <= (1 << (32 - BIN_SHIFT)));

/// An object's planned placement: `(bin, intra-bin byte offset)` packed
/// into 32 bits. The offset is always object-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinSlot(u32);

impl BinSlot {
    pub fn new(bin: Bin, offset: usize) -> Self {
        assert!(
            is_aligned(offset, OBJECT_ALIGNMENT),
            "bin slot offset {offset:#x} is not object-aligned"
        );
        assert!(
            offset as u64 <= OFFSET_MASK as u64,
            "bin slot offset {offset:#x} exceeds the representable range"
        );
        BinSlot(((bin as u32) << BIN_SHIFT) | offset as u32)
    }

    #[inline]
    pub fn bin(self) -> Bin {
        Bin::from_index((self.0 >> BIN_SHIFT) as usize)
    }

    #[inline]
    pub fn offset(self) -> usize {
        (self.0 & OFFSET_MASK) as usize
    }
}
