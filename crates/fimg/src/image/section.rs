//! Image Sections - Typed Ranges of the Image File
//!
//! Every byte range the loader needs to find is described by a section in
//! the header: the object area, each native-structure area, the two lookup
//! tables, the string-reference offsets, the transient metadata and the
//! trailing liveness bitmap.

/// Identity of one header section. Variant order is the header's section
/// table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SectionId {
    /// Header plus all managed-object bins.
    Objects,
    /// Native field-descriptor arrays.
    FieldArrays,
    /// Native method descriptors, clean and dirty bins together.
    Methods,
    /// Interface dispatch tables.
    DispatchTables,
    /// Dispatch-conflict tables.
    ConflictTables,
    /// Synthetic runtime methods.
    RuntimeMethods,
    /// Resolution-cache slot arrays.
    CacheArrays,
    /// Sorted offsets of the interned strings in this image.
    InternedStrings,
    /// Sorted offsets of the classes in this image.
    ClassTable,
    /// Locations of managed string references, for app-image verification.
    StringReferenceOffsets,
    /// Transient metadata (preloaded resolution-cache root arrays).
    Metadata,
    /// Object-start liveness bitmap; page-aligned, after all data.
    Bitmap,
}

impl SectionId {
    pub const ALL: [SectionId; 12] = [
        SectionId::Objects,
        SectionId::FieldArrays,
        SectionId::Methods,
        SectionId::DispatchTables,
        SectionId::ConflictTables,
        SectionId::RuntimeMethods,
        SectionId::CacheArrays,
        SectionId::InternedStrings,
        SectionId::ClassTable,
        SectionId::StringReferenceOffsets,
        SectionId::Metadata,
        SectionId::Bitmap,
    ];

    pub const COUNT: usize = Self::ALL.len();

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One byte range inside the image file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Section {
    pub offset: u32,
    pub size: u32,
}

impl Section {
    pub fn new(offset: usize, size: usize) -> Self {
        Self {
            offset: offset as u32,
            size: size as u32,
        }
    }

    #[inline]
    pub fn end(self) -> u32 {
        self.offset + self.size
    }

    #[inline]
    pub fn contains(self, offset: u32) -> bool {
        offset >= self.offset && offset < self.end()
    }
}
