//! Image Buffer - One Output Image Being Assembled
//!
//! Holds the anonymous mapping the copy pass writes into, the finalized
//! layout it was sized from, the section table, the liveness bitmap and the
//! lookup-table entries collected during copy.
//!
//! The buffer spans `[0, image_size)` of the mapped image, header included;
//! the bitmap is kept separately and appended to the file after the data.

use memmap2::{MmapMut, MmapOptions};

use crate::config::PointerSize;
use crate::error::{FimgError, Result};
use crate::image::bitmap::LivenessBitmap;
use crate::image::header::HEADER_BYTES;
use crate::image::section::{Section, SectionId};
use crate::layout::{Bin, FinalizedImage};
use crate::util::{align_up, page_size};

/// Byte size of a sorted-offset lookup table: a count word plus one offset
/// per entry. Empty tables occupy no space.
fn offset_table_bytes(entries: usize) -> usize {
    if entries == 0 {
        0
    } else {
        4 + 4 * entries
    }
}

/// Byte size of the string-reference section: a count word plus
/// `(holder offset, slot offset)` pairs.
fn string_reference_bytes(entries: usize) -> usize {
    if entries == 0 {
        0
    } else {
        4 + 8 * entries
    }
}

/// One output image under construction.
pub struct ImageInfo {
    /// Position in the output chain; image 0 is the primary.
    pub image_index: usize,
    /// Virtual address this image will be mapped at.
    pub image_begin: u32,
    /// Module files contributing to this image.
    pub component_count: u32,
    /// Finalized bin layout.
    pub layout: FinalizedImage,
    /// Mapped size, page-aligned, bitmap excluded.
    pub image_size: usize,
    /// Section table recorded in the header.
    pub sections: [Section; SectionId::COUNT],
    /// Object-start bitmap covering the managed-object area.
    pub bitmap: LivenessBitmap,
    /// Image-relative offsets of interned strings, sorted before writing.
    pub intern_table: Vec<u32>,
    /// Image-relative offsets of classes, sorted before writing.
    pub class_table: Vec<u32>,
    /// `(holder offset, slot offset)` of managed string references.
    pub string_references: Vec<(u32, u32)>,
    buffer: MmapMut,
}

impl ImageInfo {
    /// Allocate the buffer for one image and lay out its trailing sections.
    ///
    /// The lookup-table entry counts must be known up front; the copy pass
    /// fills the entries in but may not grow the tables.
    pub fn new(
        image_index: usize,
        image_begin: u32,
        component_count: u32,
        layout: FinalizedImage,
        intern_entries: usize,
        class_entries: usize,
        string_reference_entries: usize,
    ) -> Result<Self> {
        let mut sections = [Section::default(); SectionId::COUNT];
        sections[SectionId::Objects.index()] = Section::new(0, layout.heap_objects_end());
        sections[SectionId::FieldArrays.index()] = bin_section(&layout, Bin::FieldArray);
        sections[SectionId::Methods.index()] = Section::new(
            layout.bin_begin(Bin::MethodClean),
            layout.bin_end(Bin::MethodDirty) - layout.bin_begin(Bin::MethodClean),
        );
        sections[SectionId::DispatchTables.index()] = bin_section(&layout, Bin::DispatchTable);
        sections[SectionId::ConflictTables.index()] = bin_section(&layout, Bin::ConflictTable);
        sections[SectionId::RuntimeMethods.index()] = bin_section(&layout, Bin::RuntimeMethod);
        sections[SectionId::CacheArrays.index()] = bin_section(&layout, Bin::CacheArray);
        sections[SectionId::Metadata.index()] = bin_section(&layout, Bin::Metadata);

        let mut cursor = layout.objects_end;
        cursor = align_up(cursor, 8);
        sections[SectionId::InternedStrings.index()] =
            Section::new(cursor, offset_table_bytes(intern_entries));
        cursor += offset_table_bytes(intern_entries);
        cursor = align_up(cursor, 8);
        sections[SectionId::ClassTable.index()] =
            Section::new(cursor, offset_table_bytes(class_entries));
        cursor += offset_table_bytes(class_entries);
        cursor = align_up(cursor, 4);
        sections[SectionId::StringReferenceOffsets.index()] =
            Section::new(cursor, string_reference_bytes(string_reference_entries));
        cursor += string_reference_bytes(string_reference_entries);

        let image_size = align_up(cursor, page_size());
        // The bitmap only covers heap objects; native bins and tables carry
        // no object starts.
        let bitmap = LivenessBitmap::new(align_up(layout.heap_objects_end(), page_size()));
        sections[SectionId::Bitmap.index()] = Section::new(image_size, bitmap.size_bytes());

        let buffer = MmapOptions::new()
            .len(image_size)
            .map_anon()
            .map_err(|e| FimgError::Allocation {
                requested: image_size,
                reason: format!("anonymous image mapping: {e}"),
            })?;

        Ok(Self {
            image_index,
            image_begin,
            component_count,
            layout,
            image_size,
            sections,
            bitmap,
            intern_table: Vec::with_capacity(intern_entries),
            class_table: Vec::with_capacity(class_entries),
            string_references: Vec::with_capacity(string_reference_entries),
            buffer,
        })
    }

    #[inline]
    pub fn section(&self, id: SectionId) -> Section {
        self.sections[id.index()]
    }

    /// Virtual address of an image-relative offset.
    #[inline]
    pub fn address_of(&self, offset: usize) -> u32 {
        self.image_begin + offset as u32
    }

    /// End of the managed-object area, where the loader's heap walk stops.
    #[inline]
    pub fn end_of_objects(&self) -> usize {
        self.layout.heap_objects_end()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Payload bytes following the header.
    #[inline]
    pub fn data_bytes(&self) -> &[u8] {
        &self.buffer[HEADER_BYTES..]
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// Write a native pointer at the target's pointer width.
    pub fn write_ptr(&mut self, offset: usize, value: u64, pointer_size: PointerSize) {
        match pointer_size {
            PointerSize::U32 => self.write_u32(offset, value as u32),
            PointerSize::U64 => self.write_bytes(offset, &value.to_le_bytes()),
        }
    }

    /// Mark an object start in the liveness bitmap.
    pub fn mark_object(&mut self, offset: usize) {
        self.bitmap.set(offset);
    }

    /// Sort and serialize the lookup tables and string references into
    /// their sections. Called once, after the copy pass.
    pub fn write_tables(&mut self) {
        let mut interns = std::mem::take(&mut self.intern_table);
        interns.sort_unstable();
        let section = self.section(SectionId::InternedStrings);
        self.write_offset_table(section, &interns);
        self.intern_table = interns;

        let mut classes = std::mem::take(&mut self.class_table);
        classes.sort_unstable();
        let section = self.section(SectionId::ClassTable);
        self.write_offset_table(section, &classes);
        self.class_table = classes;

        let mut references = std::mem::take(&mut self.string_references);
        references.sort_unstable();
        let section = self.section(SectionId::StringReferenceOffsets);
        if !references.is_empty() {
            assert_eq!(
                string_reference_bytes(references.len()) as u32,
                section.size,
                "string-reference count changed after sizing"
            );
            self.write_u32(section.offset as usize, references.len() as u32);
            for (index, &(holder, slot)) in references.iter().enumerate() {
                let at = section.offset as usize + 4 + index * 8;
                self.write_u32(at, holder);
                self.write_u32(at + 4, slot);
            }
        }
        self.string_references = references;
    }

    fn write_offset_table(&mut self, section: Section, entries: &[u32]) {
        if entries.is_empty() {
            return;
        }
        assert_eq!(
            offset_table_bytes(entries.len()) as u32,
            section.size,
            "lookup-table entry count changed after sizing"
        );
        self.write_u32(section.offset as usize, entries.len() as u32);
        for (index, &entry) in entries.iter().enumerate() {
            self.write_u32(section.offset as usize + 4 + index * 4, entry);
        }
    }
}

impl std::fmt::Debug for ImageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageInfo")
            .field("image_index", &self.image_index)
            .field("image_begin", &self.image_begin)
            .field("image_size", &self.image_size)
            .field("objects_end", &self.layout.objects_end)
            .finish_non_exhaustive()
    }
}

fn bin_section(layout: &FinalizedImage, bin: Bin) -> Section {
    Section::new(layout.bin_begin(bin), layout.bin_size(bin))
}
