//! Copy and Fixup - Materializing the Image Bytes
//!
//! Copies every planned object and native structure into its image buffer
//! and rewrites all embedded pointers to final image addresses. Source
//! objects are read-only throughout; every mutation happens on the copy.
//!
//! Order matters only for determinism, not correctness: native structures
//! are copied in registration order, objects per image in bin order, so the
//! produced buffers are byte-identical across runs.

use crate::config::ImageConfig;
use crate::heap::{
    Heap, HeaderWord, NativeId, NativeKind, ObjectId, ObjectKind, RefSlot, SlotTarget, SlotWidth,
    CLASS_REF_OFFSET, FILLER_LENGTH_OFFSET, HEADER_OFFSET, POINTER_ARRAY_ELEMENTS_OFFSET,
};
use crate::image::ImageInfo;
use crate::layout::{FinalizedLayout, LayoutPlan};
use crate::util::align_up;

/// Whether a reference slot lands in the string-reference section: layered
/// builds record references to canonical interned strings of this file set.
/// Base-image strings and weak referents that get cleared are resolved
/// through the base image or the runtime instead.
pub(crate) fn records_string_reference(
    heap: &Heap,
    plan: &LayoutPlan,
    reference: &RefSlot,
) -> bool {
    let Some(target) = reference.target else {
        return false;
    };
    let object = heap.object(target);
    object.is_string()
        && !object.in_base_image()
        && heap.is_canonical_intern(target)
        && !(reference.weak && plan.slot(target).is_none())
}

/// Runs the copy passes over all images.
pub struct CopyFixupEngine<'a> {
    heap: &'a Heap,
    config: &'a ImageConfig,
    plan: &'a LayoutPlan,
    layout: &'a FinalizedLayout,
    /// Mapped base address per image, fixed before copying starts.
    image_begins: Vec<u32>,
}

impl<'a> CopyFixupEngine<'a> {
    pub fn new(
        heap: &'a Heap,
        config: &'a ImageConfig,
        plan: &'a LayoutPlan,
        layout: &'a FinalizedLayout,
        images: &[ImageInfo],
    ) -> Self {
        Self {
            heap,
            config,
            plan,
            layout,
            image_begins: images.iter().map(|image| image.image_begin).collect(),
        }
    }

    /// Copy everything: native structures, objects, padding fillers, then
    /// the lookup tables.
    pub fn run(&self, images: &mut [ImageInfo]) {
        self.copy_native_structures(images);
        self.copy_objects(images);
        self.fill_padding(images);
        for image in images.iter_mut() {
            image.write_tables();
        }
        log::debug!(
            "copied {} objects, {} native structures",
            self.plan.object_count(),
            self.plan.relocations.len()
        );
    }

    /// Final mapped address of a managed object, for writing into a
    /// reference slot. Pruned classes and excluded caches resolve to null;
    /// non-canonical interns resolve to their canonical twin.
    fn object_address(&self, id: ObjectId) -> u32 {
        let object = self.heap.object(id);
        if let Some(address) = object.base_address {
            return address;
        }
        if let ObjectKind::Str { value } = &object.kind {
            let canonical = self
                .heap
                .lookup_strong_intern(value)
                .unwrap_or_else(|| panic!("string without intern entry: {}", self.heap.describe(id)));
            if canonical != id {
                return self.object_address(canonical);
            }
        }
        if let Some(slot) = self.plan.slot(id) {
            let image = self.plan.image_of(id).unwrap_or_else(|| {
                panic!("placed object without image: {}", self.heap.describe(id))
            });
            let offset = self.layout.images[image].slot_offset(slot);
            return self.image_begins[image] + offset as u32;
        }
        match &object.kind {
            // A reference to a pruned class is nulled; the loader resolves
            // the class again through the normal path.
            ObjectKind::Class(_) if !self.plan.retained.contains(id) => 0,
            ObjectKind::ResolutionCache(cache)
                if !self.heap.module(cache.module).in_file_set =>
            {
                0
            }
            _ => panic!("reference to unplaced object: {}", self.heap.describe(id)),
        }
    }

    /// Final mapped address of a native structure.
    fn native_address(&self, id: NativeId, owner: &str) -> u64 {
        let relocation = self.plan.relocations.expect(id, owner);
        self.image_begins[relocation.image_index] as u64 + relocation.offset
    }

    fn copy_native_structures(&self, images: &mut [ImageInfo]) {
        for (id, relocation) in self.plan.relocations.iter() {
            let native = self.heap.native(id);
            let image = &mut images[relocation.image_index];
            let offset = relocation.offset as usize;
            image.write_bytes(offset, &native.bytes);

            for slot in &native.slots {
                let at = offset + slot.offset as usize;
                match (slot.target, slot.width) {
                    (SlotTarget::Object(target), SlotWidth::Ref32) => {
                        let address = self.object_address(target);
                        image.write_u32(at, address);
                    }
                    (SlotTarget::Object(target), SlotWidth::Ptr) => {
                        let address = self.object_address(target) as u64;
                        image.write_ptr(at, address, self.config.pointer_size);
                    }
                    (SlotTarget::Native(target), width) => {
                        let address = self.native_address(target, native.kind.name());
                        match width {
                            SlotWidth::Ref32 => image.write_u32(at, address as u32),
                            SlotWidth::Ptr => {
                                image.write_ptr(at, address, self.config.pointer_size)
                            }
                        }
                    }
                    (SlotTarget::Null, SlotWidth::Ref32) => image.write_u32(at, 0),
                    (SlotTarget::Null, SlotWidth::Ptr) => {
                        image.write_ptr(at, 0, self.config.pointer_size)
                    }
                }
            }
        }
    }

    fn copy_objects(&self, images: &mut [ImageInfo]) {
        for (image_index, image) in images.iter_mut().enumerate() {
            for bin_objects in &self.plan.bin_objects[image_index] {
                for &id in bin_objects {
                    self.copy_object(id, image_index, image);
                }
            }
        }
    }

    fn copy_object(&self, id: ObjectId, image_index: usize, image: &mut ImageInfo) {
        let object = self.heap.object(id);
        let slot = self.plan.placements[&id];
        let offset = self.layout.images[image_index].slot_offset(slot);

        image.write_bytes(offset, &object.bytes);
        image.mark_object(offset);

        // Restore the saved identity hash; everything else in the header
        // word is runtime state and resets to the default.
        let header = match self.plan.saved_hashes.get(&id) {
            Some(&hash) => HeaderWord::HashCode(hash),
            None => HeaderWord::Unlocked,
        };
        image.write_u32(offset + HEADER_OFFSET, header.encode());

        if let Some(class) = object.class {
            image.write_u32(offset + CLASS_REF_OFFSET, self.object_address(class));
        }
        for reference in &object.refs {
            self.fixup_reference(reference, offset, image);
        }

        match &object.kind {
            ObjectKind::Class(class) => {
                for &(slot_offset, target) in &class.native_refs {
                    let address = self.native_address(target, &class.descriptor);
                    image.write_ptr(
                        offset + slot_offset as usize,
                        address,
                        self.config.pointer_size,
                    );
                }
                image.write_u32(
                    offset + class.status_offset as usize,
                    class.status.wire_value(),
                );
                // The fast-subtype counter depends on load order; start over.
                image.write_u32(offset + class.subtype_counter_offset as usize, 0);
                image.class_table.push(offset as u32);
            }
            ObjectKind::Str { .. } => {
                image.intern_table.push(offset as u32);
            }
            ObjectKind::ResolutionCache(cache) => {
                for &(slot_offset, array) in &cache.arrays {
                    let kind = self.heap.native(array).kind;
                    let address = if matches!(kind, NativeKind::GcRootArray)
                        && !self.config.preload_resolution_caches
                    {
                        0
                    } else {
                        self.native_address(array, "resolution cache")
                    };
                    image.write_ptr(
                        offset + slot_offset as usize,
                        address,
                        self.config.pointer_size,
                    );
                }
                image.write_ptr(
                    offset + cache.backptr_offset as usize,
                    0,
                    self.config.pointer_size,
                );
            }
            ObjectKind::BoxedMethod {
                method,
                slot_offset,
            } => {
                let address = self.native_address(*method, "boxed method");
                image.write_ptr(
                    offset + *slot_offset as usize,
                    address,
                    self.config.pointer_size,
                );
            }
            ObjectKind::ClassLoader {
                cache_offset,
                allocator_offset,
            } => {
                // Both words are rebuilt lazily after load.
                image.write_ptr(offset + *cache_offset as usize, 0, self.config.pointer_size);
                image.write_ptr(
                    offset + *allocator_offset as usize,
                    0,
                    self.config.pointer_size,
                );
            }
            ObjectKind::PointerArray { elements } => {
                if self.plan.pointer_arrays.contains(&id) {
                    let stride = self.config.pointer_size.bytes();
                    for (index, &element) in elements.iter().enumerate() {
                        let address = self.native_address(element, "pointer array");
                        image.write_ptr(
                            offset + POINTER_ARRAY_ELEMENTS_OFFSET + index * stride,
                            address,
                            self.config.pointer_size,
                        );
                    }
                }
            }
            ObjectKind::Regular => {}
        }
    }

    fn fixup_reference(&self, reference: &RefSlot, offset: usize, image: &mut ImageInfo) {
        let at = offset + reference.offset as usize;
        let address = match reference.target {
            None => 0,
            Some(target) => {
                let object = self.heap.object(target);
                if reference.weak
                    && !object.in_base_image()
                    && self.plan.slot(target).is_none()
                {
                    // Weak referent that did not make it into any image:
                    // already cleared as far as the image is concerned.
                    0
                } else {
                    self.object_address(target)
                }
            }
        };
        image.write_u32(at, address);

        if self.config.is_layered() && records_string_reference(self.heap, self.plan, reference) {
            image.string_references.push((offset as u32, reference.offset));
        }
    }

    /// Materialize the region padding runs as filler objects so the loader
    /// can walk the object area without gaps.
    fn fill_padding(&self, images: &mut [ImageInfo]) {
        let region = self.config.region_size;
        for (image_index, image) in images.iter_mut().enumerate() {
            let padding_offsets = self.layout.images[image_index].padding_offsets.clone();
            if padding_offsets.is_empty() {
                continue;
            }
            let filler_class = self
                .heap
                .filler_class
                .unwrap_or_else(|| panic!("region padding required but no filler class supplied"));
            let filler_address = self.object_address(filler_class);

            for start in padding_offsets {
                let length = align_up(start + 1, region) - start;
                image.write_u32(start + HEADER_OFFSET, HeaderWord::Unlocked.encode());
                image.write_u32(start + CLASS_REF_OFFSET, filler_address);
                // An 8-byte run only fits the prefix and becomes a plain
                // filler instance; longer runs carry their byte length.
                if length > FILLER_LENGTH_OFFSET {
                    image.write_u32(start + FILLER_LENGTH_OFFSET, length as u32);
                }
                image.mark_object(start);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{ClassData, ClassStatus, ModuleFile, ModuleId, NativeData, ObjectData};
    use crate::image::HEADER_BYTES;
    use crate::layout::{finalize, planner, Bin};

    fn class_object(module: ModuleId, def_index: u32) -> ObjectData {
        let mut data = ObjectData::new(64);
        data.kind = ObjectKind::Class(Box::new(ClassData {
            module,
            def_index,
            array_dim: 0,
            descriptor: format!("LCopy{def_index};"),
            status: ClassStatus::Initialized,
            num_static_fields: 1,
            statics_all_final: false,
            super_class: None,
            interfaces: Vec::new(),
            vtable: None,
            iftable_method_arrays: Vec::new(),
            field_arrays: Vec::new(),
            method_arrays: Vec::new(),
            dispatch_table: None,
            conflict_tables: Vec::new(),
            native_refs: Vec::new(),
            status_offset: 16,
            subtype_counter_offset: 20,
        }));
        data
    }

    struct Built {
        images: Vec<ImageInfo>,
        plan: LayoutPlan,
        layout: FinalizedLayout,
    }

    fn build(heap: &Heap, config: &ImageConfig) -> Built {
        let mut plan = planner::plan(heap, config);
        let objects_begin = align_up(HEADER_BYTES, 8);
        let layout = finalize::finalize(heap, &mut plan, config, objects_begin);

        let mut images = Vec::new();
        for (index, finalized) in layout.images.iter().enumerate() {
            let class_bins = [
                Bin::KnownDirty,
                Bin::ClassVerified,
                Bin::ClassInitialized,
                Bin::ClassInitializedFinalStatics,
            ];
            let classes: usize = class_bins.iter().map(|&bin| finalized.bin_count(bin)).sum();
            let image = ImageInfo::new(
                index,
                config.image_base,
                1,
                finalized.clone(),
                finalized.bin_count(Bin::Str),
                classes,
                0,
            )
            .unwrap();
            images.push(image);
        }

        let engine = CopyFixupEngine::new(heap, config, &plan, &layout, &images);
        engine.run(&mut images);
        Built { images, plan, layout }
    }

    fn word(image: &ImageInfo, offset: usize) -> u32 {
        u32::from_le_bytes(image.as_bytes()[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_class_reference_rewritten_to_image_address() {
        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));
        let class = heap.add_object(class_object(module, 0));
        heap.module_mut(module).class_defs.push(class);
        let mut string = ObjectData::new(24);
        string.kind = ObjectKind::Str {
            value: "s".to_string(),
        };
        string.class = Some(class);
        let string = heap.add_object(string);
        heap.module_mut(module).strings.push(string);

        let config = ImageConfig::default();
        let built = build(&heap, &config);
        let image = &built.images[0];

        let string_offset = built.layout.images[0].slot_offset(built.plan.placements[&string]);
        let class_offset = built.layout.images[0].slot_offset(built.plan.placements[&class]);
        assert_eq!(
            word(image, string_offset + CLASS_REF_OFFSET),
            config.image_base + class_offset as u32
        );
        assert!(image.bitmap.is_set(string_offset));
        assert!(image.bitmap.is_set(class_offset));
    }

    #[test]
    fn test_class_status_written_and_counter_reset() {
        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));
        let mut class = class_object(module, 0);
        class.bytes[20..24].copy_from_slice(&0x5555_5555u32.to_le_bytes());
        let class = heap.add_object(class);
        heap.module_mut(module).class_defs.push(class);

        let built = build(&heap, &ImageConfig::default());
        let image = &built.images[0];
        let offset = built.layout.images[0].slot_offset(built.plan.placements[&class]);
        assert_eq!(word(image, offset + 16), ClassStatus::Initialized.wire_value());
        assert_eq!(word(image, offset + 20), 0);
    }

    #[test]
    fn test_saved_hash_restored_in_header() {
        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));
        let mut string = ObjectData::new(24);
        string.kind = ObjectKind::Str {
            value: "h".to_string(),
        };
        string.header = HeaderWord::HashCode(0x1abc);
        let string = heap.add_object(string);
        heap.module_mut(module).strings.push(string);

        let built = build(&heap, &ImageConfig::default());
        let image = &built.images[0];
        let offset = built.layout.images[0].slot_offset(built.plan.placements[&string]);
        assert_eq!(
            word(image, offset + HEADER_OFFSET),
            HeaderWord::HashCode(0x1abc).encode()
        );
    }

    #[test]
    fn test_boxed_method_pointer_fixed_up() {
        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));
        let method = heap.add_native(NativeData::new(NativeKind::RuntimeMethod, 32));
        heap.runtime_methods.push(method);
        let mut boxed = ObjectData::new(24);
        boxed.kind = ObjectKind::BoxedMethod {
            method,
            slot_offset: 8,
        };
        let boxed = heap.add_object(boxed);
        let mut holder = ObjectData::new(16);
        holder.kind = ObjectKind::Str {
            value: "holder".to_string(),
        };
        holder.refs.push(RefSlot {
            offset: 8,
            target: Some(boxed),
            weak: false,
        });
        let holder = heap.add_object(holder);
        heap.module_mut(module).strings.push(holder);

        let config = ImageConfig::default();
        let built = build(&heap, &config);
        let image = &built.images[0];
        let offset = built.layout.images[0].slot_offset(built.plan.placements[&boxed]);
        let relocation = built.plan.relocations.expect(method, "test");
        let expected = config.image_base as u64 + relocation.offset;
        let stored = u64::from_le_bytes(
            image.as_bytes()[offset + 8..offset + 16].try_into().unwrap(),
        );
        assert_eq!(stored, expected);
    }

    #[test]
    fn test_padding_runs_become_fillers() {
        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));
        let filler = heap.add_object(class_object(module, 0));
        heap.module_mut(module).class_defs.push(filler);
        heap.filler_class = Some(filler);
        // Three 96-byte strings starting at a region boundary: the third
        // would straddle the next one.
        for value in ["s0", "s1", "s2"] {
            let mut string = ObjectData::new(96);
            string.kind = ObjectKind::Str {
                value: value.to_string(),
            };
            let string = heap.add_object(string);
            heap.module_mut(module).strings.push(string);
        }

        let config = ImageConfig {
            region_size: 256,
            ..Default::default()
        };
        let built = build(&heap, &config);
        let image = &built.images[0];
        let layout = &built.layout.images[0];
        assert!(!layout.padding_offsets.is_empty());

        let filler_address =
            config.image_base + layout.slot_offset(built.plan.placements[&filler]) as u32;
        for &start in &layout.padding_offsets {
            let length = align_up(start + 1, 256) - start;
            assert_eq!(word(image, start + CLASS_REF_OFFSET), filler_address);
            assert_eq!(word(image, start + FILLER_LENGTH_OFFSET), length as u32);
            assert!(image.bitmap.is_set(start));
        }
    }

    #[test]
    fn test_string_reference_section_skips_base_image_strings() {
        use crate::config::BaseImage;
        use crate::writer::ImageWriter;

        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));

        let mut boot = ObjectData::new(24);
        boot.kind = ObjectKind::Str {
            value: "boot".to_string(),
        };
        boot.base_address = Some(0x6000_0100);
        let boot = heap.add_object(boot);

        let mut local = ObjectData::new(24);
        local.kind = ObjectKind::Str {
            value: "local".to_string(),
        };
        let local = heap.add_object(local);
        heap.module_mut(module).strings.push(local);

        let mut holder = ObjectData::new(32);
        holder.kind = ObjectKind::Str {
            value: "holder".to_string(),
        };
        holder.refs.push(RefSlot {
            offset: 8,
            target: Some(boot),
            weak: false,
        });
        holder.refs.push(RefSlot {
            offset: 12,
            target: Some(local),
            weak: false,
        });
        let holder = heap.add_object(holder);
        heap.module_mut(module).strings.push(holder);

        let config = ImageConfig {
            base_image: Some(BaseImage::default()),
            ..Default::default()
        };
        let mut writer = ImageWriter::new(heap, config).unwrap();
        writer.prepare().unwrap();

        let image = &writer.images()[0];
        let holder_offset = image
            .layout
            .slot_offset(writer.plan().slot(holder).unwrap()) as u32;
        // Only the reference to the locally interned string is recorded;
        // the base-image referent stays out of the section.
        assert_eq!(image.string_references, vec![(holder_offset, 12)]);
    }

    #[test]
    fn test_weak_reference_to_uncopied_object_nulled() {
        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));
        let mut loose = ObjectData::new(16);
        loose.base_address = Some(0x6000_0000);
        let base_target = heap.add_object(loose);

        let mut holder = ObjectData::new(24);
        holder.kind = ObjectKind::Str {
            value: "weak-holder".to_string(),
        };
        holder.refs.push(RefSlot {
            offset: 8,
            target: Some(base_target),
            weak: true,
        });
        let holder = heap.add_object(holder);
        heap.module_mut(module).strings.push(holder);

        let built = build(&heap, &ImageConfig::default());
        let image = &built.images[0];
        let offset = built.layout.images[0].slot_offset(built.plan.placements[&holder]);
        // Base-image referent survives even through a weak slot.
        assert_eq!(word(image, offset + 8), 0x6000_0000);
    }
}
