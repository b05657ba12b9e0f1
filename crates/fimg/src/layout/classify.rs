//! Bin Classification
//!
//! Decides which bin an object belongs to. Pure apart from registering
//! discovered method-pointer arrays, which are value-carrying but never
//! independently dirtied and therefore always land in the regular bin with
//! post-copy pointer fixup.

use rustc_hash::FxHashSet;

use crate::heap::{Heap, ObjectId, ObjectKind};
use crate::layout::bin::Bin;

/// Classify one live object.
///
/// Decision order for classes: known-dirty descriptor match, then
/// initialized-with-all-final-statics, then initialized, then verified.
/// Strings get the string bin; resolution caches and objects with
/// synchronization history are expected to dirty their pages and go to the
/// misc-dirty bin.
pub fn classify(
    heap: &Heap,
    id: ObjectId,
    dirty_descriptors: &FxHashSet<String>,
    pointer_arrays: &mut FxHashSet<ObjectId>,
) -> Bin {
    let object = heap.object(id);
    match &object.kind {
        ObjectKind::Class(class) => {
            // The dispatch arrays hang off the class but are discovered
            // here, while the class itself is being placed.
            if let Some(vtable) = class.vtable {
                pointer_arrays.insert(vtable);
            }
            for &array in &class.iftable_method_arrays {
                pointer_arrays.insert(array);
            }

            if dirty_descriptors.contains(&class.descriptor) {
                Bin::KnownDirty
            } else if class.status == crate::heap::ClassStatus::Initialized {
                if class.num_static_fields == 0 || class.statics_all_final {
                    Bin::ClassInitializedFinalStatics
                } else {
                    Bin::ClassInitialized
                }
            } else {
                Bin::ClassVerified
            }
        }
        ObjectKind::Str { .. } => Bin::Str,
        ObjectKind::ResolutionCache(_) => Bin::MiscDirty,
        _ if object.sync_history => Bin::MiscDirty,
        _ => Bin::Regular,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{ClassData, ClassStatus, ModuleId, ObjectData};

    fn class_object(status: ClassStatus, statics_all_final: bool, num_statics: u32) -> ObjectData {
        let mut data = ObjectData::new(64);
        data.kind = ObjectKind::Class(Box::new(ClassData {
            module: ModuleId(0),
            def_index: 0,
            array_dim: 0,
            descriptor: "LTest;".to_string(),
            status,
            num_static_fields: num_statics,
            statics_all_final,
            super_class: None,
            interfaces: Vec::new(),
            vtable: None,
            iftable_method_arrays: Vec::new(),
            field_arrays: Vec::new(),
            method_arrays: Vec::new(),
            dispatch_table: None,
            conflict_tables: Vec::new(),
            native_refs: Vec::new(),
            status_offset: 8,
            subtype_counter_offset: 12,
        }));
        data
    }

    fn classify_one(heap: &Heap, id: ObjectId) -> Bin {
        let mut arrays = FxHashSet::default();
        classify(heap, id, &FxHashSet::default(), &mut arrays)
    }

    #[test]
    fn test_class_bins() {
        let mut heap = Heap::new();
        let verified = heap.add_object(class_object(ClassStatus::Verified, false, 2));
        let initialized = heap.add_object(class_object(ClassStatus::Initialized, false, 2));
        let final_statics = heap.add_object(class_object(ClassStatus::Initialized, true, 2));
        let no_statics = heap.add_object(class_object(ClassStatus::Initialized, false, 0));

        assert_eq!(classify_one(&heap, verified), Bin::ClassVerified);
        assert_eq!(classify_one(&heap, initialized), Bin::ClassInitialized);
        assert_eq!(classify_one(&heap, final_statics), Bin::ClassInitializedFinalStatics);
        assert_eq!(classify_one(&heap, no_statics), Bin::ClassInitializedFinalStatics);
    }

    #[test]
    fn test_dirty_descriptor_overrides_status() {
        let mut heap = Heap::new();
        let id = heap.add_object(class_object(ClassStatus::Initialized, true, 0));
        let mut dirty = FxHashSet::default();
        dirty.insert("LTest;".to_string());
        let mut arrays = FxHashSet::default();
        assert_eq!(classify(&heap, id, &dirty, &mut arrays), Bin::KnownDirty);
    }

    #[test]
    fn test_sync_history_is_misc_dirty() {
        let mut heap = Heap::new();
        let mut data = ObjectData::new(16);
        data.sync_history = true;
        let id = heap.add_object(data);
        assert_eq!(classify_one(&heap, id), Bin::MiscDirty);
    }

    #[test]
    fn test_vtable_registration() {
        let mut heap = Heap::new();
        let mut array = ObjectData::new(24);
        array.kind = ObjectKind::PointerArray { elements: Vec::new() };
        let vtable = heap.add_object(array);

        let mut class = class_object(ClassStatus::Verified, false, 0);
        if let ObjectKind::Class(data) = &mut class.kind {
            data.vtable = Some(vtable);
        }
        let class = heap.add_object(class);

        let mut arrays = FxHashSet::default();
        classify(&heap, class, &FxHashSet::default(), &mut arrays);
        assert!(arrays.contains(&vtable));
    }
}
