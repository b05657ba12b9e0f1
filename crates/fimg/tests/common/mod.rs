//! Shared heap fixtures for integration tests.

#![allow(dead_code)]

use fimg::{
    CacheData, CacheSlotKind, ClassData, ClassStatus, Heap, ModuleFile, ModuleId, NativeData,
    NativeId, NativeKind, NativeSlot, ObjectData, ObjectId, ObjectKind, RefSlot, SlotTarget,
    SlotWidth,
};

/// A small but representative snapshot: a three-class hierarchy with native
/// field/method arrays, two interned strings, a resolution cache and a root
/// array.
pub struct Fixture {
    pub heap: Heap,
    pub module: ModuleId,
    pub object_class: ObjectId,
    pub class_a: ObjectId,
    pub class_b: ObjectId,
    pub strings: Vec<ObjectId>,
    pub cache: ObjectId,
    pub cache_array: NativeId,
    pub field_array: NativeId,
    pub method_array: NativeId,
}

pub fn class_data(module: ModuleId, def_index: u32, descriptor: &str) -> ClassData {
    ClassData {
        module,
        def_index,
        array_dim: 0,
        descriptor: descriptor.to_string(),
        status: ClassStatus::Verified,
        num_static_fields: 0,
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
    }
}

pub fn string_object(value: &str, class: Option<ObjectId>) -> ObjectData {
    let mut data = ObjectData::new(8 + ((value.len() + 7) & !7).max(8));
    data.kind = ObjectKind::Str {
        value: value.to_string(),
    };
    data.class = class;
    data
}

pub fn sample_heap() -> Fixture {
    let mut heap = Heap::new();
    let module = heap.add_module(ModuleFile::new("core.mod"));

    let field_array = heap.add_native(NativeData::new(NativeKind::FieldArray, 48));
    let method_array = heap.add_native(NativeData::new(NativeKind::MethodArrayClean, 64));

    // Root of the hierarchy, fully initialized; also serves as the padding
    // filler class.
    let mut object_class = ObjectData::new(64);
    let mut data = class_data(module, 0, "LObject;");
    data.status = ClassStatus::Initialized;
    data.field_arrays.push(field_array);
    data.method_arrays.push(method_array);
    data.native_refs.push((24, field_array));
    data.native_refs.push((32, method_array));
    object_class.kind = ObjectKind::Class(Box::new(data));
    let object_class = heap.add_object(object_class);

    let mut class_a = ObjectData::new(64);
    let mut data = class_data(module, 1, "LA;");
    data.super_class = Some(object_class);
    class_a.kind = ObjectKind::Class(Box::new(data));
    let class_a = heap.add_object(class_a);

    let mut class_b = ObjectData::new(64);
    let mut data = class_data(module, 2, "LB;");
    data.super_class = Some(class_a);
    data.status = ClassStatus::Initialized;
    data.num_static_fields = 2;
    data.statics_all_final = true;
    class_b.kind = ObjectKind::Class(Box::new(data));
    let class_b = heap.add_object(class_b);

    let alpha = heap.add_object(string_object("alpha", Some(object_class)));
    let beta = heap.add_object(string_object("beta", Some(object_class)));

    // One string-kind cache array holding a reference back to "alpha".
    let mut array = NativeData::new(NativeKind::CacheArray(CacheSlotKind::Str), 64);
    array.slots.push(NativeSlot {
        offset: 8,
        target: SlotTarget::Object(alpha),
        width: SlotWidth::Ref32,
    });
    let cache_array = heap.add_native(array);

    let mut cache = ObjectData::new(64);
    cache.kind = ObjectKind::ResolutionCache(Box::new(CacheData {
        module,
        arrays: vec![(16, cache_array)],
        backptr_offset: 48,
    }));
    let cache = heap.add_object(cache);

    let mut roots = ObjectData::new(24);
    roots.refs.push(RefSlot {
        offset: 8,
        target: Some(class_a),
        weak: false,
    });
    roots.refs.push(RefSlot {
        offset: 12,
        target: Some(beta),
        weak: false,
    });
    let roots = heap.add_object(roots);
    heap.root_array = Some(roots);
    heap.filler_class = Some(object_class);

    {
        let module_file = heap.module_mut(module);
        module_file.class_defs.push(object_class);
        module_file.class_defs.push(class_a);
        module_file.class_defs.push(class_b);
        module_file.strings.push(alpha);
        module_file.strings.push(beta);
        module_file.cache = Some(cache);
    }

    Fixture {
        heap,
        module,
        object_class,
        class_a,
        class_b,
        strings: vec![alpha, beta],
        cache,
        cache_array,
        field_array,
        method_array,
    }
}
