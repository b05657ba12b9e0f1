//! Heap Snapshot Model
//!
//! The quiesced source heap as the pipeline sees it: an arena of managed
//! objects, an arena of native structures, the module files that define
//! classes and interned strings, and the designated image roots.
//!
//! The embedding runtime populates this model before the build starts and
//! must not mutate it until the build finishes. All cross-references are
//! arena-index handles rather than raw addresses, so identity comparisons
//! and map keys are stable even if the runtime's own objects move.

pub mod native;
pub mod object;

use rustc_hash::FxHashMap;

pub use native::{CacheSlotKind, NativeData, NativeKind, NativeSlot, SlotTarget, SlotWidth};
pub use object::{
    CacheData, ClassData, ClassStatus, HeaderWord, ObjectData, ObjectKind, RefSlot,
    CLASS_REF_OFFSET, FIELDS_OFFSET, FILLER_LENGTH_OFFSET, HEADER_OFFSET,
    POINTER_ARRAY_ELEMENTS_OFFSET,
};

/// Handle to a managed object in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// Handle to a native structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeId(pub u32);

/// Handle to a module file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

/// One module file: the read-only data source supplying class definitions
/// and interned strings, plus its resolution cache.
#[derive(Debug, Clone)]
pub struct ModuleFile {
    /// Source location, for diagnostics.
    pub location: String,
    /// Interned strings in ascending string-table index order.
    pub strings: Vec<ObjectId>,
    /// Class nodes in definition order.
    pub class_defs: Vec<ObjectId>,
    /// Resolution cache node, if the module has one.
    pub cache: Option<ObjectId>,
    /// Output image this module's objects belong to.
    pub image_index: usize,
    /// Whether this module is part of the build's file set. Excluded
    /// modules keep their heap presence but contribute nothing to the
    /// image; their cache nodes are exempt from layout verification.
    pub in_file_set: bool,
}

impl ModuleFile {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            strings: Vec::new(),
            class_defs: Vec::new(),
            cache: None,
            image_index: 0,
            in_file_set: true,
        }
    }
}

/// The quiesced heap snapshot.
#[derive(Debug, Default, Clone)]
pub struct Heap {
    objects: Vec<ObjectData>,
    natives: Vec<NativeData>,
    modules: Vec<ModuleFile>,
    /// Object array holding the designated image roots.
    pub root_array: Option<ObjectId>,
    /// Application class loader, seeded as a root for layered builds.
    pub app_class_loader: Option<ObjectId>,
    /// Class used to materialize padding filler objects.
    pub filler_class: Option<ObjectId>,
    /// Synthetic runtime methods (trampolines, conflict stubs) that every
    /// image needs regardless of reachability.
    pub runtime_methods: Vec<NativeId>,
    /// Strong intern table: string contents to canonical object.
    interned: FxHashMap<String, ObjectId>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, data: ObjectData) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        if let ObjectKind::Str { value } = &data.kind {
            // First intern wins; later duplicates stay non-canonical.
            self.interned.entry(value.clone()).or_insert(id);
        }
        self.objects.push(data);
        id
    }

    pub fn add_native(&mut self, data: NativeData) -> NativeId {
        let id = NativeId(self.natives.len() as u32);
        self.natives.push(data);
        id
    }

    pub fn add_module(&mut self, module: ModuleFile) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(module);
        id
    }

    #[inline]
    pub fn object(&self, id: ObjectId) -> &ObjectData {
        &self.objects[id.0 as usize]
    }

    #[inline]
    pub fn object_mut(&mut self, id: ObjectId) -> &mut ObjectData {
        &mut self.objects[id.0 as usize]
    }

    #[inline]
    pub fn native(&self, id: NativeId) -> &NativeData {
        &self.natives[id.0 as usize]
    }

    #[inline]
    pub fn module(&self, id: ModuleId) -> &ModuleFile {
        &self.modules[id.0 as usize]
    }

    #[inline]
    pub fn module_mut(&mut self, id: ModuleId) -> &mut ModuleFile {
        &mut self.modules[id.0 as usize]
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &ModuleFile)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(i, m)| (ModuleId(i as u32), m))
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Visit every live object exactly once, in arena order.
    ///
    /// The heap must not change while the visit is in progress.
    pub fn visit_live_objects(&self, mut callback: impl FnMut(ObjectId)) {
        for index in 0..self.objects.len() {
            callback(ObjectId(index as u32));
        }
    }

    /// Visit the outgoing references of one object in its layout-defined
    /// order: the class reference first, then each reference slot.
    pub fn visit_references(&self, id: ObjectId, mut callback: impl FnMut(RefSlot)) {
        let object = self.object(id);
        if let Some(class) = object.class {
            callback(RefSlot {
                offset: CLASS_REF_OFFSET as u32,
                target: Some(class),
                weak: false,
            });
        }
        for slot in &object.refs {
            callback(*slot);
        }
    }

    #[inline]
    pub fn object_size(&self, id: ObjectId) -> usize {
        self.object(id).size
    }

    #[inline]
    pub fn object_class(&self, id: ObjectId) -> Option<ObjectId> {
        self.object(id).class
    }

    /// Canonical strong intern for `contents`, if any.
    pub fn lookup_strong_intern(&self, contents: &str) -> Option<ObjectId> {
        self.interned.get(contents).copied()
    }

    /// Whether `id` is the canonical strong intern of its own contents.
    /// Non-canonical duplicates are never copied into an image.
    pub fn is_canonical_intern(&self, id: ObjectId) -> bool {
        match &self.object(id).kind {
            ObjectKind::Str { value } => self.lookup_strong_intern(value) == Some(id),
            _ => false,
        }
    }

    /// Diagnostic identity of an object: kind, class descriptor, handle.
    /// Used when reporting invariant failures.
    pub fn describe(&self, id: ObjectId) -> String {
        let object = self.object(id);
        let kind = match &object.kind {
            ObjectKind::Regular => "object",
            ObjectKind::Class(data) => return format!("class {} (#{})", data.descriptor, id.0),
            ObjectKind::Str { value } => return format!("string {value:?} (#{})", id.0),
            ObjectKind::ResolutionCache(_) => "resolution cache",
            ObjectKind::BoxedMethod { .. } => "boxed method",
            ObjectKind::ClassLoader { .. } => "class loader",
            ObjectKind::PointerArray { .. } => "pointer array",
        };
        match object.class.map(|c| self.object(c)) {
            Some(class_obj) => match class_obj.class_data() {
                Some(data) => format!("{kind} of {} (#{})", data.descriptor, id.0),
                None => format!("{kind} (#{})", id.0),
            },
            None => format!("{kind} (#{})", id.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_object(value: &str) -> ObjectData {
        let mut data = ObjectData::new(16);
        data.kind = ObjectKind::Str {
            value: value.to_string(),
        };
        data
    }

    #[test]
    fn test_intern_first_wins() {
        let mut heap = Heap::new();
        let a = heap.add_object(string_object("hello"));
        let b = heap.add_object(string_object("hello"));
        assert_eq!(heap.lookup_strong_intern("hello"), Some(a));
        assert!(heap.is_canonical_intern(a));
        assert!(!heap.is_canonical_intern(b));
    }

    #[test]
    fn test_visit_references_class_first() {
        let mut heap = Heap::new();
        let class = heap.add_object(ObjectData::new(16));
        let referent = heap.add_object(ObjectData::new(16));
        let mut obj = ObjectData::new(24);
        obj.class = Some(class);
        obj.refs.push(RefSlot {
            offset: 8,
            target: Some(referent),
            weak: false,
        });
        let obj = heap.add_object(obj);

        let mut seen = Vec::new();
        heap.visit_references(obj, |slot| seen.push(slot.target));
        assert_eq!(seen, vec![Some(class), Some(referent)]);
    }

    #[test]
    fn test_visit_live_objects_counts_everything() {
        let mut heap = Heap::new();
        heap.add_object(ObjectData::new(16));
        heap.add_object(ObjectData::new(32));
        let mut count = 0;
        heap.visit_live_objects(|_| count += 1);
        assert_eq!(count, 2);
    }
}
