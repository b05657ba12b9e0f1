//! Class Retention Analysis
//!
//! Layered builds must not copy classes that the loader could not resolve
//! again: classes with no definition in the build's module files, and any
//! class whose superclass or interface chain reaches such a class. Base
//! builds keep every class.
//!
//! The analysis is a depth-first walk over superclass/interface edges with
//! an explicit stack. Because class hierarchies can contain cycles through
//! interfaces in malformed input, a result is memoized on exit only when no
//! cycle was detected beneath the node; nodes on a cycle are re-evaluated
//! from other entry points.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::heap::{Heap, ObjectId};

/// Set of class nodes that survive into the image.
#[derive(Debug, Default)]
pub struct RetainedClasses {
    retained: FxHashSet<ObjectId>,
    prune_count: usize,
}

impl RetainedClasses {
    /// Whether a class node is retained. Non-class objects are not tracked
    /// here and must not be queried.
    #[inline]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.retained.contains(&id)
    }

    pub fn pruned_count(&self) -> usize {
        self.prune_count
    }
}

/// Compute the retained-class set.
pub fn compute_retained_classes(heap: &Heap, layered: bool) -> RetainedClasses {
    let mut defined: FxHashSet<ObjectId> = FxHashSet::default();
    for (_, module) in heap.modules() {
        defined.extend(module.class_defs.iter().copied());
    }

    let mut result = RetainedClasses::default();
    let mut walker = Walker {
        heap,
        defined: &defined,
        layered,
        memo: FxHashMap::default(),
        stack: Vec::new(),
        stack_index: FxHashMap::default(),
    };

    heap.visit_live_objects(|id| {
        let object = heap.object(id);
        if !object.is_class() || object.in_base_image() {
            return;
        }
        if walker.visit(id).0 {
            result.retained.insert(id);
        } else {
            result.prune_count += 1;
            log::debug!("pruning unretainable {}", heap.describe(id));
        }
    });

    result
}

struct Walker<'a> {
    heap: &'a Heap,
    defined: &'a FxHashSet<ObjectId>,
    layered: bool,
    memo: FxHashMap<ObjectId, bool>,
    stack: Vec<ObjectId>,
    stack_index: FxHashMap<ObjectId, usize>,
}

impl Walker<'_> {
    /// Returns `(kept, lowest stack index reached)`. A lowest index below
    /// the node's own position means a cycle runs beneath it and the result
    /// must not be memoized.
    fn visit(&mut self, id: ObjectId) -> (bool, usize) {
        let object = self.heap.object(id);
        if object.in_base_image() {
            return (true, usize::MAX);
        }
        if let Some(&kept) = self.memo.get(&id) {
            return (kept, usize::MAX);
        }
        if let Some(&index) = self.stack_index.get(&id) {
            // Back edge: optimistic until the cycle head finishes.
            return (true, index);
        }

        let my_index = self.stack.len();
        self.stack.push(id);
        self.stack_index.insert(id, my_index);

        // Base builds keep everything; layered builds require a local
        // definition and a fully retained ancestry.
        let mut kept = !self.layered || self.defined.contains(&id);
        let mut lowest = usize::MAX;
        if kept {
            let class = object.class_data().unwrap_or_else(|| {
                panic!("retention walk reached non-class {}", self.heap.describe(id))
            });
            let deps: Vec<ObjectId> = class
                .super_class
                .into_iter()
                .chain(class.interfaces.iter().copied())
                .collect();
            for dep in deps {
                let (dep_kept, dep_lowest) = self.visit(dep);
                kept &= dep_kept;
                lowest = lowest.min(dep_lowest);
            }
        }

        self.stack.pop();
        self.stack_index.remove(&id);

        if lowest >= my_index {
            self.memo.insert(id, kept);
            (kept, usize::MAX)
        } else {
            (kept, lowest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{ClassData, ClassStatus, ModuleFile, ModuleId, ObjectData, ObjectKind};

    fn class_object(descriptor: &str, module: ModuleId, def_index: u32) -> ObjectData {
        let mut data = ObjectData::new(64);
        data.kind = ObjectKind::Class(Box::new(ClassData {
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
            status_offset: 8,
            subtype_counter_offset: 12,
        }));
        data
    }

    fn set_super(heap: &mut Heap, class: ObjectId, superclass: ObjectId) {
        if let ObjectKind::Class(data) = &mut heap.object_mut(class).kind {
            data.super_class = Some(superclass);
        }
    }

    #[test]
    fn test_base_build_keeps_everything() {
        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));
        let orphan = heap.add_object(class_object("LOrphan;", module, 0));
        let retained = compute_retained_classes(&heap, false);
        assert!(retained.contains(orphan));
    }

    #[test]
    fn test_layered_build_prunes_orphans_transitively() {
        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));
        let orphan = heap.add_object(class_object("LOrphan;", module, 0));
        let child = heap.add_object(class_object("LChild;", module, 1));
        set_super(&mut heap, child, orphan);
        heap.module_mut(module).class_defs.push(child);

        let retained = compute_retained_classes(&heap, true);
        assert!(!retained.contains(orphan));
        assert!(!retained.contains(child));
        assert_eq!(retained.pruned_count(), 2);
    }

    #[test]
    fn test_layered_build_keeps_defined_chain() {
        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));
        let parent = heap.add_object(class_object("LParent;", module, 0));
        let child = heap.add_object(class_object("LChild;", module, 1));
        set_super(&mut heap, child, parent);
        heap.module_mut(module).class_defs.push(parent);
        heap.module_mut(module).class_defs.push(child);

        let retained = compute_retained_classes(&heap, true);
        assert!(retained.contains(parent));
        assert!(retained.contains(child));
    }

    #[test]
    fn test_cycle_does_not_diverge() {
        let mut heap = Heap::new();
        let module = heap.add_module(ModuleFile::new("a.mod"));
        let a = heap.add_object(class_object("LA;", module, 0));
        let b = heap.add_object(class_object("LB;", module, 1));
        set_super(&mut heap, a, b);
        set_super(&mut heap, b, a);
        heap.module_mut(module).class_defs.push(a);
        heap.module_mut(module).class_defs.push(b);

        let retained = compute_retained_classes(&heap, true);
        assert!(retained.contains(a));
        assert!(retained.contains(b));
    }
}
