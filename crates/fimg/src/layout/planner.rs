//! Layout Planner - Bin Slot Assignment and Native Registration
//!
//! Walks the heap snapshot and assigns every copied object a bin slot and
//! an output image, registering the native structures each object owns as
//! it is visited. Placement is recorded out of band in handle-keyed maps;
//! source objects are never mutated.
//!
//! The walk order is deterministic: retained classes first in sorted
//! (module, definition index, array dimension) order, then each module's
//! interned strings and resolution cache in module order, drained through a
//! plain FIFO queue; the image roots are assigned only after that drain
//! completes, then drained in turn. Two runs over the same snapshot produce
//! identical layouts.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::ImageConfig;
use crate::heap::{Heap, HeaderWord, NativeId, NativeKind, ObjectId, ObjectKind};
use crate::layout::bin::{Bin, BinSlot};
use crate::layout::classify::classify;
use crate::layout::prune::{compute_retained_classes, RetainedClasses};
use crate::layout::relocation::{bin_for_native_kind, NativeRelocation, RelocationTable};
use crate::util::{align_up, OBJECT_ALIGNMENT};

/// Result of the planning walk: placements, relocations and per-bin totals,
/// all still intra-bin until offset finalization.
#[derive(Debug)]
pub struct LayoutPlan {
    /// Planned bin slot per copied object.
    pub placements: FxHashMap<ObjectId, BinSlot>,
    /// Output image per copied object.
    pub image_assignment: FxHashMap<ObjectId, usize>,
    /// Objects per image and bin, in assignment order. Indexed
    /// `[image][bin.index()]`.
    pub bin_objects: Vec<Vec<Vec<ObjectId>>>,
    /// Accumulated byte size per image and bin.
    pub bin_sizes: Vec<Vec<usize>>,
    /// Entity count per image and bin.
    pub bin_counts: Vec<Vec<usize>>,
    /// Native structure destinations, in registration order.
    pub relocations: RelocationTable,
    /// Int/long arrays flagged as method-pointer arrays during layout.
    pub pointer_arrays: FxHashSet<ObjectId>,
    /// Identity hashes captured from header words, restored during copy.
    pub saved_hashes: FxHashMap<ObjectId, u32>,
    /// Classes surviving retention analysis.
    pub retained: RetainedClasses,
}

impl LayoutPlan {
    /// Planned slot of an object, or `None` when it is not copied.
    #[inline]
    pub fn slot(&self, id: ObjectId) -> Option<BinSlot> {
        self.placements.get(&id).copied()
    }

    /// Output image of a copied object.
    #[inline]
    pub fn image_of(&self, id: ObjectId) -> Option<usize> {
        self.image_assignment.get(&id).copied()
    }

    pub fn object_count(&self) -> usize {
        self.placements.len()
    }
}

/// Plan the layout of every copied object and native structure.
///
/// Panics when the snapshot violates the quiescence contract (a locked
/// object) or when the verification pass finds reachable objects without a
/// slot; both are caller bugs, not recoverable conditions.
pub fn plan(heap: &Heap, config: &ImageConfig) -> LayoutPlan {
    let mut planner = Planner::new(heap, config);
    planner.register_runtime_methods();
    planner.assign_classes();
    planner.assign_module_objects();
    planner.drain_queue();
    planner.assign_roots();
    planner.drain_queue();
    planner.verify();
    planner.finish()
}

struct Planner<'a> {
    heap: &'a Heap,
    config: &'a ImageConfig,
    retained: RetainedClasses,
    placements: FxHashMap<ObjectId, BinSlot>,
    image_assignment: FxHashMap<ObjectId, usize>,
    bin_objects: Vec<Vec<Vec<ObjectId>>>,
    bin_sizes: Vec<Vec<usize>>,
    bin_counts: Vec<Vec<usize>>,
    relocations: RelocationTable,
    pointer_arrays: FxHashSet<ObjectId>,
    saved_hashes: FxHashMap<ObjectId, u32>,
    queue: VecDeque<(ObjectId, usize)>,
}

impl<'a> Planner<'a> {
    fn new(heap: &'a Heap, config: &'a ImageConfig) -> Self {
        let images = config.image_count;
        Self {
            heap,
            config,
            retained: compute_retained_classes(heap, config.is_layered()),
            placements: FxHashMap::default(),
            image_assignment: FxHashMap::default(),
            bin_objects: vec![vec![Vec::new(); Bin::COUNT]; images],
            bin_sizes: vec![vec![0; Bin::COUNT]; images],
            bin_counts: vec![vec![0; Bin::COUNT]; images],
            relocations: RelocationTable::new(),
            pointer_arrays: FxHashSet::default(),
            saved_hashes: FxHashMap::default(),
            queue: VecDeque::new(),
        }
    }

    /// Synthetic runtime methods go into the primary image unconditionally;
    /// nothing on the heap owns them.
    fn register_runtime_methods(&mut self) {
        for &method in &self.heap.runtime_methods {
            self.register_native(method, 0);
        }
    }

    /// Retained classes are assigned first, in sorted definition order, so
    /// class placement never depends on reachability order.
    fn assign_classes(&mut self) {
        let mut classes: Vec<(u32, u32, u32, ObjectId)> = Vec::new();
        self.heap.visit_live_objects(|id| {
            let object = self.heap.object(id);
            if object.in_base_image() || !self.retained.contains(id) {
                return;
            }
            if let Some(class) = object.class_data() {
                classes.push((class.module.0, class.def_index, class.array_dim, id));
            }
        });
        classes.sort_unstable();

        for (module, _, _, id) in classes {
            let image = self.module_image(module as usize);
            self.assign_slot(id, image);
            self.queue.push_back((id, image));
        }
    }

    /// Per-module interned strings (ascending string-table order) and the
    /// module's resolution cache.
    fn assign_module_objects(&mut self) {
        let modules: Vec<_> = self
            .heap
            .modules()
            .map(|(id, module)| (id, module.clone()))
            .collect();
        for (_, module) in modules {
            if !module.in_file_set {
                continue;
            }
            let image = self.clamp_image(module.image_index);
            for &string in &module.strings {
                let object = self.heap.object(string);
                if object.in_base_image()
                    || !self.heap.is_canonical_intern(string)
                    || self.placements.contains_key(&string)
                {
                    continue;
                }
                self.assign_slot(string, image);
                self.queue.push_back((string, image));
            }
            if let Some(cache) = module.cache {
                if !self.heap.object(cache).in_base_image()
                    && !self.placements.contains_key(&cache)
                {
                    self.assign_slot(cache, image);
                    self.queue.push_back((cache, image));
                }
            }
        }
    }

    /// The designated image roots, assigned after everything reachable from
    /// the class and module seeds already has a slot. The root array always
    /// lands in the primary image; the application class loader is a root
    /// only for layered builds.
    fn assign_roots(&mut self) {
        if let Some(roots) = self.heap.root_array {
            self.maybe_assign(roots, 0);
        }
        if self.config.is_layered() {
            if let Some(loader) = self.heap.app_class_loader {
                self.maybe_assign(loader, 0);
            }
        }
    }

    fn drain_queue(&mut self) {
        while let Some((id, image)) = self.queue.pop_front() {
            self.register_owned_natives(id, image);

            let mut targets: Vec<ObjectId> = Vec::new();
            self.heap.visit_references(id, |slot| {
                if slot.weak {
                    return;
                }
                if let Some(target) = slot.target {
                    targets.push(target);
                }
            });
            for target in targets {
                self.maybe_assign(target, image);
            }
        }
    }

    /// Register the native structures hanging off one object. Runs exactly
    /// once per object, when it is popped from the queue.
    fn register_owned_natives(&mut self, id: ObjectId, image: usize) {
        match &self.heap.object(id).kind {
            ObjectKind::Class(class) => {
                for &array in &class.field_arrays {
                    self.register_native(array, image);
                }
                for &array in &class.method_arrays {
                    self.register_native(array, image);
                }
                if let Some(table) = class.dispatch_table {
                    self.register_native(table, image);
                }
                for &table in &class.conflict_tables {
                    self.register_native(table, image);
                }
            }
            ObjectKind::ResolutionCache(cache) => {
                for &(_, array) in &cache.arrays {
                    let kind = self.heap.native(array).kind;
                    if matches!(kind, NativeKind::GcRootArray)
                        && !self.config.preload_resolution_caches
                    {
                        continue;
                    }
                    self.register_native(array, image);
                }
            }
            _ => {}
        }
    }

    fn register_native(&mut self, id: NativeId, image: usize) {
        let native = self.heap.native(id);
        let bin = bin_for_native_kind(native.kind);
        let offset = self.bin_sizes[image][bin.index()];
        self.relocations.insert(
            id,
            NativeRelocation {
                image_index: image,
                offset: offset as u64,
                kind: native.kind,
            },
        );
        self.bin_sizes[image][bin.index()] =
            offset + align_up(native.size(), OBJECT_ALIGNMENT);
        self.bin_counts[image][bin.index()] += 1;
    }

    /// Assign `id` if it is copied at all: base-image objects, pruned
    /// classes, non-canonical interns and excluded-module caches are not.
    fn maybe_assign(&mut self, id: ObjectId, image: usize) {
        if self.placements.contains_key(&id) {
            return;
        }
        let object = self.heap.object(id);
        if object.in_base_image() {
            return;
        }
        match &object.kind {
            ObjectKind::Class(_) if !self.retained.contains(id) => return,
            ObjectKind::Str { .. } if !self.heap.is_canonical_intern(id) => return,
            ObjectKind::ResolutionCache(cache)
                if !self.heap.module(cache.module).in_file_set =>
            {
                return;
            }
            _ => {}
        }
        self.assign_slot(id, image);
        self.queue.push_back((id, image));
    }

    fn assign_slot(&mut self, id: ObjectId, image: usize) {
        assert!(
            !self.placements.contains_key(&id),
            "bin slot assigned twice for {}",
            self.heap.describe(id)
        );
        let object = self.heap.object(id);
        if object.header.is_locked() {
            panic!(
                "locked object in quiesced heap: {}",
                self.heap.describe(id)
            );
        }
        if let HeaderWord::HashCode(hash) = object.header {
            self.saved_hashes.insert(id, hash);
        }

        let bin = classify(
            self.heap,
            id,
            &self.config.dirty_object_descriptors,
            &mut self.pointer_arrays,
        );
        let offset = self.bin_sizes[image][bin.index()];
        self.placements.insert(id, BinSlot::new(bin, offset));
        self.image_assignment.insert(id, image);
        self.bin_objects[image][bin.index()].push(id);
        self.bin_sizes[image][bin.index()] = offset + align_up(object.size, OBJECT_ALIGNMENT);
        self.bin_counts[image][bin.index()] += 1;
    }

    fn module_image(&self, module_index: usize) -> usize {
        let module = self.heap.module(crate::heap::ModuleId(module_index as u32));
        self.clamp_image(module.image_index)
    }

    fn clamp_image(&self, image: usize) -> usize {
        assert!(
            image < self.config.image_count,
            "module assigned to image {image} of {}",
            self.config.image_count
        );
        image
    }

    /// Every live object must either have a slot or be exempt. Anything
    /// else means the planner missed a reachable object, and copying would
    /// silently emit dangling references.
    fn verify(&self) {
        let mut missing: Vec<ObjectId> = Vec::new();
        self.heap.visit_live_objects(|id| {
            if self.placements.contains_key(&id) {
                return;
            }
            let object = self.heap.object(id);
            if object.in_base_image() {
                return;
            }
            let exempt = match &object.kind {
                ObjectKind::Class(_) => !self.retained.contains(id),
                ObjectKind::Str { .. } => !self.heap.is_canonical_intern(id),
                ObjectKind::ResolutionCache(cache) => {
                    !self.heap.module(cache.module).in_file_set
                }
                _ => false,
            };
            if !exempt {
                missing.push(id);
            }
        });

        if !missing.is_empty() {
            for &id in missing.iter().take(5) {
                log::error!("object without bin slot: {}", self.heap.describe(id));
            }
            panic!("Found {} objects without assigned bin slots", missing.len());
        }
    }

    fn finish(self) -> LayoutPlan {
        log::debug!(
            "planned {} objects and {} native structures across {} images",
            self.placements.len(),
            self.relocations.len(),
            self.config.image_count
        );
        LayoutPlan {
            placements: self.placements,
            image_assignment: self.image_assignment,
            bin_objects: self.bin_objects,
            bin_sizes: self.bin_sizes,
            bin_counts: self.bin_counts,
            relocations: self.relocations,
            pointer_arrays: self.pointer_arrays,
            saved_hashes: self.saved_hashes,
            retained: self.retained,
        }
    }
}
