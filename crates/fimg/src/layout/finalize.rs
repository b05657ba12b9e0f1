//! Offset Finalization - From Intra-Bin Slots to Image Offsets
//!
//! Converts the planner's intra-bin offsets into image-relative offsets:
//! lays the bins out back to back with per-bin alignment, inserts region
//! padding where a heap object would straddle a region boundary, and
//! rebases the native relocation table.
//!
//! After this pass an object's image offset is
//! `bin_begin(slot.bin()) + slot.offset()` and never changes again.

use crate::config::ImageConfig;
use crate::heap::Heap;
use crate::layout::bin::{Bin, BinSlot};
use crate::layout::planner::LayoutPlan;
use crate::util::{align_up, OBJECT_ALIGNMENT};

/// Finalized layout of one output image's bin area.
#[derive(Debug, Clone)]
pub struct FinalizedImage {
    /// Image-relative start offset of each bin, indexed by `Bin::index()`.
    pub bin_offsets: Vec<usize>,
    /// Bin sizes including any region padding.
    pub bin_sizes: Vec<usize>,
    /// Entity count per bin.
    pub bin_counts: Vec<usize>,
    /// Image-relative start offsets of padding filler runs, in layout
    /// order. Each run extends to the next region boundary.
    pub padding_offsets: Vec<usize>,
    /// End of the last bin; tables and the bitmap follow.
    pub objects_end: usize,
}

impl FinalizedImage {
    #[inline]
    pub fn bin_begin(&self, bin: Bin) -> usize {
        self.bin_offsets[bin.index()]
    }

    #[inline]
    pub fn bin_size(&self, bin: Bin) -> usize {
        self.bin_sizes[bin.index()]
    }

    #[inline]
    pub fn bin_end(&self, bin: Bin) -> usize {
        self.bin_begin(bin) + self.bin_size(bin)
    }

    #[inline]
    pub fn bin_count(&self, bin: Bin) -> usize {
        self.bin_counts[bin.index()]
    }

    /// End of the managed-object bins; native bins follow.
    #[inline]
    pub fn heap_objects_end(&self) -> usize {
        self.bin_end(Bin::from_index(Bin::HEAP_COUNT - 1))
    }

    /// Image-relative offset of a finalized slot.
    #[inline]
    pub fn slot_offset(&self, slot: BinSlot) -> usize {
        self.bin_begin(slot.bin()) + slot.offset()
    }
}

/// Finalized layout of every output image.
#[derive(Debug)]
pub struct FinalizedLayout {
    pub images: Vec<FinalizedImage>,
}

/// Required start alignment of a bin. Native method and table bins carry
/// target-pointer-width records; everything else is object-aligned.
fn bin_alignment(bin: Bin, pointer_bytes: usize) -> usize {
    match bin {
        Bin::MethodClean
        | Bin::MethodDirty
        | Bin::DispatchTable
        | Bin::ConflictTable
        | Bin::RuntimeMethod => pointer_bytes,
        _ => OBJECT_ALIGNMENT,
    }
}

/// Tracks the space left before the next region boundary while walking a
/// heap bin, inserting padding runs where an object would not fit.
struct RegionCursor {
    region: usize,
    remaining: usize,
    /// Intra-bin offset after padding.
    offset: usize,
    /// Total padding inserted so far.
    padding: usize,
    /// Intra-bin offsets of padding runs.
    runs: Vec<usize>,
}

impl RegionCursor {
    fn pad(&mut self) {
        debug_assert!(self.remaining != 0 && self.remaining < self.region);
        self.runs.push(self.offset);
        self.padding += self.remaining;
        self.offset += self.remaining;
        self.remaining = self.region;
    }
}

/// Lay out all bins of all images and rebase the relocation table.
///
/// `objects_begin` is the image-relative offset where the first bin starts,
/// directly after the header.
pub fn finalize(
    heap: &Heap,
    plan: &mut LayoutPlan,
    config: &ImageConfig,
    objects_begin: usize,
) -> FinalizedLayout {
    let region = config.region_size;
    let pointer_bytes = config.pointer_size.bytes();
    let mut images = Vec::with_capacity(config.image_count);

    for image in 0..config.image_count {
        let mut bin_offsets = vec![0usize; Bin::COUNT];
        let mut bin_sizes = plan.bin_sizes[image].clone();
        let bin_counts = plan.bin_counts[image].clone();
        let mut padding_offsets = Vec::new();
        let mut bin_offset = objects_begin;

        for bin in Bin::ALL {
            bin_offset = align_up(bin_offset, bin_alignment(bin, pointer_bytes));
            bin_offsets[bin.index()] = bin_offset;

            if bin.is_heap_bin() && region != 0 {
                let mut cursor = RegionCursor {
                    region,
                    remaining: align_up(bin_offset + 1, region) - bin_offset,
                    offset: 0,
                    padding: 0,
                    runs: Vec::new(),
                };
                for &id in &plan.bin_objects[image][bin.index()] {
                    let slot = plan.placements[&id];
                    debug_assert_eq!(slot.bin(), bin);
                    debug_assert_eq!(slot.offset() + cursor.padding, cursor.offset);
                    let size = align_up(heap.object_size(id), OBJECT_ALIGNMENT);

                    if size > cursor.remaining {
                        // Not at a region boundary with an object that does
                        // not fit: pad to the boundary first.
                        if cursor.remaining != cursor.region {
                            cursor.pad();
                        }
                        debug_assert_eq!(cursor.remaining, cursor.region);
                        // Oversized objects span whole regions; extend the
                        // budget so the next boundary falls past them.
                        if size > cursor.region {
                            cursor.remaining = align_up(size + 1, cursor.region);
                        }
                    } else if cursor.remaining == size {
                        cursor.remaining += cursor.region;
                    }
                    debug_assert!(cursor.remaining > size);
                    cursor.remaining -= size;
                    plan.placements.insert(id, BinSlot::new(bin, cursor.offset));
                    cursor.offset += size;
                    // An oversized object with an unaligned tail pads out
                    // its final region.
                    if size > cursor.region && cursor.remaining != cursor.region {
                        cursor.pad();
                    }
                }
                bin_sizes[bin.index()] += cursor.padding;
                padding_offsets.extend(cursor.runs.into_iter().map(|run| bin_offset + run));
            }

            bin_offset += bin_sizes[bin.index()];
        }

        images.push(FinalizedImage {
            bin_offsets,
            bin_sizes,
            bin_counts,
            padding_offsets,
            objects_end: bin_offset,
        });
    }

    plan.relocations
        .rebase(|image, bin| images[image].bin_offsets[bin.index()] as u64);

    FinalizedLayout { images }
}
