//! Image Writer - Pipeline Orchestration
//!
//! Drives the full build: retention analysis, layout planning, offset
//! finalization, buffer allocation, copy and fixup, then serialization.
//! The phases run strictly in order; each consumes the previous phase's
//! output and the source heap stays immutable throughout.

use std::path::PathBuf;

use crate::config::ImageConfig;
use crate::copy::{records_string_reference, CopyFixupEngine};
use crate::error::{FimgError, Result};
use crate::heap::Heap;
use crate::image::{ImageInfo, HEADER_BYTES};
use crate::layout::{finalize, planner, Bin, FinalizedLayout, LayoutPlan};
use crate::serialize::ImageSerializer;
use crate::util::align_up;

/// Bins whose objects are classes, for sizing the class lookup table.
const CLASS_BINS: [Bin; 4] = [
    Bin::KnownDirty,
    Bin::ClassVerified,
    Bin::ClassInitialized,
    Bin::ClassInitializedFinalStatics,
];

/// Everything computed by [`ImageWriter::prepare`].
struct PreparedBuild {
    plan: LayoutPlan,
    layout: FinalizedLayout,
    images: Vec<ImageInfo>,
    roots_address: u32,
}

/// Builds image files from a quiesced heap snapshot.
///
/// # Examples
///
/// ```rust,no_run
/// use fimg::{Heap, ImageConfig, ImageWriter};
///
/// let heap = Heap::new();
/// let mut writer = ImageWriter::new(heap, ImageConfig::default())?;
/// writer.write(&[std::path::PathBuf::from("app.fimg")])?;
/// # Ok::<(), fimg::FimgError>(())
/// ```
pub struct ImageWriter {
    heap: Heap,
    config: ImageConfig,
    prepared: Option<PreparedBuild>,
}

impl ImageWriter {
    /// Take ownership of the snapshot and validate the configuration.
    pub fn new(heap: Heap, config: ImageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            heap,
            config,
            prepared: None,
        })
    }

    /// Run every in-memory phase: layout, allocation, copy. Idempotent;
    /// [`Self::write`] calls it on demand.
    pub fn prepare(&mut self) -> Result<()> {
        if self.prepared.is_some() {
            return Ok(());
        }

        let mut plan = planner::plan(&self.heap, &self.config);
        log::info!(
            "layout planned: {} objects, {} native structures, {} classes pruned",
            plan.object_count(),
            plan.relocations.len(),
            plan.retained.pruned_count()
        );

        let objects_begin = align_up(HEADER_BYTES, 8);
        let layout = finalize::finalize(&self.heap, &mut plan, &self.config, objects_begin);

        let images = self.allocate_images(&plan, &layout)?;
        let total: usize = images.iter().map(|image| image.image_size).sum();
        log::info!("allocated {} image buffer(s), {} bytes", images.len(), total);

        let mut images = images;
        let engine = CopyFixupEngine::new(&self.heap, &self.config, &plan, &layout, &images);
        engine.run(&mut images);
        log::info!("copy and fixup complete");

        let roots_address = match self.heap.root_array {
            Some(roots) => {
                let image = plan.image_of(roots).unwrap_or(0);
                let offset = layout.images[image].slot_offset(plan.placements[&roots]);
                images[image].address_of(offset)
            }
            None => 0,
        };

        self.prepared = Some(PreparedBuild {
            plan,
            layout,
            images,
            roots_address,
        });
        Ok(())
    }

    /// Serialize all images, one file per image, primary last.
    pub fn write(&mut self, paths: &[PathBuf]) -> Result<()> {
        if paths.len() != self.config.image_count {
            return Err(FimgError::Configuration(format!(
                "{} output paths for {} images",
                paths.len(),
                self.config.image_count
            )));
        }
        self.prepare()?;
        let prepared = self.prepared.as_ref().unwrap_or_else(|| unreachable!());

        let serializer = ImageSerializer::new(&self.config, prepared.roots_address);
        serializer.write_all(&prepared.images, paths)?;
        log::info!("image build finished");
        Ok(())
    }

    /// The finished image buffers. Panics before [`Self::prepare`] has run.
    pub fn images(&self) -> &[ImageInfo] {
        &self
            .prepared
            .as_ref()
            .expect("prepare() has not run")
            .images
    }

    /// The finalized layout plan. Panics before [`Self::prepare`] has run.
    pub fn plan(&self) -> &LayoutPlan {
        &self.prepared.as_ref().expect("prepare() has not run").plan
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    fn allocate_images(
        &self,
        plan: &LayoutPlan,
        layout: &FinalizedLayout,
    ) -> Result<Vec<ImageInfo>> {
        let string_reference_counts = self.count_string_references(plan);

        let mut images = Vec::with_capacity(self.config.image_count);
        let mut next_begin = self.config.image_base;
        for (index, finalized) in layout.images.iter().enumerate() {
            let components = self
                .heap
                .modules()
                .filter(|(_, module)| module.in_file_set && module.image_index == index)
                .count() as u32;
            let class_entries: usize = CLASS_BINS
                .iter()
                .map(|&bin| finalized.bin_count(bin))
                .sum();

            let image = ImageInfo::new(
                index,
                next_begin,
                components,
                finalized.clone(),
                finalized.bin_count(Bin::Str),
                class_entries,
                string_reference_counts[index],
            )?;
            next_begin += image.image_size as u32;
            images.push(image);
        }
        Ok(images)
    }

    /// Count the managed string-reference slots each image will record.
    /// Only layered builds carry the section.
    fn count_string_references(&self, plan: &LayoutPlan) -> Vec<usize> {
        let mut counts = vec![0usize; self.config.image_count];
        if !self.config.is_layered() {
            return counts;
        }
        for (&id, _) in &plan.placements {
            let image = plan.image_of(id).unwrap_or(0);
            for reference in &self.heap.object(id).refs {
                if records_string_reference(&self.heap, plan, reference) {
                    counts[image] += 1;
                }
            }
        }
        counts
    }
}
