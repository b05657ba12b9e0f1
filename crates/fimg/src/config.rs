//! Configuration Module - Image Build Parameters
//!
//! All parameters affecting an image build are collected here and passed in
//! by the embedding runtime. There is no CLI surface; the caller constructs
//! an [`ImageConfig`] and hands it to [`crate::ImageWriter`].

use rustc_hash::FxHashSet;

use crate::error::{FimgError, Result};
use crate::util::{is_aligned, OBJECT_ALIGNMENT};

/// On-disk storage mode for image payload blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Payload is written as-is, preserving in-memory alignment so the file
    /// can be mapped directly.
    Uncompressed,
    /// Payload is split into solid blocks and each block is LZ4-compressed
    /// independently.
    Lz4,
}

impl StorageMode {
    /// Wire value stored in the header and in block descriptors.
    pub fn to_wire(self) -> u32 {
        match self {
            StorageMode::Uncompressed => 0,
            StorageMode::Lz4 => 1,
        }
    }

    /// Parse a wire value. Unknown values are a validation error.
    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(StorageMode::Uncompressed),
            1 => Ok(StorageMode::Lz4),
            other => Err(FimgError::Validation(format!(
                "unknown storage mode {other}"
            ))),
        }
    }
}

/// Width of native pointers on the execution target.
///
/// Managed references inside the image are always 32-bit; only native
/// structure pointers (method descriptors, dispatch tables, cache arrays)
/// use the target pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerSize {
    U32,
    U64,
}

impl PointerSize {
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            PointerSize::U32 => 4,
            PointerSize::U64 => 8,
        }
    }
}

/// A previously built, already-loaded image whose contents this build may
/// reference but must not re-copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseImage {
    pub begin: u32,
    pub size: u32,
    pub component_count: u32,
    pub checksum: u32,
}

/// Location of the companion compiled-code file associated with one output
/// image. Recorded verbatim in the image header; this pipeline never reads
/// the companion file itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeFileInfo {
    pub checksum: u32,
    pub begin: u32,
    pub data_begin: u32,
    pub data_end: u32,
    pub end: u32,
}

/// Main configuration for an image build
///
/// # Examples
///
/// ```rust
/// use fimg::{ImageConfig, StorageMode};
///
/// let config = ImageConfig {
///     storage_mode: StorageMode::Lz4,
///     region_size: 256 * 1024,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Payload storage mode.
    ///
    /// Default: `Uncompressed`
    pub storage_mode: StorageMode,

    /// Maximum size of one solid block when compressing.
    ///
    /// A solid block must be decompressed all at once, so this bounds the
    /// loader's scratch requirement.
    /// Default: 16MB
    pub max_block_size: u32,

    /// Fixed region size for heap objects, in bytes.
    ///
    /// When nonzero, no heap object in the image may straddle a
    /// multiple-of-`region_size` boundary; the layout inserts padding filler
    /// where needed. Zero disables region alignment.
    /// Must be a power of two and object-aligned when nonzero.
    /// Default: 0 (disabled)
    pub region_size: usize,

    /// Native pointer width of the execution target.
    ///
    /// Default: `U64`
    pub pointer_size: PointerSize,

    /// Virtual address the first image will be mapped at.
    ///
    /// Must be page-aligned. Secondary images follow contiguously.
    /// Default: 0x7000_0000
    pub image_base: u32,

    /// Number of output image files.
    ///
    /// Each module file in the heap is assigned to one of these images.
    /// Default: 1
    pub image_count: usize,

    /// Class descriptors known (from profiling) to be dirtied at runtime.
    ///
    /// Matching classes are placed in the known-dirty bin.
    pub dirty_object_descriptors: FxHashSet<String>,

    /// Whether resolution caches were preloaded with deterministic contents
    /// before the build. Enables writing their root arrays into the
    /// metadata section.
    /// Default: false
    pub preload_resolution_caches: bool,

    /// Base image this build layers on top of, if any.
    ///
    /// `None` means this build produces the base image itself.
    pub base_image: Option<BaseImage>,

    /// Companion code file locations, one per output image.
    ///
    /// May be left empty; headers then record zeros.
    pub code_files: Vec<CodeFileInfo>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::Uncompressed,
            max_block_size: 16 * 1024 * 1024,
            region_size: 0,
            pointer_size: PointerSize::U64,
            image_base: 0x7000_0000,
            image_count: 1,
            dirty_object_descriptors: FxHashSet::default(),
            preload_resolution_caches: false,
            base_image: None,
            code_files: Vec::new(),
        }
    }
}

impl ImageConfig {
    /// Validate the parameter combination.
    pub fn validate(&self) -> Result<()> {
        if self.image_count == 0 {
            return Err(FimgError::Configuration(
                "image_count must be at least 1".to_string(),
            ));
        }
        if self.max_block_size == 0 {
            return Err(FimgError::Configuration(
                "max_block_size must be nonzero".to_string(),
            ));
        }
        if self.region_size != 0 {
            if !self.region_size.is_power_of_two() {
                return Err(FimgError::Configuration(format!(
                    "region_size {} is not a power of two",
                    self.region_size
                )));
            }
            if !is_aligned(self.region_size, OBJECT_ALIGNMENT) {
                return Err(FimgError::Configuration(format!(
                    "region_size {} is not object-aligned",
                    self.region_size
                )));
            }
        }
        if !is_aligned(self.image_base as usize, 4096) {
            return Err(FimgError::Configuration(format!(
                "image_base {:#x} is not page-aligned",
                self.image_base
            )));
        }
        if self.base_image.is_some() && self.image_count != 1 {
            return Err(FimgError::Configuration(
                "layered builds produce a single image".to_string(),
            ));
        }
        if !self.code_files.is_empty() && self.code_files.len() != self.image_count {
            return Err(FimgError::Configuration(format!(
                "code_files has {} entries for {} images",
                self.code_files.len(),
                self.image_count
            )));
        }
        Ok(())
    }

    /// Whether this build layers on a base image.
    #[inline]
    pub fn is_layered(&self) -> bool {
        self.base_image.is_some()
    }

    /// Companion code file info for one image, zeros if not supplied.
    pub fn code_file(&self, image_index: usize) -> CodeFileInfo {
        self.code_files
            .get(image_index)
            .copied()
            .unwrap_or_default()
    }
}
