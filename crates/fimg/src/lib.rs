//! # fimg - Managed-Heap Image Writer
//!
//! `fimg` serializes a quiesced managed heap into relocatable image files
//! that a runtime can map and use with minimal startup work. The embedding
//! runtime hands over a [`Heap`] snapshot and an [`ImageConfig`]; the
//! writer plans a dirtiness-aware layout, relocates every managed and
//! native pointer to its final mapped address, and writes one file per
//! output image.
//!
//! ## Pipeline
//!
//! ```text
//! Heap snapshot
//!     |  retention analysis (layered builds prune unresolvable classes)
//!     v
//! Layout plan      - bin slots, native relocations, deterministic order
//!     |  offset finalization (bin packing, region padding)
//!     v
//! Image buffers    - copy + fixup, lookup tables, liveness bitmap
//!     |  serialization (optional LZ4 blocks, checksum, atomic file write)
//!     v
//! Image files      - primary written last, checksum-chained
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use fimg::{Heap, ImageConfig, ImageWriter, StorageMode};
//!
//! let heap = Heap::new(); // populated by the embedding runtime
//! let config = ImageConfig {
//!     storage_mode: StorageMode::Lz4,
//!     ..Default::default()
//! };
//! let mut writer = ImageWriter::new(heap, config)?;
//! writer.write(&[std::path::PathBuf::from("boot.fimg")])?;
//! # Ok::<(), fimg::FimgError>(())
//! ```
//!
//! ## Guarantees
//!
//! - Two builds of the same snapshot produce byte-identical files.
//! - The source heap is never mutated; placement lives in side tables.
//! - A failed write never leaves a partial image file behind.
//! - With a nonzero region size, no object straddles a region boundary.

pub mod config;
pub mod copy;
pub mod error;
pub mod heap;
pub mod image;
pub mod layout;
pub mod serialize;
pub mod util;
pub mod writer;

pub use config::{BaseImage, CodeFileInfo, ImageConfig, PointerSize, StorageMode};
pub use error::{FimgError, Result};
pub use heap::{
    CacheData, CacheSlotKind, ClassData, ClassStatus, HeaderWord, Heap, ModuleFile, ModuleId,
    NativeData, NativeId, NativeKind, NativeSlot, ObjectData, ObjectId, ObjectKind, RefSlot,
    SlotTarget, SlotWidth,
};
pub use image::{ImageHeader, ImageInfo, SectionId};
pub use writer::ImageWriter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
