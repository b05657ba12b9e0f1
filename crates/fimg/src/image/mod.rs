//! Image Assembly - Buffers, Header and Sections
//!
//! Everything that describes one output image after layout: the header
//! format, the section table, the liveness bitmap, and the anonymous
//! mapping the copy pass fills in.

pub mod bitmap;
pub mod header;
pub mod info;
pub mod section;

pub use bitmap::LivenessBitmap;
pub use header::{Block, ImageHeader, BLOCK_BYTES, CHECKSUM_OFFSET, HEADER_BYTES, MAGIC, VERSION};
pub use info::ImageInfo;
pub use section::{Section, SectionId};
