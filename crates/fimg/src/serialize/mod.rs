//! Serialization - Writing Image Files to Disk
//!
//! Each image becomes one file: header, payload (raw or LZ4 solid blocks
//! plus a block table), and the liveness bitmap at a page-aligned tail.
//! The whole file is assembled in memory first so the header checksum can
//! cover the final bytes, then written in one shot behind an erase-on-
//! failure guard; a crash never leaves a plausible-looking partial image.
//!
//! Secondary images are finalized first. Their checksums are XOR-folded
//! into the primary's, so a stale secondary invalidates the primary, and
//! the primary file appearing on disk means the whole chain is complete.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use adler32::RollingAdler32;

use crate::config::{ImageConfig, StorageMode};
use crate::error::{FimgError, Result};
use crate::image::{Block, ImageHeader, ImageInfo, Section, SectionId, CHECKSUM_OFFSET, HEADER_BYTES};
use crate::util::{align_up, page_size};

/// Serializes a finished set of image buffers.
pub struct ImageSerializer<'a> {
    config: &'a ImageConfig,
    /// Mapped address of the root object array.
    roots_address: u32,
}

impl<'a> ImageSerializer<'a> {
    pub fn new(config: &'a ImageConfig, roots_address: u32) -> Self {
        Self {
            config,
            roots_address,
        }
    }

    /// Write every image to its path. `images[0]` is the primary and is
    /// written last; its checksum folds in every secondary's.
    pub fn write_all(&self, images: &[ImageInfo], paths: &[PathBuf]) -> Result<()> {
        assert_eq!(images.len(), paths.len(), "one path per image");

        let mut chained = 0u32;
        for (image, path) in images.iter().zip(paths).skip(1) {
            let checksum = self.write_image(image, path, 0)?;
            chained ^= checksum;
        }
        let primary = self.write_image(&images[0], &paths[0], chained)?;
        log::info!(
            "wrote {} image file(s), primary checksum {primary:#010x}",
            images.len()
        );
        Ok(())
    }

    /// Assemble and write one image file. Returns the stored checksum.
    fn write_image(&self, image: &ImageInfo, path: &Path, chained: u32) -> Result<u32> {
        let file_bytes = self.assemble(image, chained)?;

        let mut guard = ImageFileGuard::create(path)?;
        guard.write(&file_bytes)?;
        guard.finalize()?;
        log::debug!(
            "image {} -> {} ({} bytes)",
            image.image_index,
            path.display(),
            file_bytes.len()
        );
        Ok(u32::from_le_bytes(
            file_bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4]
                .try_into()
                .unwrap(),
        ))
    }

    /// Build the complete file in memory, checksum it, patch the header.
    fn assemble(&self, image: &ImageInfo, chained: u32) -> Result<Vec<u8>> {
        let mut file = vec![0u8; HEADER_BYTES];
        let mut blocks: Vec<Block> = Vec::new();

        match self.config.storage_mode {
            StorageMode::Uncompressed => {
                // File offsets equal image offsets; the file can be mapped
                // directly.
                file.extend_from_slice(image.data_bytes());
            }
            StorageMode::Lz4 => {
                let payload = image.data_bytes();
                let max = self.config.max_block_size as usize;
                for (index, chunk) in payload.chunks(max).enumerate() {
                    let compressed = lz4_flex::compress(chunk);
                    blocks.push(Block {
                        storage_mode: StorageMode::Lz4.to_wire(),
                        data_offset: file.len() as u32,
                        data_size: compressed.len() as u32,
                        image_offset: (HEADER_BYTES + index * max) as u32,
                        image_size: chunk.len() as u32,
                    });
                    file.extend_from_slice(&compressed);
                }
            }
        }

        let blocks_offset = if blocks.is_empty() {
            0
        } else {
            let offset = align_up(file.len(), 4);
            file.resize(offset, 0);
            for block in &blocks {
                file.extend_from_slice(&block.pack());
            }
            offset as u32
        };
        let data_size = (file.len() - HEADER_BYTES) as u32;

        // Bitmap tail, page-aligned so the loader can map it directly. In an
        // uncompressed file this lands exactly at the image size; after
        // compression the header's bitmap section records the file offset.
        let bitmap_file_offset = align_up(file.len(), page_size());
        file.resize(bitmap_file_offset, 0);
        file.extend_from_slice(&image.bitmap.to_bytes());

        let header = self.build_header(
            image,
            blocks_offset,
            blocks.len() as u32,
            data_size,
            bitmap_file_offset,
        );
        file[..HEADER_BYTES].copy_from_slice(&header.pack());

        // Checksum the final bytes with the checksum field zeroed, then
        // patch it in. A re-scan of the file reproduces the digest exactly.
        let mut adler = RollingAdler32::new();
        adler.update_buffer(&file);
        let checksum = adler.hash() ^ chained;
        file[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());

        if file.len() != bitmap_file_offset + image.section(SectionId::Bitmap).size as usize {
            return Err(FimgError::Validation(format!(
                "serialized size {} does not match bitmap section end",
                file.len()
            )));
        }
        Ok(file)
    }

    fn build_header(
        &self,
        image: &ImageInfo,
        blocks_offset: u32,
        blocks_count: u32,
        data_size: u32,
        bitmap_file_offset: usize,
    ) -> ImageHeader {
        let mut sections = image.sections;
        sections[SectionId::Bitmap.index()] = Section::new(
            bitmap_file_offset,
            image.section(SectionId::Bitmap).size as usize,
        );
        ImageHeader {
            reservation_size: image.image_size as u32,
            component_count: image.component_count,
            image_begin: image.image_begin,
            image_size: image.image_size as u32,
            image_checksum: 0,
            image_roots: self.roots_address,
            end_of_objects: image.end_of_objects() as u32,
            code_file: self.config.code_file(image.image_index),
            base_image: self.config.base_image.unwrap_or_default(),
            pointer_size: self.config.pointer_size.bytes() as u32,
            storage_mode: self.config.storage_mode.to_wire(),
            blocks_offset,
            blocks_count,
            data_size,
            sections,
        }
    }
}

/// Deletes a partially written image file unless `finalize` ran.
struct ImageFileGuard {
    path: PathBuf,
    file: Option<File>,
    finalized: bool,
}

impl ImageFileGuard {
    fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| FimgError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            finalized: false,
        })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .as_mut()
            .unwrap_or_else(|| unreachable!("guard used after finalize"))
            .write_all(bytes)
            .map_err(|source| FimgError::Io {
                path: self.path.clone(),
                source,
            })
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|source| FimgError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        self.finalized = true;
        Ok(())
    }
}

impl Drop for ImageFileGuard {
    fn drop(&mut self) {
        if !self.finalized {
            drop(self.file.take());
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("could not erase partial image {}: {e}", self.path.display());
            }
        }
    }
}
