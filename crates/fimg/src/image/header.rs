//! Image Header - Fixed-Size File Preamble
//!
//! Every image file starts with a fixed little-endian header: magic,
//! format version, address-space geometry, checksums, companion-file and
//! base-image records, storage mode, the block table location and the
//! section table. All fields are 32-bit; the format addresses at most 4GB.
//!
//! The header is written last: its checksum field covers the final header
//! bytes (with the checksum itself zeroed) plus everything after the
//! header, so any serialized byte flips the checksum.

use crate::config::{BaseImage, CodeFileInfo};
use crate::error::{FimgError, Result};
use crate::image::section::{Section, SectionId};

/// File magic, first four bytes of every image.
pub const MAGIC: [u8; 4] = *b"FIMG";
/// Current format version.
pub const VERSION: u32 = 1;
/// Serialized header size: magic, version, 21 scalar fields, 12 sections.
pub const HEADER_BYTES: usize = 8 + 21 * 4 + SectionId::COUNT * 8;
/// Byte offset of the checksum field, zeroed while checksumming.
pub const CHECKSUM_OFFSET: usize = 24;

/// Storage descriptor of one compressed payload block.
///
/// Uncompressed images have no block table; the whole payload is one
/// implicit identity block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Wire value of the block's storage mode.
    pub storage_mode: u32,
    /// File offset of the stored (possibly compressed) bytes.
    pub data_offset: u32,
    /// Stored byte count.
    pub data_size: u32,
    /// Destination offset in the mapped image.
    pub image_offset: u32,
    /// Decompressed byte count.
    pub image_size: u32,
}

/// Serialized size of one block descriptor.
pub const BLOCK_BYTES: usize = 5 * 4;

impl Block {
    pub fn pack(&self) -> [u8; BLOCK_BYTES] {
        let mut bytes = [0u8; BLOCK_BYTES];
        let fields = [
            self.storage_mode,
            self.data_offset,
            self.data_size,
            self.image_offset,
            self.image_size,
        ];
        for (index, field) in fields.iter().enumerate() {
            bytes[index * 4..index * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_BYTES {
            return Err(FimgError::Validation(format!(
                "block descriptor truncated: {} of {BLOCK_BYTES} bytes",
                bytes.len()
            )));
        }
        let mut reader = Reader::new(bytes);
        Ok(Self {
            storage_mode: reader.u32(),
            data_offset: reader.u32(),
            data_size: reader.u32(),
            image_offset: reader.u32(),
            image_size: reader.u32(),
        })
    }
}

/// Parsed or to-be-written header of one image file.
#[derive(Debug, Clone, Default)]
pub struct ImageHeader {
    /// Page-aligned address-space span to reserve for this image.
    pub reservation_size: u32,
    /// Module files contributing to this image.
    pub component_count: u32,
    /// Virtual address the image must be mapped at.
    pub image_begin: u32,
    /// Mapped image size, page-aligned, bitmap excluded.
    pub image_size: u32,
    /// Adler-32 over the final header (checksum field zeroed) and all file
    /// bytes after the header, XORed with every dependency's checksum.
    pub image_checksum: u32,
    /// Address of the root object array.
    pub image_roots: u32,
    /// End of the managed-object area, image-relative.
    pub end_of_objects: u32,
    /// Companion compiled-code file record, zeros when absent.
    pub code_file: CodeFileInfo,
    /// Base image this file layers on, zeros for base builds.
    pub base_image: BaseImage,
    /// Native pointer width in bytes on the execution target.
    pub pointer_size: u32,
    /// Wire value of the payload storage mode.
    pub storage_mode: u32,
    /// File offset of the block table; zero when uncompressed.
    pub blocks_offset: u32,
    /// Number of block descriptors.
    pub blocks_count: u32,
    /// Stored payload bytes following the header.
    pub data_size: u32,
    /// Section table, indexed by [`SectionId::index`].
    pub sections: [Section; SectionId::COUNT],
}

impl ImageHeader {
    #[inline]
    pub fn section(&self, id: SectionId) -> Section {
        self.sections[id.index()]
    }

    /// Serialize, with the checksum field holding whatever
    /// `self.image_checksum` contains (zero while checksumming).
    pub fn pack(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_BYTES);
        bytes.extend_from_slice(&MAGIC);
        for field in self.scalar_fields() {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        for section in &self.sections {
            bytes.extend_from_slice(&section.offset.to_le_bytes());
            bytes.extend_from_slice(&section.size.to_le_bytes());
        }
        debug_assert_eq!(bytes.len(), HEADER_BYTES);
        bytes
    }

    /// Parse and validate magic and version.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(FimgError::Validation(format!(
                "image header truncated: {} of {HEADER_BYTES} bytes",
                bytes.len()
            )));
        }
        if bytes[..4] != MAGIC {
            return Err(FimgError::Validation("bad image magic".to_string()));
        }
        let mut reader = Reader::new(&bytes[4..]);
        let version = reader.u32();
        if version != VERSION {
            return Err(FimgError::Validation(format!(
                "unsupported image version {version} (expected {VERSION})"
            )));
        }

        let mut header = ImageHeader {
            reservation_size: reader.u32(),
            component_count: reader.u32(),
            image_begin: reader.u32(),
            image_size: reader.u32(),
            image_checksum: reader.u32(),
            image_roots: reader.u32(),
            end_of_objects: reader.u32(),
            code_file: CodeFileInfo {
                checksum: reader.u32(),
                begin: reader.u32(),
                data_begin: reader.u32(),
                data_end: reader.u32(),
                end: reader.u32(),
            },
            base_image: BaseImage {
                begin: reader.u32(),
                size: reader.u32(),
                component_count: reader.u32(),
                checksum: reader.u32(),
            },
            pointer_size: reader.u32(),
            storage_mode: reader.u32(),
            blocks_offset: reader.u32(),
            blocks_count: reader.u32(),
            data_size: reader.u32(),
            sections: [Section::default(); SectionId::COUNT],
        };
        for section in header.sections.iter_mut() {
            section.offset = reader.u32();
            section.size = reader.u32();
        }
        Ok(header)
    }

    fn scalar_fields(&self) -> [u32; 22] {
        [
            VERSION,
            self.reservation_size,
            self.component_count,
            self.image_begin,
            self.image_size,
            self.image_checksum,
            self.image_roots,
            self.end_of_objects,
            self.code_file.checksum,
            self.code_file.begin,
            self.code_file.data_begin,
            self.code_file.data_end,
            self.code_file.end,
            self.base_image.begin,
            self.base_image.size,
            self.base_image.component_count,
            self.base_image.checksum,
            self.pointer_size,
            self.storage_mode,
            self.blocks_offset,
            self.blocks_count,
            self.data_size,
        ]
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn u32(&mut self) -> u32 {
        let word = u32::from_le_bytes(
            self.bytes[self.position..self.position + 4]
                .try_into()
                .unwrap(),
        );
        self.position += 4;
        word
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ImageHeader {
        let mut header = ImageHeader {
            reservation_size: 0x4000,
            component_count: 2,
            image_begin: 0x7000_0000,
            image_size: 0x3000,
            image_checksum: 0xdead_beef,
            image_roots: 0x7000_1000,
            end_of_objects: 0x1200,
            pointer_size: 8,
            storage_mode: 1,
            blocks_offset: 0x2000,
            blocks_count: 3,
            data_size: 0x2f44,
            ..Default::default()
        };
        header.sections[SectionId::Objects.index()] = Section::new(0, 0x1200);
        header.sections[SectionId::Bitmap.index()] = Section::new(0x3000, 0x80);
        header
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample_header();
        let bytes = header.pack();
        assert_eq!(bytes.len(), HEADER_BYTES);

        let parsed = ImageHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.image_begin, header.image_begin);
        assert_eq!(parsed.image_checksum, header.image_checksum);
        assert_eq!(parsed.blocks_count, 3);
        assert_eq!(parsed.section(SectionId::Objects), header.section(SectionId::Objects));
        assert_eq!(parsed.section(SectionId::Bitmap), header.section(SectionId::Bitmap));
    }

    #[test]
    fn test_checksum_field_position() {
        let bytes = sample_header().pack();
        assert_eq!(
            u32::from_le_bytes(bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].try_into().unwrap()),
            0xdead_beef
        );
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = sample_header().pack();
        bytes[0] = b'X';
        assert!(ImageHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut bytes = sample_header().pack();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(ImageHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_block_roundtrip() {
        let block = Block {
            storage_mode: 1,
            data_offset: 0x100,
            data_size: 0x80,
            image_offset: 0xc0,
            image_size: 0x200,
        };
        assert_eq!(Block::parse(&block.pack()).unwrap(), block);
    }
}
