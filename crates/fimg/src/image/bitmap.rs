//! Liveness Bitmap - One Bit per Possible Object Start
//!
//! The loader's collector needs to know where objects begin without walking
//! the image. One bit per object-alignment granule, covering the managed-
//! object area from offset zero; a set bit marks the first granule of a
//! live object or padding filler.
//!
//! ```text
//! Image offset 0x1240, granularity 8:
//! - Bit index:  0x1240 / 8 = 584
//! - Word index: 584 / 64  = 9
//! - Bit offset: 584 % 64  = 8
//! ```
//!
//! The build is single-threaded, so the words are plain `u64`s; the bitmap
//! is serialized into the trailing section of the image file.

use crate::util::{is_aligned, OBJECT_ALIGNMENT};

/// Object-start bitmap for one output image.
#[derive(Debug, Clone)]
pub struct LivenessBitmap {
    /// 1 bit per [`OBJECT_ALIGNMENT`] bytes.
    words: Vec<u64>,
    /// Image bytes covered.
    coverage: usize,
}

impl LivenessBitmap {
    /// Bitmap covering `coverage` image bytes, all clear.
    pub fn new(coverage: usize) -> Self {
        let bit_count = coverage.div_ceil(OBJECT_ALIGNMENT);
        let word_count = bit_count.div_ceil(64);
        Self {
            words: vec![0u64; word_count],
            coverage,
        }
    }

    /// Mark an object starting at `offset`.
    pub fn set(&mut self, offset: usize) {
        let (word, bit) = self.indices(offset);
        self.words[word] |= 1 << bit;
    }

    pub fn is_set(&self, offset: usize) -> bool {
        let (word, bit) = self.indices(offset);
        (self.words[word] & (1 << bit)) != 0
    }

    pub fn count_set(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Serialized size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.words.len() * 8
    }

    /// Little-endian word dump, the on-disk representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size_bytes());
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    fn indices(&self, offset: usize) -> (usize, usize) {
        debug_assert!(
            is_aligned(offset, OBJECT_ALIGNMENT),
            "bitmap offset {offset:#x} is not object-aligned"
        );
        debug_assert!(offset < self.coverage, "bitmap offset {offset:#x} out of range");
        let bit_index = offset / OBJECT_ALIGNMENT;
        (bit_index / 64, bit_index % 64)
    }
}
