//! Utility Functions
//!
//! Alignment helpers used by the layout and serialization phases.
//! Alignments are always powers of two.

/// Default alignment for objects inside an image (8 bytes).
pub const OBJECT_ALIGNMENT: usize = 8;

/// Align `value` up to `alignment`.
///
/// # Examples
/// ```
/// assert_eq!(fimg::util::align_up(100, 8), 104);
/// assert_eq!(fimg::util::align_up(64, 8), 64);
/// ```
#[inline]
pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Align `value` down to `alignment`.
#[inline]
pub fn align_down(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Check whether `value` is aligned to `alignment`.
#[inline]
pub fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    value & (alignment - 1) == 0
}

/// Padding needed to bring `value` up to `alignment`.
#[inline]
pub fn padding_for(value: usize, alignment: usize) -> usize {
    align_up(value, alignment) - value
}

/// System page size. Image reservations and the trailing liveness bitmap
/// are page-aligned so the file can be mapped directly.
#[inline]
pub fn page_size() -> usize {
    page_size::get()
}
