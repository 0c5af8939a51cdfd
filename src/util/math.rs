//! Math type re-exports and small integer helpers.

// Re-export glam types
pub use glam::{IVec2, UVec2, Vec2, Vec3, Vec4};

/// Round `value` up to a multiple of `alignment`.
///
/// `alignment` must be a power of two.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + (alignment - 1)) & !(alignment - 1)
}

/// Integer ceiling division.
#[inline]
pub const fn div_ceil(value: u64, divisor: u64) -> u64 {
    (value + divisor - 1) / divisor
}
