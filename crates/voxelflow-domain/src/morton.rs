//! Morton (Z-order) keys.
//!
//! Each axis contributes 21 bits, interleaved as `…z1 y1 x1 z0 y0 x0`, so a
//! key fits in a `u64`. Coordinates are shifted by the set's minimum corner
//! before encoding; offsets wider than 21 bits are truncated, which only
//! degrades locality, not correctness of a partition.

use rayon::prelude::*;

use voxelflow_core::types::VoxelCoord;

/// Bits per axis.
pub const MORTON_BITS: u32 = 21;

const AXIS_MASK: u64 = (1 << MORTON_BITS) - 1;

/// Spread the low 21 bits of `v` so that they occupy every third bit.
#[inline]
fn spread(v: u64) -> u64 {
    let mut x = v & AXIS_MASK;
    x = (x | (x << 32)) & 0x001f_0000_0000_ffff;
    x = (x | (x << 16)) & 0x001f_0000_ff00_00ff;
    x = (x | (x << 8)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}

/// Inverse of [`spread`].
#[inline]
fn compact(v: u64) -> u64 {
    let mut x = v & 0x1249_2492_4924_9249;
    x = (x | (x >> 2)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x >> 4)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x >> 8)) & 0x001f_0000_ff00_00ff;
    x = (x | (x >> 16)) & 0x001f_0000_0000_ffff;
    x = (x | (x >> 32)) & AXIS_MASK;
    x
}

/// Interleave three 21-bit values.
#[inline]
pub fn morton_encode(x: u32, y: u32, z: u32) -> u64 {
    spread(x as u64) | (spread(y as u64) << 1) | (spread(z as u64) << 2)
}

/// Split a key back into its axis values.
#[inline]
pub fn morton_decode(key: u64) -> (u32, u32, u32) {
    (
        compact(key) as u32,
        compact(key >> 1) as u32,
        compact(key >> 2) as u32,
    )
}

/// Key of `c` relative to `origin`.
#[inline]
pub fn morton_key(c: VoxelCoord, origin: VoxelCoord) -> u64 {
    let rel = |v: i32, o: i32| (v as i64 - o as i64) as u32;
    morton_encode(rel(c.x, origin.x), rel(c.y, origin.y), rel(c.z, origin.z))
}

/// Keys of all coordinates, computed in parallel.
pub fn morton_keys(coords: &[VoxelCoord], origin: VoxelCoord) -> Vec<u64> {
    coords.par_iter().map(|&c| morton_key(c, origin)).collect()
}

/// Position of the highest bit in which two keys differ, `None` if equal.
#[inline]
pub fn highest_differing_bit(a: u64, b: u64) -> Option<u32> {
    let diff = a ^ b;
    (diff != 0).then(|| 63 - diff.leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_small_values() {
        assert_eq!(morton_encode(0, 0, 0), 0);
        assert_eq!(morton_encode(1, 0, 0), 0b001);
        assert_eq!(morton_encode(0, 1, 0), 0b010);
        assert_eq!(morton_encode(0, 0, 1), 0b100);
        assert_eq!(morton_encode(3, 0, 0), 0b001_001);
        assert_eq!(morton_encode(1, 1, 1), 0b111);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let max = (1u32 << MORTON_BITS) - 1;
        for &(x, y, z) in &[(0, 0, 0), (5, 9, 13), (max, 0, max), (123_456, 654_321, 1)] {
            assert_eq!(morton_decode(morton_encode(x, y, z)), (x, y, z));
        }
    }

    #[test]
    fn test_keys_relative_to_origin() {
        let origin = VoxelCoord::new(-4, -4, -4);
        let keys = morton_keys(
            &[VoxelCoord::new(-4, -4, -4), VoxelCoord::new(-3, -4, -4)],
            origin,
        );
        assert_eq!(keys, vec![0, 1]);
    }

    #[test]
    fn test_highest_differing_bit() {
        assert_eq!(highest_differing_bit(0b0111, 0b1000), Some(3));
        assert_eq!(highest_differing_bit(5, 5), None);
        // Octant boundary in a 4^3 block: z bit 1 is key bit 5.
        let a = morton_encode(3, 3, 1);
        let b = morton_encode(0, 0, 2);
        assert_eq!(highest_differing_bit(a, b), Some(5));
    }
}
