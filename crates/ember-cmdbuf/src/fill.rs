//! # Pattern Fill Decomposition
//!
//! Native memset nodes only take 1, 2 or 4 byte elements. Longer patterns
//! are split into a chain of strided memsets, one row per pattern repeat:
//!
//! ```text
//!   pattern  [p0 p1 p2 p3 p4 p5 p6 p7]        size = 3 * 8
//!
//!   node 0   4-byte memset, pitch 8  ▶ [p0..p3 .. .. .. ..] x3
//!   node 1   1-byte memset @ +4      ▶ [.. .. .. .. p4 .. .. ..] x3
//!   ...
//!   node 4   1-byte memset @ +7      ▶ [.. .. .. .. .. .. .. p7] x3
//! ```
//!
//! The nodes are chained so the last one completes the fill.

use alloc::vec;
use alloc::vec::Vec;

use ember_core::{DevicePtr, Error, Result};
use ember_device::MemsetParams;

/// Split a fill of `size` bytes at `dst` into memsets
///
/// `size` must be a non-zero multiple of the pattern length. Any pattern
/// length is accepted here.
pub fn decompose_fill(dst: DevicePtr, pattern: &[u8], size: u64) -> Result<Vec<MemsetParams>> {
    let ps = pattern.len() as u64;
    if ps == 0 || size == 0 || size % ps != 0 {
        return Err(Error::InvalidSize);
    }
    let repeats = size / ps;

    if matches!(ps, 1 | 2 | 4) {
        return Ok(vec![MemsetParams {
            dst,
            value: pattern_value(pattern),
            element_size: ps as u32,
            width: 1,
            height: repeats,
            pitch: ps,
        }]);
    }

    let mut nodes = Vec::with_capacity(pattern.len() - 3);
    nodes.push(MemsetParams {
        dst,
        value: pattern_value(&pattern[..4]),
        element_size: 4,
        width: 1,
        height: repeats,
        pitch: ps,
    });
    for (i, &byte) in pattern.iter().enumerate().skip(4) {
        nodes.push(MemsetParams {
            dst: dst.checked_offset(i as u64)?,
            value: byte as u32,
            element_size: 1,
            width: 1,
            height: repeats,
            pitch: ps,
        });
    }
    Ok(nodes)
}

/// Little-endian value of up to four pattern bytes
fn pattern_value(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// Check the pattern constraints of a fill command
///
/// The pattern length must be a positive power of two dividing both the
/// size and the offset.
pub fn check_pattern(pattern: &[u8], offset: u64, size: u64) -> Result<()> {
    let ps = pattern.len() as u64;
    if !ps.is_power_of_two() || size == 0 || size % ps != 0 || offset % ps != 0 {
        return Err(Error::InvalidSize);
    }
    Ok(())
}
