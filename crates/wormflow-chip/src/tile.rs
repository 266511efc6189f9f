//! Tile, page and register file geometry.
//!
//! The compute engine works on 32×32 tiles. A circular buffer page holds one
//! tile of 32-bit elements, and each segment of the destination (accumulation)
//! register file holds one tile.
//!
//! ## Register file
//!
//! The destination register file is split into segments. With 32-bit
//! accumulation only half of the physical file is addressable per segment,
//! leaving 8 segments. The math core owns a segment between
//! `acquire` and `commit`; the pack core owns it between `wait` and `release`.

/// Tile edge length in elements.
pub const TILE_DIM: usize = 32;

/// Elements in one tile.
pub const TILE_ELEMENTS: usize = TILE_DIM * TILE_DIM;

/// Bytes in one circular buffer page (one tile of 32-bit elements).
pub const PAGE_CAPACITY_BYTES: usize = TILE_ELEMENTS * 4; // 4 KB

/// Destination register segments available with 32-bit accumulation.
pub const DST_SEGMENTS_FP32: usize = 8;

/// Bytes held by one destination register segment.
pub const DST_SEGMENT_BYTES: usize = PAGE_CAPACITY_BYTES;

/// Maximum circular buffers per tile.
pub const MAX_CIRCULAR_BUFFERS: usize = 32;

/// Circular buffer indices used by the elementwise pipeline.
pub mod cb {
    /// First operand, produced by the inbound core.
    pub const IN0: u8 = 0;
    /// Second operand, produced by the inbound core.
    pub const IN1: u8 = 1;
    /// Result, produced by the compute cores.
    pub const OUT0: u8 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_holds_one_fp32_tile() {
        assert_eq!(PAGE_CAPACITY_BYTES, 4096);
        assert_eq!(DST_SEGMENT_BYTES, PAGE_CAPACITY_BYTES);
    }

    #[test]
    fn pipeline_buffers_fit_in_index_space() {
        for idx in [cb::IN0, cb::IN1, cb::OUT0] {
            assert!(usize::from(idx) < MAX_CIRCULAR_BUFFERS);
        }
    }
}
