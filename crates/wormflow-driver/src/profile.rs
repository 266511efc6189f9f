//! Device profile: the resources one pipeline run may use.
//!
//! Defaults come from the `wormflow-chip` silicon model. Tests and the CLI
//! shrink or grow individual resources with the `with_*` builders, or load
//! them from the `[device]` table of a config file.

use serde::{Deserialize, Serialize};
use wormflow_chip::format::DataFormat;
use wormflow_chip::tiers::TierKind;
use wormflow_chip::tile;

/// Resources of one compute tile and its DRAM bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Off-chip DRAM bank size in bytes
    pub dram_bytes: u64,

    /// On-chip L1 size in bytes
    pub l1_bytes: u64,

    /// Bytes per circular buffer page (upper bound on chunk size)
    pub page_capacity_bytes: usize,

    /// Destination register segments available to the compute stage
    pub register_segments: usize,
}

impl DeviceProfile {
    /// Reference tile: 10 MB DRAM bank, 1.5 MB L1, 4 KB pages, 8 segments.
    pub const WORMHOLE: Self = Self {
        dram_bytes: TierKind::Dram.capacity(),
        l1_bytes: TierKind::L1.capacity(),
        page_capacity_bytes: tile::PAGE_CAPACITY_BYTES,
        register_segments: tile::DST_SEGMENTS_FP32,
    };

    /// Override DRAM size
    #[must_use]
    pub const fn with_dram_bytes(mut self, bytes: u64) -> Self {
        self.dram_bytes = bytes;
        self
    }

    /// Override L1 size
    #[must_use]
    pub const fn with_l1_bytes(mut self, bytes: u64) -> Self {
        self.l1_bytes = bytes;
        self
    }

    /// Override page capacity
    #[must_use]
    pub const fn with_page_capacity(mut self, bytes: usize) -> Self {
        self.page_capacity_bytes = bytes;
        self
    }

    /// Override register segment count
    #[must_use]
    pub const fn with_register_segments(mut self, segments: usize) -> Self {
        self.register_segments = segments;
        self
    }

    /// Capacity of a tier under this profile
    pub const fn capacity(&self, tier: TierKind) -> u64 {
        match tier {
            TierKind::Dram => self.dram_bytes,
            TierKind::L1 => self.l1_bytes,
        }
    }

    /// Largest chunk (in elements) one page can hold for a format
    pub const fn max_chunk_elements(&self, format: DataFormat) -> usize {
        self.page_capacity_bytes / format.size_bytes()
    }

    /// Every chunk size admissible for `elements` elements of `format`,
    /// ascending.
    pub fn admissible_chunks(&self, elements: usize, format: DataFormat) -> Vec<usize> {
        let max = self.max_chunk_elements(format).min(elements);
        (1..=max).filter(|k| elements % k == 0).collect()
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::WORMHOLE
    }
}
