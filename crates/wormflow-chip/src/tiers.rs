//! Memory tier geometry.
//!
//! Each compute tile sees two classes of memory:
//!
//! ```text
//! Tier      Size      Latency   Purpose
//! ───────── ───────── ───────── ─────────────────────────────────────────
//! DRAM      10 MB     high      Bulk array storage, host-staged buffers
//! L1        1.5 MB    low       Circular buffer pages, per-core scratch
//! ```
//!
//! Addresses in either tier are tier-relative: `0` is the first byte of the
//! bank as the tile's NoC sees it. The first bytes of each bank are reserved
//! (DRAM: bank header, L1: firmware mailboxes and boot code) and never handed
//! out by the allocator.

/// Off-chip DRAM bank attached to the tile.
pub mod dram {
    /// Size of one DRAM bank in bytes.
    pub const BANK_BYTES: u64 = 10 * 1024 * 1024; // 10 MB
    /// Bytes at the bottom of the bank never allocated to buffers.
    pub const RESERVED_BYTES: u64 = 0x20;
    /// Allocation alignment for DRAM buffers (NoC burst size).
    pub const ALIGNMENT: u64 = 32;
}

/// On-chip L1 SRAM shared by the tile's cores.
pub mod l1 {
    /// Size of L1 in bytes.
    pub const BYTES: u64 = 0x17_0000; // 1.5 MB - 64 KB
    /// Firmware, mailboxes and kernel text live below this offset.
    pub const RESERVED_BYTES: u64 = 0x1_9000; // 100 KB
    /// Allocation alignment for L1 regions.
    pub const ALIGNMENT: u64 = 16;
}

/// Memory tier class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// Off-chip bulk memory.
    Dram,
    /// On-chip fast memory.
    L1,
}

impl TierKind {
    /// Default capacity of this tier in bytes.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        match self {
            Self::Dram => dram::BANK_BYTES,
            Self::L1 => l1::BYTES,
        }
    }

    /// Bytes reserved at the bottom of the tier.
    #[must_use]
    pub const fn reserved(&self) -> u64 {
        match self {
            Self::Dram => dram::RESERVED_BYTES,
            Self::L1 => l1::RESERVED_BYTES,
        }
    }

    /// Allocation alignment in bytes.
    #[must_use]
    pub const fn alignment(&self) -> u64 {
        match self {
            Self::Dram => dram::ALIGNMENT,
            Self::L1 => l1::ALIGNMENT,
        }
    }

    /// True for the off-chip tier.
    #[must_use]
    pub const fn is_off_chip(&self) -> bool {
        matches!(self, Self::Dram)
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dram => write!(f, "DRAM"),
            Self::L1 => write!(f, "L1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_regions_are_aligned() {
        for tier in [TierKind::Dram, TierKind::L1] {
            assert_eq!(tier.reserved() % tier.alignment(), 0, "{tier}");
            assert!(tier.reserved() < tier.capacity());
        }
    }

    #[test]
    fn only_dram_is_off_chip() {
        assert!(TierKind::Dram.is_off_chip());
        assert!(!TierKind::L1.is_off_chip());
    }
}
