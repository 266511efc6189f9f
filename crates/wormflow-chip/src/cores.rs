//! Baby RISC-V cores on a compute tile.
//!
//! ```text
//! Core     Role                       Kernel type
//! ──────── ────────────────────────── ──────────────
//! BRISC    data movement, NoC 0       reader (inbound)
//! NCRISC   data movement, NoC 1       writer (outbound)
//! TRISC0   unpack                     compute
//! TRISC1   math                       compute
//! TRISC2   pack                       compute
//! ```
//!
//! The three TRISCs run one compute kernel together; the host sees them as a
//! single compute stage.

/// One of the five baby RISC-V cores on a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiscvCore {
    /// Data movement core on NoC 0.
    Brisc,
    /// Data movement core on NoC 1.
    Ncrisc,
    /// Unpacker.
    Trisc0,
    /// Math.
    Trisc1,
    /// Packer.
    Trisc2,
}

impl RiscvCore {
    /// All cores, in soft-reset bit order.
    pub const ALL: [Self; 5] = [
        Self::Brisc,
        Self::Trisc0,
        Self::Trisc1,
        Self::Trisc2,
        Self::Ncrisc,
    ];

    /// Soft-reset control bit for this core.
    #[must_use]
    pub const fn soft_reset_bit(&self) -> u32 {
        match self {
            Self::Brisc => 11,
            Self::Trisc0 => 12,
            Self::Trisc1 => 13,
            Self::Trisc2 => 14,
            Self::Ncrisc => 18,
        }
    }

    /// True for the cores that drive the compute engine.
    #[must_use]
    pub const fn is_compute(&self) -> bool {
        matches!(self, Self::Trisc0 | Self::Trisc1 | Self::Trisc2)
    }

    /// Short lowercase name, as used in firmware file names.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Brisc => "brisc",
            Self::Ncrisc => "ncrisc",
            Self::Trisc0 => "trisc0",
            Self::Trisc1 => "trisc1",
            Self::Trisc2 => "trisc2",
        }
    }
}

impl std::fmt::Display for RiscvCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name().to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_reset_bits_are_unique() {
        let mut bits: Vec<u32> = RiscvCore::ALL.iter().map(RiscvCore::soft_reset_bit).collect();
        bits.sort_unstable();
        bits.dedup();
        assert_eq!(bits.len(), RiscvCore::ALL.len());
    }

    #[test]
    fn three_compute_cores() {
        assert_eq!(RiscvCore::ALL.iter().filter(|c| c.is_compute()).count(), 3);
        assert_eq!(RiscvCore::Trisc1.to_string(), "TRISC1");
    }
}
