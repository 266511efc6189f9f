//! Memory tiers and buffer handles.
//!
//! A [`MemoryTier`] is a tier-relative address space with a first-fit
//! allocator. Every allocated region owns its bytes; reads and writes are
//! resolved to the region containing the start address and must stay inside
//! it. Unallocated addresses are never readable.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;
use wormflow_chip::tiers::TierKind;

use crate::element::Element;
use crate::error::{PipelineError, StageFault};

/// A region allocated by [`crate::Orchestrator::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    id: u32,
    tier: TierKind,
    address: u64,
    size: u64,
    page_size: u64,
}

impl BufferHandle {
    /// Orchestrator-unique buffer id
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Tier the buffer lives in
    pub const fn tier(&self) -> TierKind {
        self.tier
    }

    /// Tier-relative base address
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Size in bytes
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Page size in bytes
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Number of pages in the buffer
    pub const fn pages(&self) -> u64 {
        self.size / self.page_size
    }

    /// Number of `E` elements the buffer holds
    #[allow(clippy::cast_possible_truncation)]
    pub const fn elements<E: Element>(&self) -> usize {
        self.size as usize / E::SIZE
    }
}

/// Access outside any allocated region.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// No region contains the start address
    #[error("{tier} address {address:#x} is not inside an allocated region")]
    Unmapped {
        /// Tier accessed
        tier: TierKind,
        /// Start address
        address: u64,
    },

    /// The access starts inside a region but runs past its end
    #[error("{tier} access of {len} bytes at {address:#x} overruns region {base:#x}+{size:#x}")]
    OutOfBounds {
        /// Tier accessed
        tier: TierKind,
        /// Start address
        address: u64,
        /// Access length
        len: usize,
        /// Region base
        base: u64,
        /// Region size
        size: u64,
    },
}

impl From<AccessError> for StageFault {
    fn from(e: AccessError) -> Self {
        Self::memory(e.to_string())
    }
}

impl From<AccessError> for PipelineError {
    fn from(e: AccessError) -> Self {
        Self::transfer(e.to_string())
    }
}

#[derive(Debug)]
struct Region {
    id: u32,
    data: Vec<u8>,
}

/// One memory tier: an address range with allocated regions.
#[derive(Debug)]
pub struct MemoryTier {
    kind: TierKind,
    capacity: u64,
    regions: BTreeMap<u64, Region>,
}

impl MemoryTier {
    /// Create an empty tier of `capacity` bytes
    pub fn new(kind: TierKind, capacity: u64) -> Self {
        Self {
            kind,
            capacity,
            regions: BTreeMap::new(),
        }
    }

    /// Tier class
    pub const fn kind(&self) -> TierKind {
        self.kind
    }

    /// Total bytes in the tier, including the reserved bottom
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes held by allocated regions
    pub fn used_bytes(&self) -> u64 {
        self.regions.values().map(|r| r.data.len() as u64).sum()
    }

    /// Number of allocated regions
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Allocate `size` bytes (first fit, tier alignment) and return the base
    /// address.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Allocation` if no free gap is large enough.
    pub fn allocate(&mut self, id: u32, size: u64) -> Result<u64, PipelineError> {
        let align = self.kind.alignment();
        let mut cursor = align_up(self.kind.reserved(), align);
        let mut largest = 0;
        let mut placed = None;

        for (&base, region) in &self.regions {
            if base >= cursor {
                let gap = base - cursor;
                if gap >= size {
                    placed = Some(cursor);
                    break;
                }
                largest = largest.max(gap);
            }
            cursor = cursor.max(align_up(base + region.data.len() as u64, align));
        }

        let address = match placed {
            Some(address) => address,
            None => {
                let tail = self.capacity.saturating_sub(cursor);
                if tail < size {
                    return Err(PipelineError::Allocation {
                        tier: self.kind,
                        requested: size,
                        available: largest.max(tail),
                    });
                }
                cursor
            }
        };

        #[allow(clippy::cast_possible_truncation)]
        let data = vec![0u8; size as usize];
        self.regions.insert(address, Region { id, data });
        debug!("{}: allocated {size} bytes at {address:#x} (buffer {id})", self.kind);
        Ok(address)
    }

    /// Free the region starting at `address`. Returns false if none did.
    pub fn free(&mut self, address: u64) -> bool {
        self.regions.remove(&address).is_some()
    }

    /// Free every region
    pub fn clear(&mut self) {
        self.regions.clear();
    }

    /// Buffer id of the region starting exactly at `address`
    pub fn region_id(&self, address: u64) -> Option<u32> {
        self.regions.get(&address).map(|r| r.id)
    }

    /// Borrow `len` bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns `AccessError` if the range is not inside one region.
    pub fn read(&self, address: u64, len: usize) -> Result<&[u8], AccessError> {
        let (base, region) = self.locate(address, len)?;
        #[allow(clippy::cast_possible_truncation)]
        let offset = (address - base) as usize;
        Ok(&region.data[offset..offset + len])
    }

    /// Copy `data` into the tier starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns `AccessError` if the range is not inside one region.
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), AccessError> {
        let (base, _) = self.locate(address, data.len())?;
        #[allow(clippy::cast_possible_truncation)]
        let offset = (address - base) as usize;
        if let Some(region) = self.regions.get_mut(&base) {
            region.data[offset..offset + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn locate(&self, address: u64, len: usize) -> Result<(u64, &Region), AccessError> {
        let (&base, region) = self
            .regions
            .range(..=address)
            .next_back()
            .ok_or(AccessError::Unmapped {
                tier: self.kind,
                address,
            })?;

        let size = region.data.len() as u64;
        if address >= base + size {
            return Err(AccessError::Unmapped {
                tier: self.kind,
                address,
            });
        }
        if address + len as u64 > base + size {
            return Err(AccessError::OutOfBounds {
                tier: self.kind,
                address,
                len,
                base,
                size,
            });
        }
        Ok((base, region))
    }
}

pub(crate) fn new_handle(
    id: u32,
    tier: TierKind,
    address: u64,
    size: u64,
    page_size: u64,
) -> BufferHandle {
    BufferHandle {
        id,
        tier,
        address,
        size,
        page_size,
    }
}

const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) / align * align
}
