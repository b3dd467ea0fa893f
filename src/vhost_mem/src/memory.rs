// Copyright 2025 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Immutable snapshot of the guest physical memory layout of a vhost-user session.

pub use vm_memory::{Address, GuestAddress, GuestMemory, GuestMemoryRegion, MemoryRegionAddress};
use vm_memory::GuestMemoryError;

use crate::logger::{debug, warn};
use crate::translate::TranslationError;

/// Errors associated with building a [`GuestMemoryMap`].
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum MemoryMapError {
    /// The memory table does not contain any region
    NoMemoryRegion,
    /// Memory region at guest address {0:#x} has zero size
    EmptyRegion(u64),
    /// Memory region at guest address {0:#x} extends past the end of the guest address space
    GuestRangeOverflow(u64),
    /// Memory region at host address {0:#x} extends past the end of the host address space
    HostRangeOverflow(u64),
    /// Memory regions at guest addresses {0:#x} and {1:#x} overlap
    RegionOverlap(u64, u64),
    /// Chunk granularity {0:#x} is not a power of two
    InvalidGranularity(u64),
    /// Cannot get the host address of a guest memory region: {0}
    GuestMemory(#[from] GuestMemoryError),
}

/// Size of the chunks within which the host mapping of a region is guaranteed to be
/// physically contiguous.
///
/// Memory regions are reported as a single host virtual range, but the backing memory is
/// only contiguous inside naturally aligned chunks of this size (the hugepage or IOMMU
/// page size of the memory backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Granularity(u64);

impl Granularity {
    /// Regular 4 KiB pages.
    pub const PAGE_4K: Granularity = Granularity(0x1000);
    /// 2 MiB hugepages.
    pub const HUGEPAGE_2M: Granularity = Granularity(0x20_0000);
    /// 1 GiB hugepages.
    pub const HUGEPAGE_1G: Granularity = Granularity(0x4000_0000);

    /// Creates a granularity of `bytes`, which has to be a power of two.
    pub fn new(bytes: u64) -> Result<Self, MemoryMapError> {
        if bytes.is_power_of_two() {
            Ok(Granularity(bytes))
        } else {
            Err(MemoryMapError::InvalidGranularity(bytes))
        }
    }

    /// Chunk size in bytes.
    pub const fn bytes(self) -> u64 {
        self.0
    }

    /// Number of bytes from `addr` up to the next chunk boundary strictly above it.
    ///
    /// The result is always in `1..=self.bytes()`.
    pub const fn bytes_to_boundary(self, addr: GuestAddress) -> u64 {
        self.0 - (addr.0 & (self.0 - 1))
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Granularity::HUGEPAGE_2M
    }
}

/// A contiguous range of guest physical memory mapped to a contiguous range of host virtual
/// memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    guest_base: GuestAddress,
    size: u64,
    host_base: u64,
}

impl MemoryRegion {
    /// Describes `size` bytes of guest memory starting at `guest_base`, mapped at `host_base`
    /// in the address space of this process.
    pub const fn new(guest_base: GuestAddress, size: u64, host_base: u64) -> Self {
        MemoryRegion {
            guest_base,
            size,
            host_base,
        }
    }

    /// Guest physical address of the first byte of the region.
    pub const fn guest_base(&self) -> GuestAddress {
        self.guest_base
    }

    /// Length of the region in bytes.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Host virtual address corresponding to `guest_base`.
    pub const fn host_base(&self) -> u64 {
        self.host_base
    }

    /// First guest address past the end of the region, or `None` if the region reaches the end
    /// of the guest address space.
    pub fn guest_end(&self) -> Option<GuestAddress> {
        self.guest_base.checked_add(self.size)
    }

    /// Whether `addr` falls inside `[guest_base, guest_base + size)`.
    pub fn contains(&self, addr: GuestAddress) -> bool {
        addr.checked_offset_from(self.guest_base)
            .is_some_and(|offset| offset < self.size)
    }

    /// Number of bytes from `addr` to the end of the region, or `None` if `addr` is not
    /// inside the region.
    pub fn bytes_from(&self, addr: GuestAddress) -> Option<u64> {
        addr.checked_offset_from(self.guest_base)
            .filter(|offset| *offset < self.size)
            .map(|offset| self.size - offset)
    }

    /// Host virtual address backing the guest address `addr`, or `None` if `addr` is not
    /// inside the region.
    pub fn host_address(&self, addr: GuestAddress) -> Option<u64> {
        addr.checked_offset_from(self.guest_base)
            .filter(|offset| *offset < self.size)
            .and_then(|offset| self.host_base.checked_add(offset))
    }

    fn validate(&self) -> Result<(), MemoryMapError> {
        if self.size == 0 {
            return Err(MemoryMapError::EmptyRegion(self.guest_base.raw_value()));
        }
        if self.guest_end().is_none() {
            return Err(MemoryMapError::GuestRangeOverflow(
                self.guest_base.raw_value(),
            ));
        }
        if self.host_base.checked_add(self.size).is_none() {
            return Err(MemoryMapError::HostRangeOverflow(self.host_base));
        }
        Ok(())
    }
}

/// Read-only layout of guest memory for one device session.
///
/// Represents a set of non-overlapping regions, kept sorted by guest base address, together
/// with the chunk granularity of the memory backing them. A map is never mutated once built;
/// a change of the guest memory layout is handled by building a new map and swapping it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestMemoryMap {
    regions: Vec<MemoryRegion>,
    granularity: Granularity,
}

impl GuestMemoryMap {
    /// Builds a map backed by 2 MiB hugepages from an unordered list of regions.
    pub fn new(regions: Vec<MemoryRegion>) -> Result<Self, MemoryMapError> {
        Self::with_granularity(regions, Granularity::default())
    }

    /// Builds a map from an unordered list of regions.
    ///
    /// # Arguments
    ///
    /// * `regions` - The regions of the memory table, in any order. They must not overlap.
    /// * `granularity` - Chunk size within which host mappings are contiguous.
    pub fn with_granularity(
        mut regions: Vec<MemoryRegion>,
        granularity: Granularity,
    ) -> Result<Self, MemoryMapError> {
        if let Err(err) = Self::check_regions(&mut regions) {
            warn!("Rejected guest memory table: {err}");
            return Err(err);
        }

        debug!(
            "Built guest memory map with {} region(s) and {:#x} byte chunks",
            regions.len(),
            granularity.bytes()
        );

        Ok(GuestMemoryMap {
            regions,
            granularity,
        })
    }

    /// Builds a map describing the regions of an mmap-backed guest memory object.
    pub fn from_guest_memory<M: GuestMemory>(
        mem: &M,
        granularity: Granularity,
    ) -> Result<Self, MemoryMapError> {
        let regions = mem
            .iter()
            .map(|region| {
                let host_base = region.get_host_address(MemoryRegionAddress(0))?;
                Ok(MemoryRegion::new(
                    region.start_addr(),
                    region.len(),
                    host_base as u64,
                ))
            })
            .collect::<Result<Vec<_>, MemoryMapError>>()?;

        Self::with_granularity(regions, granularity)
    }

    fn check_regions(regions: &mut [MemoryRegion]) -> Result<(), MemoryMapError> {
        if regions.is_empty() {
            return Err(MemoryMapError::NoMemoryRegion);
        }

        regions.iter().try_for_each(MemoryRegion::validate)?;
        regions.sort_unstable_by_key(|region| region.guest_base);

        for window in regions.windows(2) {
            let prev = &window[0];
            let next = &window[1];

            if prev.contains(next.guest_base) {
                return Err(MemoryMapError::RegionOverlap(
                    prev.guest_base.raw_value(),
                    next.guest_base.raw_value(),
                ));
            }
        }

        Ok(())
    }

    /// Chunk granularity of the memory backing this map.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Number of regions in the map.
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    /// Iterates over the regions in ascending guest address order.
    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter()
    }

    /// Returns the region containing `addr`.
    ///
    /// Regions are sorted at build time, so this is a binary search, O(log n) in the number of
    /// regions.
    pub fn find_region(&self, addr: GuestAddress) -> Option<&MemoryRegion> {
        let index = match self
            .regions
            .binary_search_by_key(&addr, |region| region.guest_base)
        {
            Ok(x) => Some(x),
            // Within the closest region with starting address < addr
            Err(x) if x > 0 && self.regions[x - 1].contains(addr) => Some(x - 1),
            _ => None,
        };
        index.map(|x| &self.regions[x])
    }

    /// Translates `[addr, addr + len)` into a single host virtual address.
    ///
    /// The whole range has to be inside one region. No chunk granularity applies, this is meant
    /// for structures such as the virtqueue rings which are accessed through the host mapping
    /// directly.
    pub fn host_address(&self, addr: GuestAddress, len: u64) -> Result<u64, TranslationError> {
        let invalid = TranslationError::InvalidAddress(addr.raw_value());
        let region = self.find_region(addr).ok_or(invalid)?;
        match region.bytes_from(addr) {
            Some(available) if available >= len => region.host_address(addr).ok_or(invalid),
            _ => Err(invalid),
        }
    }
}
