// Copyright 2025 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

use vm_memory::{GuestAddress, GuestMemoryMmap};

use crate::memory::{Granularity, GuestMemoryMap, MemoryRegion};

/// Creates a [`GuestMemoryMap`] with a single region of the given size starting at guest
/// physical address 0. The host addresses are not backed by any memory.
pub fn single_region_map(size: u64, host_base: u64) -> GuestMemoryMap {
    GuestMemoryMap::new(vec![MemoryRegion::new(GuestAddress(0), size, host_base)])
        .expect("Cannot build memory map")
}

/// Two adjacent 4 MiB regions with 2 MiB chunks, mapped at non-adjacent host addresses:
///
/// * guest `[0x0, 0x40_0000)` at host `0x100_0000`
/// * guest `[0x40_0000, 0x80_0000)` at host `0x200_0000`
///
/// The host addresses are not backed by any memory.
pub fn two_region_map() -> GuestMemoryMap {
    GuestMemoryMap::new(vec![
        MemoryRegion::new(GuestAddress(0), 0x40_0000, 0x100_0000),
        MemoryRegion::new(GuestAddress(0x40_0000), 0x40_0000, 0x200_0000),
    ])
    .expect("Cannot build memory map")
}

/// Creates anonymous guest memory with the given `(guest address, size)` regions, sorted by
/// address, together with a [`GuestMemoryMap`] describing it.
pub fn mmap_backed_map(regions: &[(u64, usize)]) -> (GuestMemoryMmap<()>, GuestMemoryMap) {
    let ranges: Vec<_> = regions
        .iter()
        .map(|&(addr, size)| (GuestAddress(addr), size))
        .collect();
    let mem = GuestMemoryMmap::<()>::from_ranges(&ranges).expect("Cannot initialize memory");
    let map = GuestMemoryMap::from_guest_memory(&mem, Granularity::default())
        .expect("Cannot build memory map");
    (mem, map)
}
