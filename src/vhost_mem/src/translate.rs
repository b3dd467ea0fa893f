// Copyright 2025 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use vm_memory::{Address, GuestAddress};

use crate::descriptor::Descriptor;
use crate::memory::GuestMemoryMap;
use crate::segment::Segment;

/// Errors associated with translating a descriptor into host segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum TranslationError {
    /// Guest physical address {0:#x} is not backed by any memory region
    InvalidAddress(u64),
    /// Descriptor needs more than {0} scatter/gather segments
    TooManySegments(usize),
}

/// Translates the guest buffer described by `desc` into host segments.
///
/// Segments are written into `segments` starting at index `*cursor`, and `*cursor` is advanced
/// past the last one written. `segments.len()` is the capacity: nothing is ever written at or
/// beyond it. A segment never crosses a region boundary or a chunk boundary of the map's
/// granularity, since host memory is only known to be contiguous within those.
///
/// A zero length descriptor produces no segment and succeeds whatever its address.
///
/// On error `*cursor` is restored to its value on entry. Entries past the cursor may have been
/// overwritten, the ones before it never are.
pub fn translate(
    map: &GuestMemoryMap,
    segments: &mut [Segment],
    cursor: &mut usize,
    desc: &Descriptor,
) -> Result<(), TranslationError> {
    let start = *cursor;
    let result = translate_chunks(map, segments, cursor, desc.guest_addr(), desc.len);
    if result.is_err() {
        *cursor = start;
    }
    result
}

fn translate_chunks(
    map: &GuestMemoryMap,
    segments: &mut [Segment],
    cursor: &mut usize,
    mut addr: GuestAddress,
    len: u32,
) -> Result<(), TranslationError> {
    let granularity = map.granularity();
    let capacity = segments.len();
    let mut remaining = u64::from(len);

    while remaining > 0 {
        let region = map
            .find_region(addr)
            .ok_or(TranslationError::InvalidAddress(addr.raw_value()))?;
        let offset = addr.unchecked_offset_from(region.guest_base());

        let chunk_len = remaining
            .min(region.size() - offset)
            .min(granularity.bytes_to_boundary(addr));

        let slot = segments
            .get_mut(*cursor)
            .ok_or(TranslationError::TooManySegments(capacity))?;
        // Cannot overflow, the map checks that `host_base + size` fits.
        *slot = Segment::new(region.host_base() + offset, chunk_len);
        *cursor += 1;

        remaining -= chunk_len;
        // Cannot overflow either, `addr + chunk_len` is at most the end of the region.
        addr = addr.unchecked_add(chunk_len);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use vm_memory::Bytes;

    use super::*;
    use crate::memory::{Granularity, MemoryRegion};
    use crate::segment::{SegmentBuffer, VHOST_MAX_SEGMENTS};
    use crate::test_utils::{mmap_backed_map, two_region_map};
    use crate::utils::u64_to_usize;

    fn translate_at(
        map: &GuestMemoryMap,
        segments: &mut [Segment],
        cursor: usize,
        addr: u64,
        len: u32,
    ) -> (Result<(), TranslationError>, usize) {
        let mut cursor = cursor;
        let result = translate(map, segments, &mut cursor, &Descriptor::new(addr, len));
        (result, cursor)
    }

    #[test]
    fn test_within_one_chunk() {
        let map = two_region_map();
        let mut iov = [Segment::default(); VHOST_MAX_SEGMENTS];

        let (result, cursor) = translate_at(&map, &mut iov, 0, 0x11_0000, 0x1000);
        result.unwrap();
        assert_eq!(cursor, 1);
        assert_eq!(iov[0], Segment::new(0x111_0000, 0x1000));
        iov.fill(Segment::default());

        // Same descriptor, starting at the last slot.
        let (result, cursor) =
            translate_at(&map, &mut iov, VHOST_MAX_SEGMENTS - 1, 0x11_0000, 0x1000);
        result.unwrap();
        assert_eq!(cursor, VHOST_MAX_SEGMENTS);
        assert_eq!(iov[VHOST_MAX_SEGMENTS - 1], Segment::new(0x111_0000, 0x1000));
        assert!(iov[..VHOST_MAX_SEGMENTS - 1]
            .iter()
            .all(|s| *s == Segment::default()));
        iov.fill(Segment::default());

        // No slot left.
        let (result, cursor) =
            translate_at(&map, &mut iov, VHOST_MAX_SEGMENTS, 0x11_0000, 0x1000);
        assert_eq!(
            result,
            Err(TranslationError::TooManySegments(VHOST_MAX_SEGMENTS))
        );
        assert_eq!(cursor, VHOST_MAX_SEGMENTS);
        assert!(iov.iter().all(|s| *s == Segment::default()));
    }

    #[test]
    fn test_across_chunk_boundary() {
        let map = two_region_map();
        let mut iov = [Segment::default(); VHOST_MAX_SEGMENTS];

        let (result, cursor) = translate_at(&map, &mut iov, 0, 0x1F_0000, 0x2_0000);
        result.unwrap();
        assert_eq!(cursor, 2);
        assert_eq!(iov[0], Segment::new(0x11F_0000, 0x1_0000));
        assert_eq!(iov[1], Segment::new(0x120_0000, 0x1_0000));
        iov.fill(Segment::default());

        let (result, cursor) =
            translate_at(&map, &mut iov, VHOST_MAX_SEGMENTS - 2, 0x1F_0000, 0x2_0000);
        result.unwrap();
        assert_eq!(cursor, VHOST_MAX_SEGMENTS);
        assert_eq!(
            iov[VHOST_MAX_SEGMENTS - 2],
            Segment::new(0x11F_0000, 0x1_0000)
        );
        assert_eq!(
            iov[VHOST_MAX_SEGMENTS - 1],
            Segment::new(0x120_0000, 0x1_0000)
        );
        iov.fill(Segment::default());

        // The first half fits in the last slot, the part after the boundary does not.
        let (result, cursor) =
            translate_at(&map, &mut iov, VHOST_MAX_SEGMENTS - 1, 0x1F_0000, 0x2_0000);
        assert_eq!(
            result,
            Err(TranslationError::TooManySegments(VHOST_MAX_SEGMENTS))
        );
        assert_eq!(cursor, VHOST_MAX_SEGMENTS - 1);
    }

    #[test]
    fn test_across_region_boundary() {
        let map = two_region_map();
        let mut iov = [Segment::default(); VHOST_MAX_SEGMENTS];

        let (result, cursor) = translate_at(&map, &mut iov, 0, 0x3F_0000, 0x2_0000);
        result.unwrap();
        assert_eq!(cursor, 2);
        assert_eq!(iov[0], Segment::new(0x13F_0000, 0x1_0000));
        assert_eq!(iov[1], Segment::new(0x200_0000, 0x1_0000));
    }

    #[test]
    fn test_ends_on_boundary() {
        let map = two_region_map();
        let mut iov = [Segment::default(); 4];

        // Ends exactly at the 2 MiB boundary, no trailing empty segment.
        let (result, cursor) = translate_at(&map, &mut iov, 0, 0x1F_0000, 0x1_0000);
        result.unwrap();
        assert_eq!(cursor, 1);
        assert_eq!(iov[0], Segment::new(0x11F_0000, 0x1_0000));

        // Ends exactly at the end of the last region.
        let (result, cursor) = translate_at(&map, &mut iov, 1, 0x7F_F000, 0x1000);
        result.unwrap();
        assert_eq!(cursor, 2);
        assert_eq!(iov[1], Segment::new(0x23F_F000, 0x1000));

        // A whole region, where chunk and region boundaries coincide.
        let (result, cursor) = translate_at(&map, &mut iov, 0, 0x40_0000, 0x40_0000);
        result.unwrap();
        assert_eq!(cursor, 2);
        assert_eq!(iov[0], Segment::new(0x200_0000, 0x20_0000));
        assert_eq!(iov[1], Segment::new(0x220_0000, 0x20_0000));
    }

    #[test]
    fn test_invalid_address() {
        let map = two_region_map();
        let mut iov = [Segment::default(); 4];

        let (result, cursor) = translate_at(&map, &mut iov, 0, 0x80_0000, 1);
        assert_eq!(result, Err(TranslationError::InvalidAddress(0x80_0000)));
        assert_eq!(cursor, 0);

        let (result, _) = translate_at(&map, &mut iov, 0, u64::MAX, 0x1000);
        assert_eq!(result, Err(TranslationError::InvalidAddress(u64::MAX)));

        // Starts inside guest memory but runs past its end.
        let (result, cursor) = translate_at(&map, &mut iov, 1, 0x7F_F000, 0x2000);
        assert_eq!(result, Err(TranslationError::InvalidAddress(0x80_0000)));
        assert_eq!(cursor, 1);

        // The address is checked before the capacity.
        let (result, _) = translate_at(&map, &mut iov, 4, 0x80_0000, 1);
        assert_eq!(result, Err(TranslationError::InvalidAddress(0x80_0000)));
    }

    #[test]
    fn test_hole_between_regions() {
        let map = GuestMemoryMap::new(vec![
            MemoryRegion::new(GuestAddress(0), 0x1_0000, 0x100_0000),
            MemoryRegion::new(GuestAddress(0x2_0000), 0x1_0000, 0x200_0000),
        ])
        .unwrap();
        let mut iov = [Segment::default(); 4];

        let (result, cursor) = translate_at(&map, &mut iov, 0, 0xF000, 0x2000);
        assert_eq!(result, Err(TranslationError::InvalidAddress(0x1_0000)));
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_zero_length() {
        let map = two_region_map();
        let mut iov = [Segment::default(); 1];

        // Neither the address nor the capacity matter.
        let (result, cursor) = translate_at(&map, &mut iov, 0, 0xDEAD_0000_0000, 0);
        result.unwrap();
        assert_eq!(cursor, 0);

        let (result, cursor) = translate_at(&map, &mut iov, 1, 0x1000, 0);
        result.unwrap();
        assert_eq!(cursor, 1);
        assert_eq!(iov[0], Segment::default());
    }

    #[test]
    fn test_granularity() {
        let regions = vec![MemoryRegion::new(GuestAddress(0x1000), 0x1_0000, 0x10_0000)];
        let map = GuestMemoryMap::with_granularity(regions, Granularity::PAGE_4K).unwrap();
        let mut iov = [Segment::default(); 8];

        let (result, cursor) = translate_at(&map, &mut iov, 0, 0x1800, 0x2000);
        result.unwrap();
        assert_eq!(cursor, 3);
        assert_eq!(iov[0], Segment::new(0x10_0800, 0x800));
        assert_eq!(iov[1], Segment::new(0x10_1000, 0x1000));
        assert_eq!(iov[2], Segment::new(0x10_2000, 0x800));

        let regions = vec![MemoryRegion::new(GuestAddress(0), 0x8000_0000, 0x1_0000_0000)];
        let map = GuestMemoryMap::with_granularity(regions, Granularity::HUGEPAGE_1G).unwrap();
        let (result, cursor) = translate_at(&map, &mut iov, 0, 0x3FFF_F000, 0x2000);
        result.unwrap();
        assert_eq!(cursor, 2);
        assert_eq!(iov[0], Segment::new(0x1_3FFF_F000, 0x1000));
        assert_eq!(iov[1], Segment::new(0x1_4000_0000, 0x1000));
    }

    #[test]
    fn test_largest_descriptor() {
        let regions = vec![MemoryRegion::new(GuestAddress(0), 0x1_0000_0000, 0x10_0000_0000)];
        let map = GuestMemoryMap::new(regions).unwrap();
        let mut buffer = SegmentBuffer::new(2048);

        buffer.translate(&map, &Descriptor::new(1, u32::MAX)).unwrap();
        assert_eq!(buffer.len(), 2048);
        assert_eq!(buffer.total_len(), u64::from(u32::MAX));
        assert_eq!(buffer.as_slice()[0], Segment::new(0x10_0000_0001, 0x1F_FFFF));
    }

    #[test]
    fn test_segments_address_guest_bytes() {
        let (mem, map) = mmap_backed_map(&[(0, 0x40_0000), (0x40_0000, 0x40_0000)]);
        let data: Vec<u8> = (0..0x2_0000u32)
            .map(|i| u8::try_from(i % 251).unwrap())
            .collect();
        mem.write_slice(&data, GuestAddress(0x3F_0000)).unwrap();

        let mut buffer = SegmentBuffer::default();
        buffer
            .translate(&map, &Descriptor::new(0x3F_0000, 0x2_0000))
            .unwrap();
        assert_eq!(buffer.len(), 2);

        let mut read = Vec::new();
        for segment in buffer.iter() {
            // SAFETY: the segment was translated from `mem`, which is alive and maps
            // `segment.len` bytes at `segment.addr`.
            let bytes = unsafe {
                std::slice::from_raw_parts(segment.addr as *const u8, u64_to_usize(segment.len))
            };
            read.extend_from_slice(bytes);
        }
        assert_eq!(read, data);
    }

    proptest! {
        #[test]
        fn prop_segments_cover_descriptor(addr in 0u64..0x80_0000, len in 0u32..0x40_0000) {
            let map = two_region_map();
            let mut buffer = SegmentBuffer::default();
            let end = addr + u64::from(len);

            match buffer.translate(&map, &Descriptor::new(addr, len)) {
                Ok(()) => {
                    prop_assert!(end <= 0x80_0000);
                    prop_assert_eq!(buffer.total_len(), u64::from(len));

                    let mut guest = GuestAddress(addr);
                    for segment in buffer.iter() {
                        prop_assert!(segment.len > 0);
                        prop_assert!(
                            segment.len <= Granularity::HUGEPAGE_2M.bytes_to_boundary(guest)
                        );
                        prop_assert_eq!(map.host_address(guest, segment.len), Ok(segment.addr));
                        guest = guest.unchecked_add(segment.len);
                    }
                    prop_assert_eq!(guest.raw_value(), end);
                }
                Err(err) => {
                    prop_assert!(end > 0x80_0000);
                    prop_assert_eq!(err, TranslationError::InvalidAddress(0x80_0000));
                    prop_assert!(buffer.is_empty());
                }
            }
        }

        #[test]
        fn prop_capacity_never_exceeded(
            capacity in 0usize..4,
            cursor in 0usize..4,
            addr in 0u64..0x80_0000,
            len in 1u32..0x60_0000,
        ) {
            let map = two_region_map();
            let mut iov = vec![Segment::default(); capacity];
            let start = cursor.min(capacity);

            let (result, end) = translate_at(&map, &mut iov, start, addr, len);
            match result {
                Ok(()) => {
                    prop_assert!(end > start);
                    prop_assert!(end <= capacity);
                }
                Err(_) => prop_assert_eq!(end, start),
            }
        }
    }
}

#[cfg(kani)]
mod verification {
    use super::*;
    use crate::memory::{Granularity, MemoryRegion};

    const CAPACITY: usize = 3;

    #[kani::proof]
    #[kani::unwind(5)]
    fn verify_translate_within_bounds() {
        let map = GuestMemoryMap::with_granularity(
            vec![MemoryRegion::new(GuestAddress(0x1000), 0x3000, 0x10_0000)],
            Granularity::PAGE_4K,
        )
        .unwrap();
        let mut segments = [Segment::default(); CAPACITY];
        let start: usize = kani::any_where(|c: &usize| *c <= CAPACITY);
        let addr: u64 = kani::any_where(|a: &u64| *a < 0x5000);
        let len: u32 = kani::any_where(|l: &u32| *l <= 0x3000);

        let mut cursor = start;
        match translate(&map, &mut segments, &mut cursor, &Descriptor::new(addr, len)) {
            Ok(()) => {
                assert!(cursor <= CAPACITY);
                let covered: u64 = segments[start..cursor].iter().map(|s| s.len).sum();
                assert_eq!(covered, u64::from(len));
                for segment in &segments[start..cursor] {
                    assert!(segment.addr >= 0x10_0000);
                    assert!(segment.addr + segment.len <= 0x10_3000);
                }
            }
            Err(_) => assert_eq!(cursor, start),
        }
    }
}
