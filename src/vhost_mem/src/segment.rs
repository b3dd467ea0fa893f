// Copyright 2025 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use libc::{c_void, iovec};

use crate::descriptor::Descriptor;
use crate::memory::GuestMemoryMap;
use crate::translate::{TranslationError, translate};
use crate::utils::u64_to_usize;

/// Default maximum number of scatter/gather segments a single request may be translated into.
pub const VHOST_MAX_SEGMENTS: usize = 128;

/// A contiguous host virtual buffer, with the same layout as `struct iovec` on 64-bit hosts.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Host virtual address of the first byte
    pub addr: u64,
    /// Length in bytes
    pub len: u64,
}

impl Segment {
    /// A segment of `len` bytes at host address `addr`.
    pub const fn new(addr: u64, len: u64) -> Self {
        Segment { addr, len }
    }

    /// Converts the segment into an `iovec` that can be passed to `readv`/`writev`.
    pub fn as_iovec(&self) -> iovec {
        iovec {
            iov_base: self.addr as *mut c_void,
            iov_len: u64_to_usize(self.len),
        }
    }
}

/// Fixed-capacity list of scatter/gather segments translated from guest descriptors.
///
/// The capacity is chosen at construction and never grows, it is the maximum scatter/gather
/// depth supported by the device. Descriptors of a request are appended one at a time; the
/// buffer only ever exposes segments of descriptors that translated successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentBuffer {
    // Backing storage, `segments.len()` is the capacity.
    segments: Box<[Segment]>,
    // Number of valid entries at the front of `segments`.
    len: usize,
}

impl SegmentBuffer {
    /// Creates an empty buffer able to hold `capacity` segments.
    pub fn new(capacity: usize) -> Self {
        SegmentBuffer {
            segments: vec![Segment::default(); capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Number of valid segments.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no segment.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of segments the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.segments.len()
    }

    /// Number of segments that can still be appended.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Whether no more segments can be appended.
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// The valid segments, in translation order.
    pub fn as_slice(&self) -> &[Segment] {
        &self.segments[..self.len]
    }

    /// Iterates over the valid segments.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.as_slice().iter()
    }

    /// Total number of bytes covered by the valid segments.
    pub fn total_len(&self) -> u64 {
        self.iter().map(|segment| segment.len).sum()
    }

    /// Drops all segments, keeping the capacity.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Returns the segments as an `iovec` array.
    pub fn to_iovecs(&self) -> Vec<iovec> {
        self.iter().map(Segment::as_iovec).collect()
    }

    /// Translates `desc` against `map` and appends the resulting segments.
    ///
    /// On error the buffer is left exactly as it was before the call.
    pub fn translate(
        &mut self,
        map: &GuestMemoryMap,
        desc: &Descriptor,
    ) -> Result<(), TranslationError> {
        translate(map, &mut self.segments, &mut self.len, desc)
    }

    /// Replaces the contents of the buffer with the translation of a chain of descriptors.
    ///
    /// Returns the total length of the chain in bytes. If any descriptor of the chain fails
    /// to translate, the whole chain is unusable and the buffer is left empty.
    pub fn load_descriptors<'a, I>(
        &mut self,
        map: &GuestMemoryMap,
        descriptors: I,
    ) -> Result<u64, TranslationError>
    where
        I: IntoIterator<Item = &'a Descriptor>,
    {
        self.clear();

        let mut length = 0u64;
        for desc in descriptors {
            if let Err(err) = self.translate(map, desc) {
                self.clear();
                return Err(err);
            }
            length += u64::from(desc.len);
        }

        Ok(length)
    }
}

impl Default for SegmentBuffer {
    fn default() -> Self {
        SegmentBuffer::new(VHOST_MAX_SEGMENTS)
    }
}
