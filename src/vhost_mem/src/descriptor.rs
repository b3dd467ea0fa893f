// Copyright 2025 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Guest-side view of a buffer, as found in a virtqueue descriptor table.

use vm_memory::{ByteValued, GuestAddress};

/// The buffer continues in the descriptor referenced by `next`.
pub const VIRTQ_DESC_F_NEXT: u16 = 0x1;
/// The buffer is write-only for the device.
pub const VIRTQ_DESC_F_WRITE: u16 = 0x2;

/// Split virtqueue descriptor, laid out as in the virtio 1.1 standard, 2.6.5 The Virtqueue
/// Descriptor Table:
/// https://docs.oasis-open.org/virtio/virtio/v1.1/csprd01/virtio-v1.1-csprd01.html#x1-430008
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Guest physical address of the buffer
    pub addr: u64,
    /// Length of the buffer in bytes
    pub len: u32,
    /// Includes next and write bits
    pub flags: u16,
    /// Index into the descriptor table of the next descriptor if flags has the next bit set
    pub next: u16,
}

// SAFETY: `Descriptor` is a POD and contains no padding.
unsafe impl ByteValued for Descriptor {}

impl Descriptor {
    /// A device-readable descriptor covering `len` bytes at guest address `addr`.
    pub fn new(addr: u64, len: u32) -> Self {
        Descriptor {
            addr,
            len,
            ..Default::default()
        }
    }

    /// Guest physical address of the buffer.
    pub fn guest_addr(&self) -> GuestAddress {
        GuestAddress(self.addr)
    }

    /// Checks if the driver designated this as a write only descriptor.
    ///
    /// If this is false, this descriptor is read only.
    /// Write only means the emulated device can write and the driver can read.
    pub fn is_write_only(&self) -> bool {
        self.flags & VIRTQ_DESC_F_WRITE != 0
    }

    /// Checks if this descriptor has another descriptor linked after it.
    pub fn has_next(&self) -> bool {
        self.flags & VIRTQ_DESC_F_NEXT != 0
    }
}
