// Copyright 2025 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Guest memory translation for vhost-user device backends.
//!
//! A vhost-user frontend shares guest RAM with the backend as a table of regions, each
//! mapped somewhere in the backend's address space. This crate keeps that table as an
//! immutable [`GuestMemoryMap`] and translates virtqueue descriptors, which carry guest
//! physical addresses, into host virtual segments suitable for scatter/gather I/O. Segments
//! never cross a region boundary nor a chunk boundary of the backing page size, and the
//! number of segments a request may produce is bounded.
#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![allow(clippy::blanket_clippy_restriction_lints)]

/// Memory map configuration.
pub mod config;
/// Virtqueue descriptors.
pub mod descriptor;
/// Logging facilities.
pub mod logger;
/// Guest memory map.
pub mod memory;
/// Host scatter/gather segments.
pub mod segment;
/// Helpers shared by tests and benchmarks.
pub mod test_utils;
/// Descriptor translation.
pub mod translate;
pub(crate) mod utils;

pub use crate::config::{ConfigError, HugePageConfig, MemoryMapConfig, RegionConfig};
pub use crate::descriptor::Descriptor;
pub use crate::memory::{Granularity, GuestAddress, GuestMemoryMap, MemoryMapError, MemoryRegion};
pub use crate::segment::{Segment, SegmentBuffer, VHOST_MAX_SEGMENTS};
pub use crate::translate::{TranslationError, translate};
