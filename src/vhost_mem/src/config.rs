// Copyright 2025 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration of a guest memory map, in the shape of a vhost-user memory table.

use serde::{Deserialize, Serialize};
use vm_memory::GuestAddress;

use crate::memory::{Granularity, GuestMemoryMap, MemoryMapError, MemoryRegion};
use crate::segment::{SegmentBuffer, VHOST_MAX_SEGMENTS};

/// Errors associated with loading a [`MemoryMapConfig`].
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum ConfigError {
    /// Cannot parse memory map configuration: {0}
    Parse(#[from] serde_json::Error),
    /// Invalid memory map: {0}
    MemoryMap(#[from] MemoryMapError),
    /// Maximum number of segments must be greater than zero
    InvalidMaxSegments,
}

/// Page size of the memory backing guest RAM.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum HugePageConfig {
    /// Regular 4 KiB pages
    None,
    /// 2 MiB hugetlbfs pages
    #[default]
    #[serde(rename = "2M")]
    Hugetlbfs2M,
    /// 1 GiB hugetlbfs pages
    #[serde(rename = "1G")]
    Hugetlbfs1G,
}

impl From<HugePageConfig> for Granularity {
    fn from(value: HugePageConfig) -> Self {
        match value {
            HugePageConfig::None => Granularity::PAGE_4K,
            HugePageConfig::Hugetlbfs2M => Granularity::HUGEPAGE_2M,
            HugePageConfig::Hugetlbfs1G => Granularity::HUGEPAGE_1G,
        }
    }
}

/// One entry of a vhost-user memory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegionConfig {
    /// Guest physical address of the region.
    pub guest_phys_addr: u64,
    /// Size of the region in bytes.
    pub memory_size: u64,
    /// Address at which the region is mapped in this process.
    pub userspace_addr: u64,
}

impl From<RegionConfig> for MemoryRegion {
    fn from(value: RegionConfig) -> Self {
        MemoryRegion::new(
            GuestAddress(value.guest_phys_addr),
            value.memory_size,
            value.userspace_addr,
        )
    }
}

fn default_max_segments() -> usize {
    VHOST_MAX_SEGMENTS
}

/// Strongly typed structure that represents the guest memory layout of a device session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryMapConfig {
    /// Regions of the memory table, in any order.
    pub regions: Vec<RegionConfig>,
    /// Page size of the memory backing the regions.
    #[serde(default)]
    pub huge_pages: HugePageConfig,
    /// Maximum number of scatter/gather segments of a request.
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
}

impl MemoryMapConfig {
    /// Parses a configuration from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds the memory map described by this configuration.
    pub fn build(&self) -> Result<GuestMemoryMap, MemoryMapError> {
        GuestMemoryMap::with_granularity(
            self.regions.iter().copied().map(MemoryRegion::from).collect(),
            self.huge_pages.into(),
        )
    }

    /// Creates an empty segment buffer sized for one request.
    pub fn segment_buffer(&self) -> Result<SegmentBuffer, ConfigError> {
        if self.max_segments == 0 {
            return Err(ConfigError::InvalidMaxSegments);
        }
        Ok(SegmentBuffer::new(self.max_segments))
    }
}
