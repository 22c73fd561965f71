// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Partition geometry: the handful of numbers that turn a FAT address into
//! an absolute byte offset into the medium.
//!
//! Geometry doubles as SFS's configuration surface — there is no separate
//! config file or builder outside of [`crate::boot::FormatOptions`], because
//! the boot sector itself *is* the persisted configuration.

use sfs_err::{ArgumentError, Error, Result};

pub const BOOT_SECTOR_SIZE: u64 = 512;

pub const FAT_ENTRY_SIZE: u64 = 4;

pub const SMALL_FAT_SIZE: u16 = 2048;
pub const MEDIUM_FAT_SIZE: u16 = 4096;
pub const LARGE_FAT_SIZE: u16 = 8192;

const MIN_BYTES_PER_SECTOR: u32 = 512;
const MAX_BYTES_PER_SECTOR: u32 = 32768;
const MAX_SECTORS_PER_CLUSTER: u32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub partition_offset: u64,
    pub entries_per_fat: u16,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
}

impl Geometry {
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    pub fn fat_size(&self) -> u32 {
        self.entries_per_fat as u32 * FAT_ENTRY_SIZE as u32
    }

    /// Bytes occupied by one FAT table plus the clusters it indexes.
    pub fn data_block_size(&self) -> u64 {
        self.fat_size() as u64 + self.entries_per_fat as u64 * self.cluster_size() as u64
    }

    pub fn fat_offset(&self, fat_number: u16) -> u64 {
        self.partition_offset
            + BOOT_SECTOR_SIZE
            + fat_number as u64 * self.data_block_size()
    }

    pub fn fat_entry_offset(&self, fat_number: u16, cluster_number: u16) -> u64 {
        self.fat_offset(fat_number) + cluster_number as u64 * FAT_ENTRY_SIZE
    }

    pub fn cluster_offset(&self, fat_number: u16, cluster_number: u16) -> u64 {
        self.fat_offset(fat_number) + self.fat_size() as u64 + cluster_number as u64 * self.cluster_size() as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.bytes_per_sector == 0 || self.sectors_per_cluster == 0 || self.entries_per_fat == 0 {
            return Err(Error::InvalidArgument(ArgumentError::BadGeometry));
        }
        Ok(())
    }

    /// Coerce raw, possibly nonsensical, caller-supplied geometry into
    /// values the engine can safely address. Mirrors the original
    /// filesystem's three independent coercion rules.
    pub fn coerce(partition_offset: u64, fat_size: u16, bytes_per_sector: u32, sectors_per_cluster: u32) -> Geometry {
        let entries_per_fat = coerce_fat_size(fat_size);
        let bytes_per_sector = coerce_bytes_per_sector(bytes_per_sector);
        let sectors_per_cluster = coerce_sectors_per_cluster(sectors_per_cluster, bytes_per_sector as u32);
        Geometry {
            partition_offset,
            entries_per_fat,
            bytes_per_sector,
            sectors_per_cluster,
        }
    }
}

fn highest_set_bit(value: u32) -> u32 {
    1u32 << (31 - value.leading_zeros())
}

fn coerce_fat_size(fat_size: u16) -> u16 {
    match fat_size {
        SMALL_FAT_SIZE | MEDIUM_FAT_SIZE | LARGE_FAT_SIZE => fat_size,
        _ => MEDIUM_FAT_SIZE,
    }
}

fn coerce_bytes_per_sector(bytes_per_sector: u32) -> u16 {
    if bytes_per_sector < MIN_BYTES_PER_SECTOR {
        return MIN_BYTES_PER_SECTOR as u16;
    }
    highest_set_bit(bytes_per_sector.min(MAX_BYTES_PER_SECTOR)) as u16
}

fn coerce_sectors_per_cluster(sectors_per_cluster: u32, bytes_per_sector: u32) -> u8 {
    if sectors_per_cluster == 0 {
        return 1;
    }
    if sectors_per_cluster * bytes_per_sector > MAX_BYTES_PER_SECTOR {
        return (MAX_BYTES_PER_SECTOR / bytes_per_sector) as u8;
    }
    highest_set_bit(sectors_per_cluster.min(MAX_SECTORS_PER_CLUSTER)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_undersized_inputs() {
        let g = Geometry::coerce(0, MEDIUM_FAT_SIZE - 1, 500, 128);
        assert_eq!(g.entries_per_fat, MEDIUM_FAT_SIZE);
        assert_eq!(g.bytes_per_sector, 512);
        assert_eq!(g.sectors_per_cluster, 64);
    }

    #[test]
    fn coerces_oversized_cluster() {
        let g = Geometry::coerce(0, MEDIUM_FAT_SIZE, 544, 20);
        assert_eq!(g.entries_per_fat, MEDIUM_FAT_SIZE);
        assert_eq!(g.bytes_per_sector, 512);
        assert_eq!(g.sectors_per_cluster, 16);
    }

    #[test]
    fn leaves_already_valid_geometry_alone() {
        let g = Geometry::coerce(0, MEDIUM_FAT_SIZE, 512, 64);
        assert_eq!(g.entries_per_fat, MEDIUM_FAT_SIZE);
        assert_eq!(g.bytes_per_sector, 512);
        assert_eq!(g.sectors_per_cluster, 64);
    }

    #[test]
    fn addresses_are_monotonic_across_data_blocks() {
        let g = Geometry::coerce(0, SMALL_FAT_SIZE, 512, 8);
        let first = g.cluster_offset(0, 0);
        let second = g.cluster_offset(1, 0);
        assert!(second > first);
        assert_eq!(second - first, g.data_block_size());
    }
}
