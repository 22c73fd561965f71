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

//! Boot sector: the 512-byte header every SFS image opens with.
//!
//! The layout is fixed-width and byte-aligned, so — unlike the directory
//! entry's bit-packed timestamp fields — it maps cleanly onto a
//! `#[repr(C)]` struct read straight off the medium with `zerocopy`.

use zerocopy::big_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use sfs_err::{ArgumentError, Error, Result};
use sfs_medium::{Medium, Whence};

use crate::geometry::{Geometry, BOOT_SECTOR_SIZE, MEDIUM_FAT_SIZE};

pub const MAGIC: &[u8; 8] = b"SFS v1.0";

/// Only the first three bytes of [`MAGIC`] are actually checked on load,
/// matching the reference loader's leniency.
const MAGIC_CHECK_LEN: usize = 3;

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawBootSector {
    magic: [u8; 8],
    partition_offset: U64,
    entries_per_fat: U16,
    bytes_per_sector: U16,
    sectors_per_cluster: u8,
    reserved: [u8; 512 - 8 - 8 - 2 - 2 - 1],
}

const _: () = assert!(core::mem::size_of::<RawBootSector>() == BOOT_SECTOR_SIZE as usize);

/// Caller-supplied geometry hints for [`crate::Filesystem::format_new`].
/// Every field is coerced, never rejected: an out-of-range hint silently
/// becomes the nearest sane value rather than failing the format.
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    pub partition_offset: u64,
    pub fat_size: u16,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            partition_offset: 0,
            fat_size: MEDIUM_FAT_SIZE,
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
        }
    }
}

impl FormatOptions {
    pub fn geometry(&self) -> Geometry {
        Geometry::coerce(
            self.partition_offset,
            self.fat_size,
            self.bytes_per_sector,
            self.sectors_per_cluster,
        )
    }
}

pub fn write<M: Medium>(medium: &mut M, geometry: &Geometry) -> Result<()> {
    geometry.validate()?;
    let raw = RawBootSector {
        magic: *MAGIC,
        partition_offset: geometry.partition_offset.into(),
        entries_per_fat: geometry.entries_per_fat.into(),
        bytes_per_sector: geometry.bytes_per_sector.into(),
        sectors_per_cluster: geometry.sectors_per_cluster,
        reserved: [0u8; 512 - 8 - 8 - 2 - 2 - 1],
    };
    medium.seek(geometry.partition_offset as i64, Whence::Set)?;
    medium.write_all(raw.as_bytes())
}

pub fn load<M: Medium>(medium: &mut M, partition_offset: u64) -> Result<Geometry> {
    medium.seek(partition_offset as i64, Whence::Set)?;
    let mut buf = [0u8; BOOT_SECTOR_SIZE as usize];
    medium.read_exact(&mut buf)?;
    if buf[..MAGIC_CHECK_LEN] != MAGIC[..MAGIC_CHECK_LEN] {
        return Err(Error::BadMagic);
    }
    let raw = RawBootSector::ref_from_bytes(&buf).map_err(|_| Error::Corruption("boot sector"))?;
    let geometry = Geometry {
        partition_offset: raw.partition_offset.get(),
        entries_per_fat: raw.entries_per_fat.get(),
        bytes_per_sector: raw.bytes_per_sector.get(),
        sectors_per_cluster: raw.sectors_per_cluster,
    };
    geometry
        .validate()
        .map_err(|_| Error::InvalidArgument(ArgumentError::BadGeometry))?;
    Ok(geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfs_medium::mock::MemMedium;

    #[test]
    fn formats_then_loads_back_the_same_geometry() {
        let mut m = MemMedium::new();
        let options = FormatOptions {
            partition_offset: 0,
            fat_size: MEDIUM_FAT_SIZE,
            bytes_per_sector: 512,
            sectors_per_cluster: 8,
        };
        let geometry = options.geometry();
        write(&mut m, &geometry).unwrap();
        let loaded = load(&mut m, 0).unwrap();
        assert_eq!(loaded, geometry);
    }

    #[test]
    fn rejects_a_medium_without_the_magic() {
        let mut m = MemMedium::new();
        m.write_all(&[0u8; 512]).unwrap();
        let err = load(&mut m, 0).unwrap_err();
        assert!(matches!(err, Error::BadMagic));
    }

    #[test]
    fn honors_a_nonzero_partition_offset() {
        let mut m = MemMedium::new();
        m.write_all(&[0u8; 4096]).unwrap();
        let options = FormatOptions {
            partition_offset: 4096,
            ..FormatOptions::default()
        };
        let geometry = options.geometry();
        write(&mut m, &geometry).unwrap();
        let loaded = load(&mut m, 4096).unwrap();
        assert_eq!(loaded, geometry);
    }
}
