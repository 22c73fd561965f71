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

//! A single-file, optionally encrypted, FAT-inspired block filesystem.
//!
//! [`Filesystem`] is the one entry point: it owns a [`Medium`] (wherever the
//! bytes actually live), a [`BlockCipher`] plus the metadata key, the
//! partition [`Geometry`], and a cached FAT free-cursor. Every operation —
//! formatting, directory listing, file I/O — goes through its methods,
//! split by concern across this crate's modules the way the FAT engine,
//! the directory codec and the file engine are split in the design.

pub mod boot;
pub mod bytes;
pub mod clock;
pub mod cluster;
pub mod dir;
pub mod dirent;
pub mod fat;
pub mod file;
pub mod geometry;

use std::cell::Cell;

pub use sfs_err::{ArgumentError, Error, Result};
pub use sfs_medium::{Medium, Whence};
pub use sfs_crypto::{BlockCipher, Key};

pub use boot::FormatOptions;
pub use clock::{Clock, FixedClock, SystemClock, Timestamp};
pub use dirent::Attributes;
pub use fat::FatAddr;

use geometry::Geometry;

/// Where a directory entry's primary 32-byte slot lives on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLocation {
    pub cluster: FatAddr,
    pub offset: u32,
}

/// A handle to a file or directory: the decoded directory-entry fields plus
/// where its slot lives, so the caller can hand it back to `rename`,
/// `move_file` or a delete without re-walking the tree.
///
/// The root directory has no parent slot to point at — rather than invent a
/// self-referential "parent of the root is the root" pointer, it is modeled
/// as the distinguished variant with `location: None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub location: Option<SlotLocation>,
    pub attributes: Attributes,
    pub created: Timestamp,
    pub modified: Timestamp,
    pub first_cluster: FatAddr,
    pub file_length: u32,
    pub name: String,
}

impl Entry {
    pub fn root(first_cluster: FatAddr) -> Self {
        Self {
            location: None,
            attributes: Attributes::DIRECTORY,
            created: Timestamp::default(),
            modified: Timestamp::default(),
            first_cluster,
            file_length: 0,
            name: String::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.location.is_none()
    }
}

/// An open file or directory's read/write cursor.
pub struct FileHandle {
    pub entry: Entry,
    pub(crate) current_cluster: FatAddr,
    pub(crate) cluster_index: u32,
    pub(crate) current_offset: u64,
}

/// On-disk size and identity summary for [`Filesystem::describe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub name: String,
    pub attributes: Attributes,
    pub created: Timestamp,
    pub modified: Timestamp,
    pub file_length: u32,
}

impl From<&Entry> for Stat {
    fn from(entry: &Entry) -> Self {
        Self {
            name: entry.name.clone(),
            attributes: entry.attributes,
            created: entry.created,
            modified: entry.modified,
            file_length: entry.file_length,
        }
    }
}

pub struct Filesystem<M: Medium, C: BlockCipher, K: Clock = SystemClock> {
    pub(crate) medium: M,
    pub(crate) cipher: C,
    pub(crate) global_key: Key,
    pub(crate) clock: K,
    pub(crate) geometry: Geometry,
    pub(crate) root_cluster: FatAddr,
    pub(crate) free_cursor: Cell<FatAddr>,
}

impl<M: Medium, C: BlockCipher> Filesystem<M, C, SystemClock> {
    /// Format a brand-new filesystem onto `medium`, using the real wall
    /// clock to stamp the root directory.
    pub fn format_new(medium: M, cipher: C, global_key: Key, options: FormatOptions) -> Result<Self> {
        Self::format_with_clock(medium, cipher, global_key, options, SystemClock)
    }

    /// Load an already-formatted filesystem, using the real wall clock for
    /// any timestamps it subsequently writes.
    pub fn load(medium: M, cipher: C, global_key: Key) -> Result<Self> {
        Self::load_with_clock(medium, cipher, global_key, SystemClock)
    }

    /// Format an SFS filesystem starting at `partition_offset` within
    /// `medium` from raw geometry hints, so it can be embedded inside a
    /// larger container.
    pub fn format_partition(
        medium: M,
        cipher: C,
        global_key: Key,
        partition_offset: u64,
        fat_size: u16,
        bytes_per_sector: u32,
        sectors_per_cluster: u32,
    ) -> Result<Self> {
        let options = FormatOptions {
            partition_offset,
            fat_size,
            bytes_per_sector,
            sectors_per_cluster,
        };
        Self::format_with_clock(medium, cipher, global_key, options, SystemClock)
    }
}

impl<M: Medium, C: BlockCipher, K: Clock> Filesystem<M, C, K> {
    pub fn format_with_clock(
        mut medium: M,
        cipher: C,
        global_key: Key,
        options: FormatOptions,
        clock: K,
    ) -> Result<Self> {
        let geometry = options.geometry();
        boot::write(&mut medium, &geometry)?;

        let mut fs = Self {
            medium,
            cipher,
            global_key,
            clock,
            geometry,
            root_cluster: FatAddr::new(0, 0),
            free_cursor: Cell::new(FatAddr::new(0, 0)),
        };

        let root_cluster = fs.allocate_file(0)?[0];
        fs.root_cluster = root_cluster;
        Ok(fs)
    }

    pub fn load_with_clock(mut medium: M, cipher: C, global_key: Key, clock: K) -> Result<Self> {
        let geometry = boot::load(&mut medium, 0)?;
        let mut fs = Self {
            medium,
            cipher,
            global_key,
            clock,
            geometry,
            root_cluster: FatAddr::new(0, 0),
            free_cursor: Cell::new(FatAddr::new(0, 0)),
        };
        fs.root_cluster = fs.find_root_cluster()?;
        Ok(fs)
    }

    pub fn close(mut self) -> Result<()> {
        self.medium.close()
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn get_root(&self) -> Entry {
        Entry::root(self.root_cluster)
    }

    pub fn describe(&self, entry: &Entry) -> Stat {
        Stat::from(entry)
    }

    pub fn describe_handle(&self, handle: &FileHandle) -> Stat {
        Stat::from(&handle.entry)
    }

    /// The very first data cluster ever allocated (the data block's first
    /// cluster, `(0, 0)`) is always the root directory: `format_new` places
    /// it there and nothing else is ever allocated before it.
    fn find_root_cluster(&self) -> Result<FatAddr> {
        Ok(FatAddr::new(0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfs_crypto::IdentityCipher;
    use sfs_medium::mock::MemMedium;

    pub(crate) fn new_fs() -> Filesystem<MemMedium, IdentityCipher, FixedClock> {
        let clock = FixedClock(Timestamp {
            year: 2026,
            month: 7,
            day: 27,
            hour: 12,
            minute: 0,
            second: 0,
            millisecond: 0,
        });
        Filesystem::format_with_clock(
            MemMedium::new(),
            IdentityCipher,
            Key::new(vec![0u8; 16]),
            FormatOptions::default(),
            clock,
        )
        .unwrap()
    }

    #[test]
    fn formats_and_exposes_an_empty_root() {
        let fs = new_fs();
        let root = fs.get_root();
        assert!(root.is_root());
        assert!(root.attributes.is_directory());
    }

    #[test]
    fn reloads_geometry_after_format() {
        let clock = FixedClock(Timestamp::default());
        let fs = Filesystem::format_with_clock(
            MemMedium::new(),
            IdentityCipher,
            Key::new(vec![0u8; 16]),
            FormatOptions::default(),
            clock,
        )
        .unwrap();
        let geometry = fs.geometry();
        let data = {
            let mut m = fs;
            m.medium.seek(0, sfs_medium::Whence::Set).unwrap();
            let mut buf = Vec::new();
            loop {
                let mut chunk = [0u8; 4096];
                let n = m.medium.read(&mut chunk).unwrap();
                if n == 0 {
                    break;
                }
                data_extend(&mut buf, &chunk[..n]);
            }
            buf
        };
        let mut raw = MemMedium::new();
        raw.write_all(&data).unwrap();
        let reloaded = boot::load(&mut raw, 0).unwrap();
        assert_eq!(reloaded, geometry);

        fn data_extend(buf: &mut Vec<u8>, chunk: &[u8]) {
            buf.extend_from_slice(chunk);
        }
    }
}
