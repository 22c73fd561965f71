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

//! The file allocation table: cluster-chain addressing and allocation.

use log::{debug, trace, warn};

use sfs_crypto::{BlockCipher, Key};
use sfs_err::{Error, Result};
use sfs_medium::{Medium, Whence};

use crate::{cluster, Clock, Filesystem};

/// A cluster's address within the FAT address space: which data block's FAT
/// it lives in, and which slot of that FAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FatAddr {
    pub fat_number: u16,
    pub cluster_number: u16,
}

impl FatAddr {
    pub const FREE: FatAddr = FatAddr::new(0, 0);
    pub const END: FatAddr = FatAddr::new(0xFFFF, 0xFFFF);

    pub const fn new(fat_number: u16, cluster_number: u16) -> Self {
        Self {
            fat_number,
            cluster_number,
        }
    }

    pub fn is_free(&self) -> bool {
        *self == Self::FREE
    }

    pub fn is_end(&self) -> bool {
        *self == Self::END
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let mut buf = [0u8; 4];
        crate::bytes::put_u16(&mut buf, 0, self.fat_number);
        crate::bytes::put_u16(&mut buf, 2, self.cluster_number);
        buf
    }

    pub fn from_bytes(buf: &[u8; 4]) -> Self {
        Self::new(crate::bytes::get_u16(buf, 0), crate::bytes::get_u16(buf, 2))
    }

    /// The next address in scan order: same FAT, next cluster slot, rolling
    /// over into the next FAT once a table is exhausted.
    fn next_in_scan_order(&self, entries_per_fat: u16) -> Result<FatAddr> {
        if self.cluster_number + 1 < entries_per_fat {
            Ok(FatAddr::new(self.fat_number, self.cluster_number + 1))
        } else {
            let fat_number = self
                .fat_number
                .checked_add(1)
                .ok_or(Error::OutOfSpace)?;
            Ok(FatAddr::new(fat_number, 0))
        }
    }
}

impl<M: Medium, C: BlockCipher, K: Clock> Filesystem<M, C, K> {
    fn jump_to_fat(&mut self, fat_number: u16) -> Result<u64> {
        let location = self.geometry.fat_offset(fat_number);
        self.ensure_extended(location, self.geometry.fat_size() as u64)?;
        self.medium.seek(location as i64, Whence::Set)?;
        Ok(location)
    }

    fn jump_to_cluster(&mut self, addr: FatAddr) -> Result<u64> {
        let location = self
            .geometry
            .cluster_offset(addr.fat_number, addr.cluster_number);
        self.ensure_extended(location, self.geometry.cluster_size() as u64)?;
        self.medium.seek(location as i64, Whence::Set)?;
        Ok(location)
    }

    /// Grow the medium with zero-filled bytes if `location` falls past its
    /// current end: a new FAT appears as a fresh all-zero table, a new
    /// cluster as zero-filled payload.
    fn ensure_extended(&mut self, location: u64, fill_len: u64) -> Result<()> {
        let end = self.medium.seek(0, Whence::End)?;
        if end < location {
            self.medium.seek(location as i64, Whence::Set)?;
            self.medium.write_all(&vec![0u8; fill_len as usize])?;
        }
        Ok(())
    }

    pub(crate) fn read_fat_entry(&mut self, loc: FatAddr) -> Result<FatAddr> {
        self.jump_to_fat(loc.fat_number)?;
        self.medium
            .seek(loc.cluster_number as i64 * 4, Whence::Cur)?;
        let mut buf = [0u8; 4];
        self.medium.read_exact(&mut buf)?;
        Ok(FatAddr::from_bytes(&buf))
    }

    pub(crate) fn write_fat_entry(&mut self, loc: FatAddr, value: FatAddr) -> Result<()> {
        self.jump_to_fat(loc.fat_number)?;
        self.medium
            .seek(loc.cluster_number as i64 * 4, Whence::Cur)?;
        self.medium.write_all(&value.to_bytes())
    }

    /// Zero-fill a freshly allocated cluster so no stale bytes from a
    /// previously deleted file are ever exposed.
    pub(crate) fn write_new_cluster(&mut self, addr: FatAddr) -> Result<()> {
        self.jump_to_cluster(addr)?;
        let zeros = vec![0u8; self.geometry.cluster_size() as usize];
        let key = self.global_key.clone();
        cluster::write_range(&mut self.medium, &self.cipher, &key, &zeros)
    }

    /// Scan forward from `start` (inclusive) for the first free entry.
    pub(crate) fn find_next_free(&mut self, start: FatAddr) -> Result<FatAddr> {
        let mut candidate = start;
        loop {
            if self.read_fat_entry(candidate)?.is_free() {
                return Ok(candidate);
            }
            candidate = candidate.next_in_scan_order(self.geometry.entries_per_fat)?;
        }
    }

    /// The cached next-free cursor, re-validated (and re-scanned from
    /// scratch if it no longer points at a free entry).
    pub(crate) fn first_free(&mut self) -> Result<FatAddr> {
        let cached = self.free_cursor.get();
        if self.read_fat_entry(cached)?.is_free() {
            return Ok(cached);
        }
        let found = self.find_next_free(FatAddr::FREE)?;
        self.free_cursor.set(found);
        Ok(found)
    }

    fn advance_free_cursor_past(&mut self, addr: FatAddr) -> Result<()> {
        let next = addr.next_in_scan_order(self.geometry.entries_per_fat)?;
        let found = self.find_next_free(next)?;
        self.free_cursor.set(found);
        Ok(())
    }

    /// Allocate a chain long enough to hold `length` bytes (at least one
    /// cluster, even for an empty file), linking and zero-filling every
    /// cluster along the way. On [`Error::OutOfSpace`] every entry already
    /// linked by this call is rolled back (tail-to-head) before returning.
    pub(crate) fn allocate_file(&mut self, length: u64) -> Result<Vec<FatAddr>> {
        let cluster_size = self.geometry.cluster_size() as u64;
        let needed = if length == 0 {
            1
        } else {
            length.div_ceil(cluster_size) as usize
        };

        let mut chain = Vec::with_capacity(needed);
        let result = (|| -> Result<()> {
            let mut cursor = self.first_free()?;
            for _ in 0..needed {
                self.write_fat_entry(cursor, FatAddr::END)?;
                self.write_new_cluster(cursor)?;
                if let Some(&previous) = chain.last() {
                    self.write_fat_entry(previous, cursor)?;
                }
                chain.push(cursor);
                if chain.len() < needed {
                    cursor = self.find_next_free(cursor.next_in_scan_order(self.geometry.entries_per_fat)?)?;
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                if let Some(&tail) = chain.last() {
                    self.advance_free_cursor_past(tail)?;
                }
                trace!("allocated {} cluster(s) for {} byte(s)", chain.len(), length);
                Ok(chain)
            }
            Err(err) => {
                for addr in chain.into_iter().rev() {
                    if let Err(rollback_err) = self.write_fat_entry(addr, FatAddr::FREE) {
                        warn!("failed to free {addr:?} while rolling back a failed allocation: {rollback_err}");
                    }
                }
                Err(err)
            }
        }
    }

    /// Extend an existing chain by one cluster.
    pub(crate) fn allocate_cluster(&mut self, tail: FatAddr) -> Result<FatAddr> {
        let next = self.first_free()?;
        self.write_fat_entry(next, FatAddr::END)?;
        self.write_new_cluster(next)?;
        self.write_fat_entry(tail, next)?;
        self.advance_free_cursor_past(next)?;
        Ok(next)
    }

    /// Shrink a chain so `new_tail` becomes its last cluster, freeing
    /// everything after it. Walks forward collecting the doomed clusters
    /// first, then frees tail-to-head and only then marks `new_tail` as the
    /// end of the chain, so a crash mid-truncate never leaves a dangling
    /// pointer into freed space.
    pub(crate) fn truncate_chain(&mut self, new_tail: FatAddr) -> Result<()> {
        let mut doomed = Vec::new();
        let mut cursor = self.read_fat_entry(new_tail)?;
        while !cursor.is_end() && !cursor.is_free() {
            doomed.push(cursor);
            cursor = self.read_fat_entry(cursor)?;
        }
        for addr in doomed.into_iter().rev() {
            self.mark_free(addr)?;
        }
        self.write_fat_entry(new_tail, FatAddr::END)
    }

    /// Free every cluster in a chain, tail-to-head.
    pub(crate) fn free_chain(&mut self, head: FatAddr) -> Result<()> {
        let mut chain = vec![head];
        let mut cursor = self.read_fat_entry(head)?;
        while !cursor.is_end() && !cursor.is_free() {
            chain.push(cursor);
            cursor = self.read_fat_entry(cursor)?;
        }
        for addr in chain.into_iter().rev() {
            self.mark_free(addr)?;
        }
        Ok(())
    }

    pub(crate) fn mark_free(&mut self, addr: FatAddr) -> Result<()> {
        self.write_fat_entry(addr, FatAddr::FREE)?;
        if scan_order_key(addr) < scan_order_key(self.free_cursor.get()) {
            debug!("free cursor rewound to {addr:?}");
            self.free_cursor.set(addr);
        }
        Ok(())
    }

    /// Walk a chain from `head`, collecting every cluster address in order.
    pub(crate) fn walk_chain(&mut self, head: FatAddr) -> Result<Vec<FatAddr>> {
        let mut chain = vec![head];
        let mut cursor = self.read_fat_entry(head)?;
        while !cursor.is_end() {
            if cursor.is_free() {
                return Err(Error::Corruption("fat chain"));
            }
            chain.push(cursor);
            cursor = self.read_fat_entry(cursor)?;
        }
        Ok(chain)
    }
}

fn scan_order_key(addr: FatAddr) -> (u16, u16) {
    (addr.fat_number, addr.cluster_number)
}
