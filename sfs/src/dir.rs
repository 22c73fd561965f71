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

//! Directory engine: scans a directory's cluster chain as a sequence of
//! 32-byte slots and turns them into [`Entry`] listings, or back.

use sfs_crypto::BlockCipher;
use sfs_err::{Error, Result};
use sfs_medium::{Medium, Whence};

use crate::dirent::{self, RawEntry, ENTRY_SIZE};
use crate::fat::FatAddr;
use crate::{Clock, Entry, Filesystem, SlotLocation};

/// The result of inspecting one slot position while scanning a directory.
enum SlotScan {
    /// An all-zero slot: the logical end of the directory's used entries.
    End,
    /// A hard-delete tombstone: reusable, but entries may still follow it.
    Tombstone,
    /// A primary slot (live or soft-deleted) plus its continuations.
    Entry(Vec<[u8; ENTRY_SIZE]>),
}

impl<M: Medium, C: BlockCipher, K: Clock> Filesystem<M, C, K> {
    pub(crate) fn slots_per_cluster(&self) -> usize {
        self.geometry.cluster_size() as usize / ENTRY_SIZE
    }

    pub(crate) fn addr_of(&self, chain: &[FatAddr], index: usize, slots_per_cluster: usize) -> Result<(FatAddr, usize)> {
        let cluster_index = index / slots_per_cluster;
        chain
            .get(cluster_index)
            .map(|&cluster| (cluster, index % slots_per_cluster))
            .ok_or(Error::Corruption("directory entry spans past its chain"))
    }

    pub(crate) fn read_slot(&mut self, cluster: FatAddr, slot_in_cluster: usize) -> Result<[u8; ENTRY_SIZE]> {
        let offset = self.geometry.cluster_offset(cluster.fat_number, cluster.cluster_number)
            + (slot_in_cluster * ENTRY_SIZE) as u64;
        self.medium.seek(offset as i64, Whence::Set)?;
        let mut buf = [0u8; ENTRY_SIZE];
        let key = self.global_key.clone();
        crate::cluster::read_range_exact(&mut self.medium, &self.cipher, &key, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn write_slot(&mut self, cluster: FatAddr, slot_in_cluster: usize, data: &[u8; ENTRY_SIZE]) -> Result<()> {
        let offset = self.geometry.cluster_offset(cluster.fat_number, cluster.cluster_number)
            + (slot_in_cluster * ENTRY_SIZE) as u64;
        self.medium.seek(offset as i64, Whence::Set)?;
        let key = self.global_key.clone();
        crate::cluster::write_range(&mut self.medium, &self.cipher, &key, data)
    }

    /// Read the primary slot at `index` plus however many continuations it
    /// declares, extending `chain` with newly-walked cluster addresses as
    /// needed (callers pass the whole known chain up front, so this never
    /// has to).
    fn read_slots_at(&mut self, chain: &[FatAddr], index: usize) -> Result<SlotScan> {
        let spc = self.slots_per_cluster();
        let (cluster, slot) = self.addr_of(chain, index, spc)?;
        let primary = self.read_slot(cluster, slot)?;
        if dirent::is_all_zero(&primary) {
            return Ok(SlotScan::End);
        }
        if primary[0] & 0b0100_0000 != 0 {
            // A hard-delete tombstone: reusable space, but not the end of
            // the directory's live entries either.
            return Ok(SlotScan::Tombstone);
        }
        let continuations = primary[20] as usize;
        let mut slots = Vec::with_capacity(1 + continuations);
        slots.push(primary);
        for k in 1..=continuations {
            let (c, s) = self.addr_of(chain, index + k, spc)?;
            slots.push(self.read_slot(c, s)?);
        }
        Ok(SlotScan::Entry(slots))
    }

    fn entry_from_slots(&self, head_location: SlotLocation, slots: &[[u8; ENTRY_SIZE]]) -> Result<(Entry, bool)> {
        let raw = dirent::decode(slots)?;
        let entry = Entry {
            location: Some(head_location),
            attributes: raw.attributes,
            created: raw.created,
            modified: raw.modified,
            first_cluster: raw.first_cluster,
            file_length: raw.file_length,
            name: raw.name,
        };
        Ok((entry, raw.deleted))
    }

    /// Every live entry directly inside `dir`, in write order.
    pub fn list_directory(&mut self, dir: &Entry) -> Result<Vec<Entry>> {
        let chain = self.walk_chain(dir.first_cluster)?;
        let spc = self.slots_per_cluster();
        let total = chain.len() * spc;
        let mut entries = Vec::new();
        let mut index = 0;
        while index < total {
            match self.read_slots_at(&chain, index)? {
                SlotScan::End => break,
                SlotScan::Tombstone => index += 1,
                SlotScan::Entry(slots) => {
                    let (cluster, slot) = self.addr_of(&chain, index, spc)?;
                    let location = SlotLocation { cluster, offset: (slot * ENTRY_SIZE) as u32 };
                    let (entry, deleted) = self.entry_from_slots(location, &slots)?;
                    index += slots.len();
                    if !deleted {
                        entries.push(entry);
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Find `spaces` consecutive reusable slots in `dir`'s chain, allocating
    /// a new cluster if the chain runs out before one is found. Returns the
    /// run's starting index together with the (possibly extended) chain.
    fn find_free_run(&mut self, dir: &Entry, spaces: usize) -> Result<(usize, Vec<FatAddr>)> {
        let mut chain = self.walk_chain(dir.first_cluster)?;
        let spc = self.slots_per_cluster();
        loop {
            let total = chain.len() * spc;
            let mut index = 0;
            while index < total {
                let mut run_len = 0;
                while run_len < spaces && index + run_len < total {
                    let (cluster, slot) = self.addr_of(&chain, index + run_len, spc)?;
                    let raw = self.read_slot(cluster, slot)?;
                    let reusable = dirent::is_all_zero(&raw) || raw[0] & 0b0100_0000 != 0;
                    if !reusable {
                        // A live or soft-deleted (recoverable) slot blocks the run.
                        break;
                    }
                    run_len += 1;
                }
                if run_len == spaces {
                    return Ok((index, chain));
                }
                index += run_len.max(1);
            }
            let tail = *chain.last().unwrap();
            let new_cluster = self.allocate_cluster(tail)?;
            chain.push(new_cluster);
        }
    }

    /// Write `raw` into `parent`, returning the new live [`Entry`] handle.
    pub fn write_directory_entry(&mut self, parent: &Entry, raw: &RawEntry) -> Result<Entry> {
        let slots = dirent::encode(raw)?;
        let (start, chain) = self.find_free_run(parent, slots.len())?;
        let spc = self.slots_per_cluster();
        for (offset, slot) in slots.iter().enumerate() {
            let (cluster, slot_in_cluster) = self.addr_of(&chain, start + offset, spc)?;
            self.write_slot(cluster, slot_in_cluster, slot)?;
        }
        let (head_cluster, head_slot) = self.addr_of(&chain, start, spc)?;
        Ok(Entry {
            location: Some(SlotLocation {
                cluster: head_cluster,
                offset: (head_slot * ENTRY_SIZE) as u32,
            }),
            attributes: raw.attributes,
            created: raw.created,
            modified: raw.modified,
            first_cluster: raw.first_cluster,
            file_length: raw.file_length,
            name: raw.name.clone(),
        })
    }

    pub(crate) fn read_raw_entry(&mut self, location: SlotLocation) -> Result<RawEntry> {
        dirent::decode(&self.read_entry_slots(location)?)
    }

    /// Read an entry's primary slot plus however many continuations it
    /// declares, exposed for tooling that wants to inspect the exact bytes
    /// on disk rather than the decoded [`RawEntry`].
    pub fn read_entry_slots(&mut self, location: SlotLocation) -> Result<Vec<[u8; ENTRY_SIZE]>> {
        let primary = self.read_slot(location.cluster, location.offset as usize / ENTRY_SIZE)?;
        let continuations = primary[20] as usize;
        let mut slots = Vec::with_capacity(1 + continuations);
        slots.push(primary);
        let spc = self.slots_per_cluster();
        let base_index = location.offset as usize / ENTRY_SIZE;
        // Continuations are contiguous within the directory's content, which
        // may cross a cluster boundary; walk the same chain the entry lives
        // in to find them.
        let chain = self.chain_containing(location.cluster)?;
        for k in 1..=continuations {
            let (cluster, slot) = self.addr_of(&chain, base_index + k, spc)?;
            slots.push(self.read_slot(cluster, slot)?);
        }
        Ok(slots)
    }

    /// Re-walk the chain that a known cluster belongs to, so slot
    /// arithmetic anchored at that cluster keeps working regardless of
    /// which directory the caller started from.
    pub(crate) fn chain_containing(&mut self, cluster: FatAddr) -> Result<Vec<FatAddr>> {
        // The chain always starts at (0,0) relative offsets aren't known in
        // isolation, so walk forward from the given cluster: continuations
        // never reach backwards, only forwards within the same chain.
        self.walk_chain(cluster)
    }

    fn rewrite_span(&mut self, location: SlotLocation, slots: &[[u8; ENTRY_SIZE]]) -> Result<()> {
        let spc = self.slots_per_cluster();
        let base_index = location.offset as usize / ENTRY_SIZE;
        let chain = self.chain_containing(location.cluster)?;
        for (k, slot) in slots.iter().enumerate() {
            let (cluster, slot_in_cluster) = self.addr_of(&chain, base_index + k, spc)?;
            self.write_slot(cluster, slot_in_cluster, slot)?;
        }
        Ok(())
    }

    pub fn soft_delete(&mut self, entry: &Entry) -> Result<()> {
        let location = entry.location.ok_or(Error::InvalidArgument(
            sfs_err::ArgumentError::BadGeometry,
        ))?;
        let mut raw = self.read_raw_entry(location)?;
        raw.deleted = true;
        let slots = dirent::encode(&raw)?;
        self.rewrite_span(location, &slots)
    }

    pub fn undelete(&mut self, entry: &Entry) -> Result<()> {
        let location = entry.location.ok_or(Error::InvalidArgument(
            sfs_err::ArgumentError::BadGeometry,
        ))?;
        let mut raw = self.read_raw_entry(location)?;
        raw.deleted = false;
        let slots = dirent::encode(&raw)?;
        self.rewrite_span(location, &slots)
    }

    /// Zero every slot `entry` occupies. If anything after it in the
    /// directory is still in use, the zeroed slots are tagged as
    /// tombstones (reserved bit 6) so a later scan doesn't mistake the hole
    /// for the directory's end.
    pub fn hard_delete_slots(&mut self, entry: &Entry) -> Result<()> {
        let location = entry.location.ok_or(Error::InvalidArgument(
            sfs_err::ArgumentError::BadGeometry,
        ))?;
        let raw = self.read_raw_entry(location)?;
        let span = raw.slot_count();
        let spc = self.slots_per_cluster();
        let chain = self.chain_containing(location.cluster)?;
        let base_index = location.offset as usize / ENTRY_SIZE;

        let tombstone = self.anything_used_after(&chain, base_index + span, spc)?;
        let mut slot = [0u8; ENTRY_SIZE];
        if tombstone {
            slot[0] = 0b0100_0000;
        }
        for k in 0..span {
            let (cluster, slot_in_cluster) = self.addr_of(&chain, base_index + k, spc)?;
            self.write_slot(cluster, slot_in_cluster, &slot)?;
        }
        Ok(())
    }

    /// Whether any slot from `start` onward is still meaningfully occupied
    /// (live or soft-deleted) rather than free space or a tombstone.
    fn anything_used_after(&mut self, chain: &[FatAddr], start: usize, spc: usize) -> Result<bool> {
        let total = chain.len() * spc;
        for index in start..total {
            let (cluster, slot) = self.addr_of(chain, index, spc)?;
            let raw = self.read_slot(cluster, slot)?;
            let reusable = dirent::is_all_zero(&raw) || raw[0] & 0b0100_0000 != 0;
            if !reusable {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Rename `entry` in place if its new slot count fits within the old
    /// one, otherwise soft-delete the old run and write a fresh one.
    pub fn rename(&mut self, parent: &Entry, entry: &Entry, new_name: &str) -> Result<Entry> {
        dirent::validate_name(new_name)?;
        let location = entry.location.ok_or(Error::InvalidArgument(
            sfs_err::ArgumentError::BadGeometry,
        ))?;
        let mut raw = self.read_raw_entry(location)?;
        let old_continuations = raw.continuations();
        raw.name = new_name.to_string();
        raw.modified = self.clock.now();
        let new_continuations = raw.continuations();

        if new_continuations <= old_continuations {
            let slots = dirent::encode(&raw)?;
            let spc = self.slots_per_cluster();
            let base_index = location.offset as usize / ENTRY_SIZE;
            let chain = self.chain_containing(location.cluster)?;
            for (k, slot) in slots.iter().enumerate() {
                let (cluster, slot_in_cluster) = self.addr_of(&chain, base_index + k, spc)?;
                self.write_slot(cluster, slot_in_cluster, slot)?;
            }
            let old_span = 1 + old_continuations as usize;
            let tombstone = self.anything_used_after(&chain, base_index + old_span, spc)?;
            let mut zero = [0u8; ENTRY_SIZE];
            if tombstone {
                zero[0] = 0b0100_0000;
            }
            for k in slots.len()..old_span {
                let (cluster, slot_in_cluster) = self.addr_of(&chain, base_index + k, spc)?;
                self.write_slot(cluster, slot_in_cluster, &zero)?;
            }
            Ok(Entry {
                location: Some(location),
                attributes: raw.attributes,
                created: raw.created,
                modified: raw.modified,
                first_cluster: raw.first_cluster,
                file_length: raw.file_length,
                name: raw.name,
            })
        } else {
            self.hard_delete_slots(entry)?;
            self.write_directory_entry(parent, &raw)
        }
    }

    /// Write `entry` into `new_parent`, then remove it from its old
    /// location — in that order, so a crash between the two steps loses
    /// nothing (the file just appears to exist in both places briefly).
    pub fn move_entry(&mut self, entry: &Entry, new_parent: &Entry) -> Result<Entry> {
        let location = entry.location.ok_or(Error::InvalidArgument(
            sfs_err::ArgumentError::BadGeometry,
        ))?;
        let raw = self.read_raw_entry(location)?;
        let moved = self.write_directory_entry(new_parent, &raw)?;
        self.hard_delete_slots(entry)?;
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::new_fs;
    use crate::dirent::Attributes;

    #[test]
    fn create_then_list_round_trips_a_short_name() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let raw = crate::dirent::RawEntry {
            deleted: false,
            attributes: Attributes::NONE,
            created: fs.clock.now(),
            modified: fs.clock.now(),
            first_cluster: crate::fat::FatAddr::new(0, 1),
            file_length: 0,
            name: "file.txt".to_string(),
        };
        fs.write_directory_entry(&root, &raw).unwrap();
        let listing = fs.list_directory(&root).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "file.txt");
    }

    #[test]
    fn soft_deleted_entries_are_skipped_by_list_but_not_end_of_directory() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let raw_a = crate::dirent::RawEntry {
            deleted: false,
            attributes: Attributes::NONE,
            created: fs.clock.now(),
            modified: fs.clock.now(),
            first_cluster: crate::fat::FatAddr::new(0, 1),
            file_length: 0,
            name: "a.txt".to_string(),
        };
        let raw_b = crate::dirent::RawEntry {
            deleted: false,
            attributes: Attributes::NONE,
            created: fs.clock.now(),
            modified: fs.clock.now(),
            first_cluster: crate::fat::FatAddr::new(0, 2),
            file_length: 0,
            name: "b.txt".to_string(),
        };
        let first = fs.write_directory_entry(&root, &raw_a).unwrap();
        let _second = fs.write_directory_entry(&root, &raw_b).unwrap();
        fs.soft_delete(&first).unwrap();
        let listing = fs.list_directory(&root).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "b.txt");
    }

    #[test]
    fn rename_to_a_longer_name_relocates_the_entry() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let raw = crate::dirent::RawEntry {
            deleted: false,
            attributes: Attributes::NONE,
            created: fs.clock.now(),
            modified: fs.clock.now(),
            first_cluster: crate::fat::FatAddr::new(0, 1),
            file_length: 0,
            name: "short".to_string(),
        };
        let entry = fs.write_directory_entry(&root, &raw).unwrap();
        let renamed = fs.rename(&root, &entry, &"x".repeat(66)).unwrap();
        let listing = fs.list_directory(&root).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, renamed.name);
    }
}
