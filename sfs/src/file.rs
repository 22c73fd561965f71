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

//! File engine: create/seek/read/write against a cluster chain, plus the
//! lifecycle operations (delete, rename, move) that operate on whole files
//! and directories alike.

use sfs_crypto::BlockCipher;
use sfs_err::{ArgumentError, Error, Result};
use sfs_medium::{Medium, Whence};

use crate::dirent::{self, Attributes, RawEntry};
use crate::fat::FatAddr;
use crate::{Clock, Entry, FileHandle, Filesystem};

impl<M: Medium, C: BlockCipher, K: Clock> Filesystem<M, C, K> {
    /// Create a file under `parent` holding `data`, then open a handle to
    /// it positioned at the start.
    pub fn create_file(&mut self, parent: &Entry, name: &str, data: &[u8]) -> Result<FileHandle> {
        dirent::validate_name(name)?;
        let chain = self.allocate_file(data.len() as u64)?;
        let now = self.clock.now();
        let raw = RawEntry {
            deleted: false,
            attributes: Attributes::NONE,
            created: now,
            modified: now,
            first_cluster: chain[0],
            file_length: data.len() as u32,
            name: name.to_string(),
        };
        let entry = self.write_directory_entry(parent, &raw)?;
        let mut handle = self.open(&entry)?;
        self.write_from(&mut handle, data)?;
        Ok(handle)
    }

    /// Create an empty subdirectory under `parent`.
    pub fn create_directory(&mut self, parent: &Entry, name: &str) -> Result<Entry> {
        dirent::validate_name(name)?;
        let chain = self.allocate_file(0)?;
        let now = self.clock.now();
        let raw = RawEntry {
            deleted: false,
            attributes: Attributes::DIRECTORY,
            created: now,
            modified: now,
            first_cluster: chain[0],
            file_length: 0,
            name: name.to_string(),
        };
        self.write_directory_entry(parent, &raw)
    }

    /// Open a handle to an already-listed entry, positioned at offset 0.
    pub fn open(&self, entry: &Entry) -> Result<FileHandle> {
        Ok(FileHandle {
            entry: entry.clone(),
            current_cluster: entry.first_cluster,
            cluster_index: 0,
            current_offset: 0,
        })
    }

    /// Move `handle`'s cursor and return its new absolute position.
    ///
    /// The reference implementation this is modeled on compares the
    /// running offset against the seek-mode constant instead of the target
    /// offset; here the cursor only restarts from the chain head when the
    /// target actually lies behind it.
    pub fn seek_file(&mut self, handle: &mut FileHandle, offset: i64, whence: Whence) -> Result<u64> {
        let base: i64 = match whence {
            Whence::Set => 0,
            Whence::Cur => handle.current_offset as i64,
            Whence::End => handle.entry.file_length as i64,
        };
        let target = base
            .checked_add(offset)
            .ok_or(Error::InvalidArgument(ArgumentError::NegativeSeek))?;
        if target < 0 {
            return Err(Error::InvalidArgument(ArgumentError::NegativeSeek));
        }
        let target = target as u64;
        let cluster_size = self.geometry.cluster_size() as u64;

        if target < handle.current_offset {
            handle.current_cluster = handle.entry.first_cluster;
            handle.cluster_index = 0;
        }

        let mut cluster_start = handle.cluster_index as u64 * cluster_size;
        while target >= cluster_start + cluster_size {
            let next = self.read_fat_entry(handle.current_cluster)?;
            if next.is_end() || next.is_free() {
                break;
            }
            handle.current_cluster = next;
            handle.cluster_index += 1;
            cluster_start += cluster_size;
        }
        handle.current_offset = target;
        Ok(target)
    }

    /// Read up to `buf.len()` bytes at the handle's cursor. Returns fewer
    /// than requested only once the file's declared length is reached.
    pub fn read_file(&mut self, handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize> {
        let cluster_size = self.geometry.cluster_size() as u64;
        let file_length = handle.entry.file_length as u64;
        let mut filled = 0;

        while filled < buf.len() && handle.current_offset < file_length {
            let offset_in_cluster = handle.current_offset % cluster_size;
            let remaining_in_cluster = cluster_size - offset_in_cluster;
            let remaining_in_file = file_length - handle.current_offset;
            let take = ((buf.len() - filled) as u64)
                .min(remaining_in_cluster)
                .min(remaining_in_file) as usize;

            let cluster = handle.current_cluster;
            self.seek_to_cluster_offset(cluster, offset_in_cluster)?;
            let key = self.global_key.clone();
            crate::cluster::read_range_exact(&mut self.medium, &self.cipher, &key, &mut buf[filled..filled + take])?;

            filled += take;
            handle.current_offset += take as u64;
            self.advance_past_cluster_boundary(handle, cluster_size)?;
        }
        Ok(filled)
    }

    /// Write `data` at the handle's cursor, allocating new clusters past
    /// the chain's current tail as needed, and persist the updated length
    /// back to the directory entry.
    pub fn write_file(&mut self, handle: &mut FileHandle, data: &[u8]) -> Result<usize> {
        if handle.entry.attributes.is_read_only() {
            return Err(Error::InvalidArgument(ArgumentError::ReadOnly));
        }
        self.write_from(handle, data)
    }

    fn write_from(&mut self, handle: &mut FileHandle, data: &[u8]) -> Result<usize> {
        let cluster_size = self.geometry.cluster_size() as u64;
        let mut written = 0;

        while written < data.len() {
            // A prior `seek_file` may have moved `current_offset` past the
            // window `current_cluster`/`cluster_index` actually cover (it
            // stops its own walk at the chain's tail rather than guessing
            // how many clusters a write will need) — catch the pair up
            // before trusting either of them below.
            self.ensure_cluster_window(handle, cluster_size)?;

            let offset_in_cluster = handle.current_offset % cluster_size;
            let remaining_in_cluster = cluster_size - offset_in_cluster;
            let take = ((data.len() - written) as u64).min(remaining_in_cluster) as usize;

            let cluster = handle.current_cluster;
            self.seek_to_cluster_offset(cluster, offset_in_cluster)?;
            let key = self.global_key.clone();
            crate::cluster::write_range(&mut self.medium, &self.cipher, &key, &data[written..written + take])?;

            written += take;
            handle.current_offset += take as u64;
            if handle.current_offset > handle.entry.file_length as u64 {
                handle.entry.file_length = handle.current_offset as u32;
            }
        }
        self.sync_entry_metadata(handle)?;
        Ok(written)
    }

    fn seek_to_cluster_offset(&mut self, cluster: FatAddr, offset_in_cluster: u64) -> Result<()> {
        let absolute = self
            .geometry
            .cluster_offset(cluster.fat_number, cluster.cluster_number)
            + offset_in_cluster;
        self.medium.seek(absolute as i64, Whence::Set)?;
        Ok(())
    }

    /// After a read crosses a cluster boundary, follow the chain forward.
    /// Stops (without error) if the chain ends — the outer read loop's
    /// `current_offset < file_length` check handles any remaining bytes.
    fn advance_past_cluster_boundary(&mut self, handle: &mut FileHandle, cluster_size: u64) -> Result<()> {
        if handle.current_offset % cluster_size != 0 {
            return Ok(());
        }
        let next = self.read_fat_entry(handle.current_cluster)?;
        if next.is_end() || next.is_free() {
            return Ok(());
        }
        handle.current_cluster = next;
        handle.cluster_index += 1;
        Ok(())
    }

    /// Bring `current_cluster`/`cluster_index` forward until their window
    /// `[cluster_index * cluster_size, (cluster_index + 1) * cluster_size)`
    /// actually covers `current_offset`, allocating past the chain's tail
    /// as needed. Unlike [`Self::advance_past_cluster_boundary`] this never
    /// stops short: a write must land on real clusters no matter how far a
    /// preceding `seek_file` moved the cursor past the chain's old end.
    fn ensure_cluster_window(&mut self, handle: &mut FileHandle, cluster_size: u64) -> Result<()> {
        let mut window_start = handle.cluster_index as u64 * cluster_size;
        while handle.current_offset >= window_start + cluster_size {
            let next = self.read_fat_entry(handle.current_cluster)?;
            let next = if next.is_end() || next.is_free() {
                self.allocate_cluster(handle.current_cluster)?
            } else {
                next
            };
            handle.current_cluster = next;
            handle.cluster_index += 1;
            window_start += cluster_size;
        }
        Ok(())
    }

    fn sync_entry_metadata(&mut self, handle: &mut FileHandle) -> Result<()> {
        let Some(location) = handle.entry.location else {
            return Ok(());
        };
        handle.entry.modified = self.clock.now();
        let mut raw = self.read_raw_entry(location)?;
        raw.file_length = handle.entry.file_length;
        raw.modified = handle.entry.modified;
        let slots = dirent::encode(&raw)?;
        self.write_slot(location.cluster, location.offset as usize / dirent::ENTRY_SIZE, &slots[0])
    }

    /// Soft-delete a file, leaving it recoverable via [`Self::undelete`].
    pub fn soft_delete_file(&mut self, entry: &Entry) -> Result<()> {
        self.soft_delete(entry)
    }

    /// Recover a soft-deleted file.
    pub fn undelete_file(&mut self, entry: &Entry) -> Result<()> {
        self.undelete(entry)
    }

    /// Permanently remove a file: free its cluster chain, then zero (or
    /// tombstone) its directory slots.
    pub fn hard_delete_file(&mut self, entry: &Entry) -> Result<()> {
        if !entry.first_cluster.is_free() {
            self.free_chain(entry.first_cluster)?;
        }
        self.hard_delete_slots(entry)
    }

    /// Rename `entry`, relocating it within `parent` if the new name no
    /// longer fits in the slots the old one occupied.
    pub fn rename_file(&mut self, parent: &Entry, entry: &Entry, new_name: &str) -> Result<Entry> {
        self.rename(parent, entry, new_name)
    }

    /// Move `entry` from its current parent into `new_parent`.
    pub fn move_file(&mut self, entry: &Entry, new_parent: &Entry) -> Result<Entry> {
        self.move_entry(entry, new_parent)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::new_fs;
    use sfs_medium::Whence;

    #[test]
    fn create_then_read_returns_the_same_bytes() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let data = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut handle = fs.create_file(&root, "test.txt", data).unwrap();
        assert_eq!(handle.entry.first_cluster, crate::fat::FatAddr::new(0, 1));
        assert_eq!(handle.entry.file_length, data.len() as u32);

        fs.seek_file(&mut handle, 0, Whence::Set).unwrap();
        let mut out = vec![0u8; data.len()];
        let n = fs.read_file(&mut handle, &mut out).unwrap();
        assert_eq!(n, data.len());
        assert_eq!(&out, data);
    }

    #[test]
    fn write_spans_multiple_clusters() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let cluster_size = fs.geometry().cluster_size() as usize;
        let data = vec![0x42u8; cluster_size * 2 + 17];
        let mut handle = fs.create_file(&root, "big.bin", &data).unwrap();

        fs.seek_file(&mut handle, 0, Whence::Set).unwrap();
        let mut out = vec![0u8; data.len()];
        let n = fs.read_file(&mut handle, &mut out).unwrap();
        assert_eq!(n, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn read_past_end_of_file_is_short() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let mut handle = fs.create_file(&root, "short.txt", b"hi").unwrap();
        fs.seek_file(&mut handle, 0, Whence::Set).unwrap();
        let mut out = [0u8; 10];
        let n = fs.read_file(&mut handle, &mut out).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn write_after_seeking_past_the_chains_end_extends_it_instead_of_corrupting_the_tail() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let cluster_size = fs.geometry().cluster_size() as u64;
        let mut handle = fs.create_file(&root, "sparse.bin", b"only one cluster").unwrap();

        let target = cluster_size * 5;
        fs.seek_file(&mut handle, target as i64, Whence::Set).unwrap();
        fs.write_file(&mut handle, b"tail").unwrap();
        assert_eq!(handle.entry.file_length as u64, target + 4);

        fs.seek_file(&mut handle, 0, Whence::Set).unwrap();
        let mut head = [0u8; 17];
        fs.read_file(&mut handle, &mut head).unwrap();
        assert_eq!(&head, b"only one cluster");

        fs.seek_file(&mut handle, target as i64, Whence::Set).unwrap();
        let mut tail = [0u8; 4];
        fs.read_file(&mut handle, &mut tail).unwrap();
        assert_eq!(&tail, b"tail");
    }

    #[test]
    fn soft_delete_then_undelete_preserves_contents() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let handle = fs.create_file(&root, "a.txt", b"hello").unwrap();
        fs.soft_delete_file(&handle.entry).unwrap();
        assert!(fs.list_directory(&root).unwrap().is_empty());
        fs.undelete_file(&handle.entry).unwrap();
        let listing = fs.list_directory(&root).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "a.txt");
    }

    #[test]
    fn hard_delete_then_rescan_never_reveals_the_file() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let handle = fs.create_file(&root, "a.txt", b"hello").unwrap();
        let _second = fs.create_file(&root, "b.txt", b"world").unwrap();
        fs.hard_delete_file(&handle.entry).unwrap();
        let listing = fs.list_directory(&root).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "b.txt");
    }

    #[test]
    fn move_file_relocates_into_the_new_parent() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let sub = fs.create_directory(&root, "sub").unwrap();
        let handle = fs.create_file(&root, "a.txt", b"hello").unwrap();
        fs.move_file(&handle.entry, &sub).unwrap();
        assert!(fs.list_directory(&root).unwrap().is_empty());
        let moved = fs.list_directory(&sub).unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].name, "a.txt");
    }

    #[test]
    fn read_only_files_reject_writes() {
        let mut fs = new_fs();
        let root = fs.get_root();
        let mut handle = fs.create_file(&root, "ro.txt", b"hello").unwrap();
        handle.entry.attributes = crate::dirent::Attributes::READ_ONLY;
        assert!(fs.write_file(&mut handle, b"!").is_err());
    }
}
