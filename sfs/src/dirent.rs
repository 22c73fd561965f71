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

//! Directory-entry codec: 32-byte slots, bit-packed timestamps, and the
//! continuation-slot scheme that lets a filename outgrow a single slot.

use std::ops::BitOr;

use sfs_err::{ArgumentError, Error, Result};

use crate::bytes::{get_u16, get_u32, put_u16, put_u32};
use crate::fat::FatAddr;
use crate::Timestamp;

pub const ENTRY_SIZE: usize = 32;
pub const PRIMARY_NAME_BYTES: usize = 11;
pub const CONTINUATION_NAME_BYTES: usize = 31;

const DELETED_BIT: u8 = 0b1000_0000;
const SUB_ENTRY_MASK: u8 = 0b0111_1111;

/// File/directory attribute flags, stored in a single on-disk byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attributes(pub u8);

impl Attributes {
    pub const NONE: Attributes = Attributes(0);
    pub const DIRECTORY: Attributes = Attributes(0b001);
    pub const READ_ONLY: Attributes = Attributes(0b010);
    pub const HIDDEN: Attributes = Attributes(0b100);

    pub fn is_directory(&self) -> bool {
        self.0 & Self::DIRECTORY.0 != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.0 & Self::READ_ONLY.0 != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.0 & Self::HIDDEN.0 != 0
    }
}

impl BitOr for Attributes {
    type Output = Attributes;

    fn bitor(self, rhs: Attributes) -> Attributes {
        Attributes(self.0 | rhs.0)
    }
}

/// The decoded form of a primary directory entry and its continuations,
/// independent of where its slots live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub deleted: bool,
    pub attributes: Attributes,
    pub created: Timestamp,
    pub modified: Timestamp,
    pub first_cluster: FatAddr,
    pub file_length: u32,
    pub name: String,
}

impl RawEntry {
    pub fn continuations(&self) -> u8 {
        continuations_for(self.name.len())
    }

    pub fn slot_count(&self) -> usize {
        1 + self.continuations() as usize
    }
}

/// Number of continuation slots a name of `name_bytes` bytes needs beyond
/// the 11 it already has room for in the primary slot.
pub fn continuations_for(name_bytes: usize) -> u8 {
    if name_bytes <= PRIMARY_NAME_BYTES {
        0
    } else {
        (name_bytes - PRIMARY_NAME_BYTES).div_ceil(CONTINUATION_NAME_BYTES) as u8
    }
}

/// Count UTF-8 code points by counting bytes that are not continuation
/// bytes (top two bits `10`), and reject names that are too long either
/// way.
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() >= 1024 {
        return Err(Error::InvalidArgument(ArgumentError::FilenameTooLong));
    }
    let code_points = name.bytes().filter(|b| b & 0xC0 != 0x80).count();
    if code_points >= 256 {
        return Err(Error::InvalidArgument(
            ArgumentError::FilenameTooManyCodePoints,
        ));
    }
    Ok(())
}

/// Encode an entry into its primary slot plus N continuation slots.
pub fn encode(entry: &RawEntry) -> Result<Vec<[u8; ENTRY_SIZE]>> {
    validate_name(&entry.name)?;
    let name_bytes = entry.name.as_bytes();
    let continuations = continuations_for(name_bytes.len());

    let mut primary = [0u8; ENTRY_SIZE];
    primary[0] = if entry.deleted { DELETED_BIT } else { 0 };
    primary[1] = entry.attributes.0;
    encode_date(entry.created, &mut primary[2..4]);
    encode_time(entry.created, &mut primary[4..7]);
    encode_date(entry.modified, &mut primary[7..9]);
    encode_time(entry.modified, &mut primary[9..12]);
    put_u16(&mut primary, 12, entry.first_cluster.fat_number);
    put_u16(&mut primary, 14, entry.first_cluster.cluster_number);
    put_u32(&mut primary, 16, entry.file_length);
    primary[20] = continuations;
    let first_chunk_len = name_bytes.len().min(PRIMARY_NAME_BYTES);
    primary[21..21 + first_chunk_len].copy_from_slice(&name_bytes[..first_chunk_len]);

    let mut slots = Vec::with_capacity(1 + continuations as usize);
    slots.push(primary);

    let mut remaining = &name_bytes[first_chunk_len..];
    for k in 1..=continuations {
        let mut slot = [0u8; ENTRY_SIZE];
        slot[0] = k | if entry.deleted { DELETED_BIT } else { 0 };
        let take = remaining.len().min(CONTINUATION_NAME_BYTES);
        slot[1..1 + take].copy_from_slice(&remaining[..take]);
        remaining = &remaining[take..];
        slots.push(slot);
    }
    Ok(slots)
}

/// Decode a primary slot plus its continuations (already gathered by the
/// directory engine). `slots[0]` must be the primary.
pub fn decode(slots: &[[u8; ENTRY_SIZE]]) -> Result<RawEntry> {
    let primary = &slots[0];
    let continuations = primary[20];
    if slots.len() != 1 + continuations as usize {
        return Err(Error::Corruption("directory entry continuation count"));
    }

    let deleted = primary[0] & DELETED_BIT != 0;
    let attributes = Attributes(primary[1]);
    let created = decode_timestamp(&primary[2..7]);
    let modified = decode_timestamp(&primary[7..12]);
    let first_cluster = FatAddr::new(get_u16(primary, 12), get_u16(primary, 14));
    let file_length = get_u32(primary, 16);

    let first_chunk_len = if continuations == 0 {
        trailing_non_zero_len(&primary[21..32])
    } else {
        PRIMARY_NAME_BYTES
    };
    let mut name_bytes = primary[21..21 + first_chunk_len].to_vec();

    for (index, slot) in slots.iter().enumerate().skip(1) {
        let expected_sub_entry = index as u8;
        if slot[0] & SUB_ENTRY_MASK != expected_sub_entry {
            return Err(Error::Corruption("directory entry continuation index"));
        }
        if (slot[0] & DELETED_BIT != 0) != deleted {
            return Err(Error::Corruption("directory entry continuation tombstone"));
        }
        let chunk_len = if index == slots.len() - 1 {
            trailing_non_zero_len(&slot[1..32])
        } else {
            CONTINUATION_NAME_BYTES
        };
        name_bytes.extend_from_slice(&slot[1..1 + chunk_len]);
    }

    let name = String::from_utf8(name_bytes).map_err(|_| Error::Corruption("directory entry name"))?;

    Ok(RawEntry {
        deleted,
        attributes,
        created,
        modified,
        first_cluster,
        file_length,
        name,
    })
}

pub fn is_all_zero(slot: &[u8; ENTRY_SIZE]) -> bool {
    slot.iter().all(|&b| b == 0)
}

/// Length of the name chunk up to (but not including) the first zero byte,
/// used to recover a short name's exact length from a zero-padded slot.
fn trailing_non_zero_len(buf: &[u8]) -> usize {
    buf.iter().position(|&b| b == 0).unwrap_or(buf.len())
}

fn encode_date(ts: Timestamp, out: &mut [u8]) {
    let year = ts.year.saturating_sub(2000).min(0x7F);
    let value: u16 = (year << 9) | ((ts.month as u16 & 0xF) << 5) | (ts.day as u16 & 0x1F);
    out.copy_from_slice(&value.to_be_bytes());
}

fn encode_time(ts: Timestamp, out: &mut [u8]) {
    let milli_tens = ((ts.millisecond / 10) as u32) & 0x7F;
    let value: u32 = ((ts.hour as u32 & 0x1F) << 19)
        | ((ts.minute as u32 & 0x3F) << 13)
        | ((ts.second as u32 & 0x3F) << 7)
        | milli_tens;
    let bytes = value.to_be_bytes();
    out.copy_from_slice(&bytes[1..4]);
}

fn decode_timestamp(buf: &[u8]) -> Timestamp {
    let date = u16::from_be_bytes([buf[0], buf[1]]);
    let year = 2000 + (date >> 9 & 0x7F);
    let month = (date >> 5 & 0xF) as u8;
    let day = (date & 0x1F) as u8;

    let time = u32::from_be_bytes([0, buf[2], buf[3], buf[4]]);
    let hour = (time >> 19 & 0x1F) as u8;
    let minute = (time >> 13 & 0x3F) as u8;
    let second = (time >> 7 & 0x3F) as u8;
    let millisecond = (time & 0x7F) * 10;

    Timestamp {
        year,
        month,
        day,
        hour,
        minute,
        second,
        millisecond: millisecond as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> RawEntry {
        RawEntry {
            deleted: false,
            attributes: Attributes::NONE,
            created: Timestamp {
                year: 2017,
                month: 3,
                day: 25,
                hour: 23,
                minute: 54,
                second: 13,
                millisecond: 750,
            },
            modified: Timestamp {
                year: 2017,
                month: 3,
                day: 26,
                hour: 0,
                minute: 3,
                second: 15,
                millisecond: 230,
            },
            first_cluster: FatAddr::new(1, 3),
            file_length: 123456,
            name: name.to_string(),
        }
    }

    #[test]
    fn round_trips_a_short_name() {
        let entry = sample("filenametxt");
        let slots = encode(&entry).unwrap();
        assert_eq!(slots.len(), 1);
        let decoded = decode(&slots).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn round_trips_a_long_name_across_continuations() {
        let name: String = "a".repeat(66);
        let entry = sample(&name);
        let slots = encode(&entry).unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0][20], 2);
        assert_eq!(slots[1][0] & SUB_ENTRY_MASK, 1);
        assert_eq!(slots[2][0] & SUB_ENTRY_MASK, 2);
        let decoded = decode(&slots).unwrap();
        assert_eq!(decoded.name, name);
    }

    #[test]
    fn continuation_boundaries_match_the_reference_table() {
        assert_eq!(continuations_for(11), 0);
        assert_eq!(continuations_for(12), 1);
        assert_eq!(continuations_for(42), 1);
        assert_eq!(continuations_for(1020), 33);
    }

    #[test]
    fn soft_deleted_bit_is_mirrored_across_continuations() {
        let mut entry = sample(&"b".repeat(50));
        entry.deleted = true;
        let slots = encode(&entry).unwrap();
        assert!(slots.iter().all(|s| s[0] & DELETED_BIT != 0));
        let decoded = decode(&slots).unwrap();
        assert!(decoded.deleted);
    }

    #[test]
    fn rejects_a_name_with_too_many_code_points() {
        let name = "a".repeat(256);
        assert!(validate_name(&name).is_err());
    }

    #[test]
    fn an_all_zero_slot_is_end_of_directory() {
        let slot = [0u8; ENTRY_SIZE];
        assert!(is_all_zero(&slot));
    }
}
