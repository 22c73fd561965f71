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

//! Big-endian integer codec.
//!
//! Every on-disk integer in SFS is network order regardless of host
//! endianness, so boot-sector fields, FAT entries and directory-entry
//! lengths all go through these helpers rather than `to_ne_bytes`.

use sfs_err::Result;
use sfs_medium::Medium;

pub fn get_u16(buf: &[u8], pos: usize) -> u16 {
    u16::from_be_bytes([buf[pos], buf[pos + 1]])
}

pub fn get_u32(buf: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

pub fn get_u64(buf: &[u8], pos: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_be_bytes(b)
}

pub fn put_u16(buf: &mut [u8], pos: usize, value: u16) {
    buf[pos..pos + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn put_u32(buf: &mut [u8], pos: usize, value: u32) {
    buf[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
}

pub fn put_u64(buf: &mut [u8], pos: usize, value: u64) {
    buf[pos..pos + 8].copy_from_slice(&value.to_be_bytes());
}

/// Read a big-endian integer straight off a [`Medium`] at its current
/// cursor position, advancing it past the value.
pub fn read_u8<M: Medium>(medium: &mut M) -> Result<u8> {
    let mut buf = [0u8; 1];
    medium.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u16<M: Medium>(medium: &mut M) -> Result<u16> {
    let mut buf = [0u8; 2];
    medium.read_exact(&mut buf)?;
    Ok(get_u16(&buf, 0))
}

pub fn read_u32<M: Medium>(medium: &mut M) -> Result<u32> {
    let mut buf = [0u8; 4];
    medium.read_exact(&mut buf)?;
    Ok(get_u32(&buf, 0))
}

pub fn read_u64<M: Medium>(medium: &mut M) -> Result<u64> {
    let mut buf = [0u8; 8];
    medium.read_exact(&mut buf)?;
    Ok(get_u64(&buf, 0))
}

pub fn write_u8<M: Medium>(medium: &mut M, value: u8) -> Result<()> {
    medium.write_all(&[value])
}

pub fn write_u16<M: Medium>(medium: &mut M, value: u16) -> Result<()> {
    medium.write_all(&value.to_be_bytes())
}

pub fn write_u32<M: Medium>(medium: &mut M, value: u32) -> Result<()> {
    medium.write_all(&value.to_be_bytes())
}

pub fn write_u64<M: Medium>(medium: &mut M, value: u64) -> Result<()> {
    medium.write_all(&value.to_be_bytes())
}
