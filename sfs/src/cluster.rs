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

//! Cluster I/O: read/write spans of bytes through the crypto seam.
//!
//! Ciphertext lives in fixed 16-byte encryption blocks regardless of where
//! a caller's logical read or write actually starts or ends. A request that
//! doesn't land on a block boundary pulls the existing block back in,
//! decrypts it, splices the caller's bytes into place and re-encrypts the
//! whole block before it goes back to the medium — the read-modify-write
//! path the module doc promises sub-block callers.

use sfs_crypto::{Block, BlockCipher, Key, BLOCK_SIZE};
use sfs_err::Result;
use sfs_medium::{Medium, Whence};

/// Read up to `out.len()` bytes starting at the medium's current cursor,
/// leaving the cursor just past the last byte actually read. Returns fewer
/// than `out.len()` only when the medium runs out before the request does.
pub fn read_range<M: Medium, C: BlockCipher>(
    medium: &mut M,
    cipher: &C,
    key: &Key,
    out: &mut [u8],
) -> Result<usize> {
    let mut pos = medium.tell()?;
    let mut filled = 0;
    while filled < out.len() {
        let block_start = align_down(pos);
        let offset_in_block = (pos - block_start) as usize;
        medium.seek(block_start as i64, Whence::Set)?;
        let mut ct = [0u8; BLOCK_SIZE];
        let n = medium.read(&mut ct)?;
        if n <= offset_in_block {
            break;
        }
        let block = cipher.decrypt_block(key, &ct);
        let available = n - offset_in_block;
        let take = available.min(out.len() - filled);
        out[filled..filled + take].copy_from_slice(&block[offset_in_block..offset_in_block + take]);
        filled += take;
        pos += take as u64;
    }
    medium.seek(pos as i64, Whence::Set)?;
    Ok(filled)
}

/// Like [`read_range`], but fails with [`sfs_err::Error::ShortRead`] instead
/// of returning a partial buffer.
pub fn read_range_exact<M: Medium, C: BlockCipher>(
    medium: &mut M,
    cipher: &C,
    key: &Key,
    out: &mut [u8],
) -> Result<()> {
    let n = read_range(medium, cipher, key, out)?;
    if n != out.len() {
        return Err(sfs_err::Error::ShortRead {
            expected: out.len(),
            actual: n,
        });
    }
    Ok(())
}

/// Write `data` starting at the medium's current cursor, leaving the cursor
/// just past the last byte written.
pub fn write_range<M: Medium, C: BlockCipher>(
    medium: &mut M,
    cipher: &C,
    key: &Key,
    data: &[u8],
) -> Result<()> {
    let mut pos = medium.tell()?;
    let mut written = 0;
    while written < data.len() {
        let block_start = align_down(pos);
        let offset_in_block = (pos - block_start) as usize;
        let take = (BLOCK_SIZE - offset_in_block).min(data.len() - written);

        let mut block: Block = [0u8; BLOCK_SIZE];
        if offset_in_block != 0 || take < BLOCK_SIZE {
            medium.seek(block_start as i64, Whence::Set)?;
            let mut ct = [0u8; BLOCK_SIZE];
            let n = medium.read(&mut ct)?;
            if n > 0 {
                block = cipher.decrypt_block(key, &ct);
            }
        }
        block[offset_in_block..offset_in_block + take].copy_from_slice(&data[written..written + take]);

        let ct = cipher.encrypt_block(key, &block);
        medium.seek(block_start as i64, Whence::Set)?;
        medium.write_all(&ct)?;

        written += take;
        pos += take as u64;
    }
    medium.seek(pos as i64, Whence::Set)?;
    Ok(())
}

fn align_down(offset: u64) -> u64 {
    (offset / BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfs_crypto::IdentityCipher;
    use sfs_medium::mock::MemMedium;

    #[test]
    fn writes_then_reads_back_an_unaligned_span() {
        let mut m = MemMedium::new();
        let cipher = IdentityCipher;
        let key = Key::new(vec![0u8; 16]);

        m.seek(5, Whence::Set).unwrap();
        write_range(&mut m, &cipher, &key, b"hello, sfs!").unwrap();

        m.seek(5, Whence::Set).unwrap();
        let mut out = [0u8; 11];
        read_range_exact(&mut m, &cipher, &key, &mut out).unwrap();
        assert_eq!(&out, b"hello, sfs!");
    }

    #[test]
    fn partial_block_write_preserves_neighboring_bytes() {
        let mut m = MemMedium::new();
        let cipher = IdentityCipher;
        let key = Key::new(vec![0u8; 16]);

        m.seek(0, Whence::Set).unwrap();
        write_range(&mut m, &cipher, &key, &[0xAAu8; 32]).unwrap();

        m.seek(4, Whence::Set).unwrap();
        write_range(&mut m, &cipher, &key, &[0xBBu8; 3]).unwrap();

        m.seek(0, Whence::Set).unwrap();
        let mut out = [0u8; 32];
        read_range_exact(&mut m, &cipher, &key, &mut out).unwrap();
        assert_eq!(&out[0..4], &[0xAA; 4]);
        assert_eq!(&out[4..7], &[0xBB; 3]);
        assert_eq!(&out[7..32], &[0xAA; 25]);
    }

    #[test]
    fn read_past_end_is_short() {
        let mut m = MemMedium::new();
        let cipher = IdentityCipher;
        let key = Key::new(vec![0u8; 16]);
        write_range(&mut m, &cipher, &key, b"ab").unwrap();

        m.seek(0, Whence::Set).unwrap();
        let mut out = [0u8; 5];
        let n = read_range(&mut m, &cipher, &key, &mut out).unwrap();
        assert_eq!(n, 2);
    }
}
