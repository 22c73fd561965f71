//! Backing-storage interface for the SFS filesystem.
//!
//! `Medium` is the narrow seam the core engine uses to reach whatever bytes
//! actually hold the filesystem: a regular file, a raw block device, or (in
//! tests) a plain in-memory buffer. The engine never assumes anything about
//! the medium beyond `read`/`write`/`seek`/`tell`/`close` on an implicit
//! cursor.

pub use sfs_err::{Error, Result};

/// Where a [`Medium::seek`] offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// A random-access byte medium with a single implicit cursor.
///
/// `read` and `write` loop internally until every requested byte has moved,
/// returning early only on EOF (for `read`) or an underlying error — callers
/// never need to retry a short transfer themselves.
pub trait Medium {
    /// Read up to `buf.len()` bytes into `buf`, returning the number of
    /// bytes actually read. Returns fewer than `buf.len()` only on EOF.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data`, returning the number of bytes written.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Move the cursor and return its new absolute position.
    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64>;

    /// Return the cursor's current absolute position.
    fn tell(&mut self) -> Result<u64> {
        self.seek(0, Whence::Cur)
    }

    /// Release any resources held by the medium.
    fn close(&mut self) -> Result<()>;

    /// Read exactly `buf.len()` bytes, failing with [`Error::ShortRead`] on
    /// EOF instead of silently returning a partial buffer.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = self.read(buf)?;
        if n != buf.len() {
            return Err(Error::ShortRead {
                expected: buf.len(),
                actual: n,
            });
        }
        Ok(())
    }

    /// Write exactly `data.len()` bytes, failing with [`Error::ShortWrite`]
    /// if the medium accepted fewer.
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let n = self.write(data)?;
        if n != data.len() {
            return Err(Error::ShortWrite {
                expected: data.len(),
                actual: n,
            });
        }
        Ok(())
    }
}

/// An in-memory [`Medium`], used by the test suites in `sfs` so they never
/// touch the real filesystem.
pub mod mock {
    use super::*;

    #[derive(Debug, Default)]
    pub struct MemMedium {
        data: Vec<u8>,
        pos: usize,
    }

    impl MemMedium {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn into_inner(self) -> Vec<u8> {
            self.data
        }
    }

    impl Medium for MemMedium {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let available = self.data.len().saturating_sub(self.pos);
            let n = available.min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn write(&mut self, data: &[u8]) -> Result<usize> {
            let end = self.pos + data.len();
            if end > self.data.len() {
                self.data.resize(end, 0);
            }
            self.data[self.pos..end].copy_from_slice(data);
            self.pos = end;
            Ok(data.len())
        }

        fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
            let base = match whence {
                Whence::Set => 0i64,
                Whence::Cur => self.pos as i64,
                Whence::End => self.data.len() as i64,
            };
            let target = base + offset;
            if target < 0 {
                return Err(Error::InvalidArgument(
                    sfs_err::ArgumentError::NegativeSeek,
                ));
            }
            self.pos = target as usize;
            Ok(self.pos as u64)
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn write_then_read_round_trips() {
            let mut m = MemMedium::new();
            m.write_all(b"hello world").unwrap();
            m.seek(0, Whence::Set).unwrap();
            let mut buf = [0u8; 11];
            m.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"hello world");
        }

        #[test]
        fn read_past_end_is_short() {
            let mut m = MemMedium::new();
            m.write_all(b"ab").unwrap();
            m.seek(0, Whence::Set).unwrap();
            let mut buf = [0u8; 4];
            let err = m.read_exact(&mut buf).unwrap_err();
            assert!(matches!(err, Error::ShortRead { expected: 4, actual: 2 }));
        }

        #[test]
        fn seek_extends_on_write_past_end() {
            let mut m = MemMedium::new();
            m.seek(10, Whence::Set).unwrap();
            m.write_all(b"x").unwrap();
            assert_eq!(m.into_inner().len(), 11);
        }
    }
}
