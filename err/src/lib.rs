//! Error taxonomy shared by every SFS crate.

use std::fmt;

/// A location used to annotate [`Error::Corruption`].
///
/// Kept as a plain string rather than an enum: the set of places that can
/// detect corruption is open-ended (new checks get added to the FAT engine,
/// the directory codec, ...) and the caller only ever displays it.
pub type Where = &'static str;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The medium does not start with the `"SFS v1.0"` magic.
    #[error("not an SFS filesystem")]
    BadMagic,

    /// The medium returned fewer bytes than requested on a read.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// The medium accepted fewer bytes than requested on a write.
    #[error("short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    /// An opaque error from the backing medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The FAT free cursor could not advance any further.
    #[error("out of space")]
    OutOfSpace,

    /// A caller-supplied argument violates a precondition (negative seek,
    /// oversize filename, malformed geometry, write to a read-only file).
    #[error("invalid argument: {0}")]
    InvalidArgument(ArgumentError),

    /// A named file is absent from its parent directory.
    #[error("not found")]
    NotFound,

    /// An on-disk structure violates an invariant (FAT cycle, continuation
    /// count mismatch, unterminated UTF-8 in a name slot).
    #[error("corruption in {0}")]
    Corruption(Where),
}

/// Reasons an argument can be rejected, kept distinct from [`Error`]'s other
/// variants so callers can match on *why* without parsing a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentError {
    NegativeSeek,
    FilenameTooLong,
    FilenameTooManyCodePoints,
    BadGeometry,
    ReadOnly,
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ArgumentError::NegativeSeek => "seek would move before the start of the file",
            ArgumentError::FilenameTooLong => "filename exceeds 1020 bytes",
            ArgumentError::FilenameTooManyCodePoints => "filename exceeds 255 code points",
            ArgumentError::BadGeometry => "geometry is inconsistent",
            ArgumentError::ReadOnly => "file is read-only",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
