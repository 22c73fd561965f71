//! Exercises the engine against a real file on disk through
//! `sfs_medium_std::FileMedium`, rather than the in-memory mock every other
//! test in this crate uses.

use sfs::{FormatOptions, Whence};
use sfs_crypto::{IdentityCipher, Key};
use sfs_medium_std::FileMedium;

#[test]
fn format_create_and_read_round_trip_through_a_real_file() {
    let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();

    {
        let medium = FileMedium::create(&path).unwrap();
        let mut fs = sfs::Filesystem::format_new(
            medium,
            IdentityCipher,
            Key::new(vec![0u8; 16]),
            FormatOptions::default(),
        )
        .unwrap();
        let root = fs.get_root();
        fs.create_file(&root, "hello.txt", b"hello, disk").unwrap();
        fs.close().unwrap();
    }

    let medium = FileMedium::open(&path).unwrap();
    let mut fs = sfs::Filesystem::load(medium, IdentityCipher, Key::new(vec![0u8; 16])).unwrap();
    let root = fs.get_root();
    let listing = fs.list_directory(&root).unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "hello.txt");

    let mut handle = fs.open(&listing[0]).unwrap();
    fs.seek_file(&mut handle, 0, Whence::Set).unwrap();
    let mut buf = [0u8; 11];
    fs.read_file(&mut handle, &mut buf).unwrap();
    assert_eq!(&buf, b"hello, disk");
}
