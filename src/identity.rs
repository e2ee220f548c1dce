// SPDX-License-Identifier: Apache-2.0

//! Platform-independent file identity based on inode (Unix) or file index
//! (Windows).
//!
//! The identity stays stable across renames, which is what lets the
//! prospector recognize a rotated file that reappears under a new path. An
//! identity never carries ownership of the file handle it was derived from.

use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::io;
use std::path::Path;

/// A unique key for the underlying file, independent of its path.
///
/// Two identities compare equal iff they reference the same device+inode
/// (Unix) or volume+file-index (Windows) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Device ID (Unix) or volume serial number (Windows)
    dev: u64,
    /// Inode number (Unix) or file index (Windows)
    ino: u64,
}

impl FileIdentity {
    /// Build from raw values, used when loading persisted registry entries.
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(windows)]
    pub fn from_metadata(_metadata: &Metadata) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "file identity requires an open handle on Windows",
        ))
    }

    #[cfg(unix)]
    pub fn from_file(file: &std::fs::File) -> io::Result<Self> {
        Self::from_metadata(&file.metadata()?)
    }

    #[cfg(windows)]
    pub fn from_file(file: &std::fs::File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            GetFileInformationByHandle, BY_HANDLE_FILE_INFORMATION,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        let file_index = ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64);

        Ok(Self {
            dev: info.dwVolumeSerialNumber as u64,
            ino: file_index,
        })
    }

    /// Derive the identity by opening the path read-only.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_file(&file)
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl std::fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// True when both entries reference the same underlying file.
pub fn same_file(a: &FileIdentity, b: &FileIdentity) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn identity_stable_across_reopen_and_append() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"one\n").unwrap();
        file.flush().unwrap();

        let path = file.path().to_path_buf();
        let first = FileIdentity::from_path(&path).unwrap();

        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        f.write_all(b"two\n").unwrap();
        f.flush().unwrap();

        let second = FileIdentity::from_path(&path).unwrap();
        assert!(same_file(&first, &second));
    }

    #[test]
    fn distinct_files_have_distinct_identities() {
        let a = NamedTempFile::new().unwrap();
        let b = NamedTempFile::new().unwrap();

        let id_a = FileIdentity::from_path(a.path()).unwrap();
        let id_b = FileIdentity::from_path(b.path()).unwrap();
        assert!(!same_file(&id_a, &id_b));
    }

    #[test]
    fn identity_survives_rename() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("a.log");
        let new = dir.path().join("b.log");
        std::fs::write(&old, "hello\n").unwrap();

        let before = FileIdentity::from_path(&old).unwrap();
        std::fs::rename(&old, &new).unwrap();
        let after = FileIdentity::from_path(&new).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn identity_serde_round_trip() {
        let id = FileIdentity::new(12, 34);
        let json = serde_json::to_string(&id).unwrap();
        let back: FileIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
        assert_eq!("12:34", format!("{}", id));
    }
}
