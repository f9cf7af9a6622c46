//! A single captured file, grounded on `original_source/src/reccfile.h` and
//! the `File` struct in `original_source/src/merklize.cpp`.
//!
//! Content is captured at build time (read fully into memory) so that
//! hashing and upload are decoupled from the state of the source
//! filesystem by the time the RPC layer runs.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::digest::{self, DigestFunction};
use crate::errors::{RecExecError, Result};
use crate::reapi_proto::build::bazel::remote::execution::v2::{Digest as DigestProto, FileNode};

#[derive(Debug, Clone)]
pub struct ReccFile {
    pub digest: DigestProto,
    pub executable: bool,
    pub contents: Vec<u8>,
}

impl ReccFile {
    /// Read `path` from disk and capture its digest, executable bit, and
    /// contents. Returns `UnreadableFile` for anything that isn't a
    /// regular file or can't be opened, matching the source's "unreadable
    /// or special files are skipped" behavior (spec §4.E).
    pub fn from_path(path: &Path, function: DigestFunction) -> Result<Self> {
        let metadata = fs::symlink_metadata(path)
            .map_err(|_| RecExecError::UnreadableFile(path.to_path_buf()))?;
        if !metadata.is_file() {
            return Err(RecExecError::UnreadableFile(path.to_path_buf()));
        }
        let contents =
            fs::read(path).map_err(|_| RecExecError::UnreadableFile(path.to_path_buf()))?;
        let executable = metadata.permissions().mode() & 0o100 != 0;
        let digest = digest::make_digest(&contents, function);
        Ok(ReccFile {
            digest,
            executable,
            contents,
        })
    }

    pub fn to_file_node(&self, name: &str) -> FileNode {
        FileNode {
            name: name.to_string(),
            digest: Some(self.digest.clone()),
            is_executable: self.executable,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    #[test]
    fn test_from_path_captures_executable_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.sh");
        let mut f = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .mode(0o755)
            .open(&path)
            .unwrap();
        f.write_all(b"#!/bin/sh\n").unwrap();
        drop(f);

        let file = ReccFile::from_path(&path, DigestFunction::Sha256).unwrap();
        assert!(file.executable);
        assert_eq!(file.contents, b"#!/bin/sh\n");
    }

    #[test]
    fn test_from_path_non_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.c");
        fs::write(&path, b"int main(){}").unwrap();

        let file = ReccFile::from_path(&path, DigestFunction::Sha256).unwrap();
        assert!(!file.executable);
    }

    #[test]
    fn test_from_path_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.c");
        let result = ReccFile::from_path(&path, DigestFunction::Sha256);
        assert!(matches!(result, Err(RecExecError::UnreadableFile(_))));
    }
}
