//! The Merkle-tree / "input root" builder, grounded on
//! `original_source/src/merklize.{h,cpp}` and `actionbuilder.cpp`'s
//! `buildMerkleTree`/`addFileToMerkleTreeHelper`.
//!
//! A [`NestedDirectory`] is the in-memory value described in spec §3
//! ("Nested directory"): a recursive map from basename to [`ReccFile`], and
//! from basename to child `NestedDirectory`. Converting it to a digest
//! walks the tree bottom-up, serializing each level into a `Directory`
//! proto and recording the serialization in a caller-supplied blob map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use threadpool::ThreadPool;

use crate::config::Config;
use crate::digest::{self, DigestFunction};
use crate::errors::Result;
use crate::path_utils;
use crate::reapi_proto::build::bazel::remote::execution::v2::{
    Digest as DigestProto, Directory, DirectoryNode,
};
use crate::reccfile::ReccFile;

/// `files`/`subdirs` are `BTreeMap`s specifically so iteration is always in
/// lexicographic key order — `to_digest` relies on that for the
/// content-determinism invariant of spec §8.
#[derive(Debug, Default, Clone)]
pub struct NestedDirectory {
    pub files: BTreeMap<String, ReccFile>,
    pub subdirs: BTreeMap<String, NestedDirectory>,
}

impl NestedDirectory {
    pub fn new() -> Self {
        NestedDirectory::default()
    }

    /// Insert `file` at `relative_path`, creating intermediate directories
    /// as needed. Mirrors `NestedDirectory::add`'s recursive descent on
    /// `/`-separated components.
    pub fn add(&mut self, file: ReccFile, relative_path: &str) {
        match relative_path.split_once('/') {
            None => {
                self.files.insert(relative_path.to_string(), file);
            }
            Some(("", rest)) => self.add(file, rest),
            Some((head, rest)) => {
                self.subdirs
                    .entry(head.to_string())
                    .or_default()
                    .add(file, rest);
            }
        }
    }

    /// Ensure an (possibly empty) directory exists at `relative_path`,
    /// without inserting any file. Used so the remote worker can `chdir`
    /// into the resolved working directory even when it contains no files
    /// directly.
    pub fn add_directory(&mut self, relative_path: &str) {
        let trimmed = relative_path.trim_matches('/');
        if trimmed.is_empty() {
            return;
        }
        match trimmed.split_once('/') {
            None => {
                self.subdirs.entry(trimmed.to_string()).or_default();
            }
            Some((head, rest)) => {
                self.subdirs
                    .entry(head.to_string())
                    .or_default()
                    .add_directory(rest);
            }
        }
    }

    /// Serialize this directory (and, recursively, its subdirectories)
    /// into `Directory` messages, recording each serialization into
    /// `blobs` keyed by its digest, and return the root digest.
    ///
    /// Content-deterministic: the `BTreeMap`s guarantee lexicographic
    /// iteration order regardless of insertion order, so identical
    /// filesystem content always produces the same root digest (spec §8).
    pub fn to_digest(
        &self,
        blobs: &mut BTreeMap<DigestProto, Vec<u8>>,
        function: DigestFunction,
    ) -> DigestProto {
        let mut directory = Directory::default();
        for (name, file) in &self.files {
            directory.files.push(file.to_file_node(name));
        }
        for (name, subdir) in &self.subdirs {
            let sub_digest = subdir.to_digest(blobs, function);
            directory.directories.push(DirectoryNode {
                name: name.clone(),
                digest: Some(sub_digest),
            });
        }
        let blob = prost::Message::encode_to_vec(&directory);
        let dig = digest::make_digest(&blob, function);
        blobs.insert(dig.clone(), blob);
        dig
    }
}

/// Build a `NestedDirectory` over `paths`, parallelizing the read+hash
/// phase across a bounded worker pool (spec §4.E): pool size is 1 below 50
/// items, otherwise `min(configured-max, available-cores)`. Paths outside
/// `exclude_prefixes` are inserted under their path normalized relative to
/// `input_root_cwd`; everything else is skipped with a log line rather
/// than failing the whole build.
pub fn build_merkle_tree(
    paths: &[String],
    input_root_cwd: &str,
    exclude_prefixes: &[String],
    function: DigestFunction,
    pool_size: usize,
) -> (NestedDirectory, BTreeMap<DigestProto, Vec<u8>>) {
    let tree = Arc::new(Mutex::new(NestedDirectory::new()));
    let blobs: Arc<Mutex<BTreeMap<DigestProto, Vec<u8>>>> = Arc::new(Mutex::new(BTreeMap::new()));

    let pool = ThreadPool::new(pool_size.max(1));
    for path in paths {
        let path = path.clone();
        let cwd = input_root_cwd.to_string();
        let excludes = exclude_prefixes.to_vec();
        let tree = Arc::clone(&tree);
        let blobs = Arc::clone(&blobs);
        pool.execute(move || {
            process_one_path(&path, &cwd, &excludes, function, &tree, &blobs);
        });
    }
    pool.join();

    let tree = Arc::try_unwrap(tree).unwrap().into_inner().unwrap();
    let blobs = Arc::try_unwrap(blobs).unwrap().into_inner().unwrap();
    (tree, blobs)
}

fn process_one_path(
    dep: &str,
    cwd: &str,
    exclude_prefixes: &[String],
    function: DigestFunction,
    tree: &Mutex<NestedDirectory>,
    blobs: &Mutex<BTreeMap<DigestProto, Vec<u8>>>,
) {
    let merkle_path = if dep.starts_with('/') {
        dep.to_string()
    } else {
        format!("{}/{}", cwd, dep)
    };
    let merkle_path = path_utils::normalize(&merkle_path);

    if exclude_prefixes
        .iter()
        .any(|prefix| path_utils::has_prefix(&merkle_path, prefix))
    {
        debug!("Skipping \"{}\": excluded by RECC_DEPS_EXCLUDE_PATHS", merkle_path);
        return;
    }

    let relative = merkle_path.trim_start_matches('/');
    match ReccFile::from_path(Path::new(&merkle_path), function) {
        Ok(file) => {
            let mut tree = tree.lock().unwrap();
            tree.add(file.clone(), relative);
            drop(tree);
            let mut blobs = blobs.lock().unwrap();
            blobs.insert(file.digest.clone(), file.contents.clone());
        }
        Err(e) => {
            warn!("Encountered unsupported file \"{}\", skipping: {}", dep, e);
        }
    }
}

/// Pool-size policy of spec §4.E, exposed for callers that need it before
/// they have the dependency set (e.g. capacity planning) rather than going
/// through [`Config::merkle_pool_size`] directly.
pub fn pool_size_for(item_count: usize, config: &Config) -> usize {
    config.merkle_pool_size(item_count)
}

/// Snapshot an on-disk directory tree (no symlink following) into a
/// `NestedDirectory`, used when `RECC_DEPS_DIRECTORY_OVERRIDE` is set
/// (spec §4.I step 3). Grounded on `make_nesteddirectory` in
/// `original_source/src/merklize.cpp`.
pub fn snapshot_directory(root: &Path, function: DigestFunction) -> Result<NestedDirectory> {
    let mut result = NestedDirectory::new();
    snapshot_directory_into(root, &mut result, function)?;
    Ok(result)
}

fn snapshot_directory_into(
    dir: &Path,
    out: &mut NestedDirectory,
    function: DigestFunction,
) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if file_type.is_dir() {
            let mut sub = NestedDirectory::new();
            snapshot_directory_into(&path, &mut sub, function)?;
            out.subdirs.insert(name, sub);
        } else if file_type.is_file() {
            match ReccFile::from_path(&path, function) {
                Ok(file) => {
                    out.files.insert(name, file);
                }
                Err(_) => {
                    warn!("Could not read {:?}, skipping", path);
                }
            }
        }
        // Symlinks and other special files are skipped: `read_dir` +
        // `file_type()` never follows symlinks, matching the "no symlink
        // following" requirement.
    }
    Ok(())
}

pub fn to_path_buf(p: &str) -> PathBuf {
    PathBuf::from(p)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn test_order_independent_root_digest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        fs::write(base.join("a.c"), b"aaa").unwrap();
        fs::write(base.join("b.c"), b"bbb").unwrap();
        fs::create_dir(base.join("sub")).unwrap();
        fs::write(base.join("sub/c.c"), b"ccc").unwrap();

        let cwd = path_utils::path_str(base);
        let forward = vec!["a.c".to_string(), "b.c".to_string(), "sub/c.c".to_string()];
        let backward = vec!["sub/c.c".to_string(), "b.c".to_string(), "a.c".to_string()];

        let (tree1, _) = build_merkle_tree(&forward, &cwd, &[], DigestFunction::Sha256, 1);
        let (tree2, _) = build_merkle_tree(&backward, &cwd, &[], DigestFunction::Sha256, 4);

        let mut blobs1 = BTreeMap::new();
        let mut blobs2 = BTreeMap::new();
        let d1 = tree1.to_digest(&mut blobs1, DigestFunction::Sha256);
        let d2 = tree2.to_digest(&mut blobs2, DigestFunction::Sha256);
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_excluded_prefix_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        fs::write(base.join("a.c"), b"aaa").unwrap();
        fs::create_dir(base.join("secret")).unwrap();
        fs::write(base.join("secret/s.c"), b"sss").unwrap();

        let cwd = path_utils::path_str(base);
        let excluded_prefix = format!("{}/secret", cwd);
        let deps = vec!["a.c".to_string(), "secret/s.c".to_string()];
        let (tree, _) = build_merkle_tree(&deps, &cwd, &[excluded_prefix], DigestFunction::Sha256, 1);

        let root_name = cwd.trim_start_matches('/').split('/').next().unwrap();
        assert!(tree.subdirs.contains_key(root_name));
    }

    #[test]
    fn test_add_directory_creates_empty_dir() {
        let mut tree = NestedDirectory::new();
        tree.add_directory("work/sub");
        assert!(tree.subdirs.contains_key("work"));
        assert!(tree.subdirs["work"].subdirs.contains_key("sub"));
    }
}
