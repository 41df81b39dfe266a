//! Blob storage for serialized model snapshots
//!
//! Built-in stores are content-addressed: identical snapshots map to the
//! same [`BlobRef`] and are stored once.

use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHasher;

use super::BlobRef;
use crate::{Error, Result};

const REF_PREFIX: &str = "fxhash:";

/// Content-addressed reference for `bytes`.
#[must_use]
pub fn content_ref(bytes: &[u8]) -> BlobRef {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    BlobRef::new(format!("{REF_PREFIX}{:016x}-{}", hasher.finish(), bytes.len()))
}

/// Storage contract for opaque blobs.
pub trait BlobStore {
    /// Store `bytes` and return a reference to them.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` or `Error::Io` if the blob cannot be
    /// stored.
    fn put(&self, bytes: &[u8]) -> Result<BlobRef>;

    /// Fetch the blob behind `reference`, or `None` if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io`/`Error::Persistence` if the blob is unreadable.
    fn get(&self, reference: &BlobRef) -> Result<Option<Vec<u8>>>;
}

impl<T: BlobStore + ?Sized> BlobStore for &T {
    fn put(&self, bytes: &[u8]) -> Result<BlobRef> {
        (**self).put(bytes)
    }

    fn get(&self, reference: &BlobRef) -> Result<Option<Vec<u8>>> {
        (**self).get(reference)
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn put(&self, bytes: &[u8]) -> Result<BlobRef> {
        (**self).put(bytes)
    }

    fn get(&self, reference: &BlobRef) -> Result<Option<Vec<u8>>> {
        (**self).get(reference)
    }
}

/// In-memory blob store backed by `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<BlobRef, Vec<u8>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, bytes: &[u8]) -> Result<BlobRef> {
        let reference = content_ref(bytes);
        let entry = self
            .blobs
            .entry(reference.clone())
            .or_insert_with(|| bytes.to_vec());
        if entry.value().as_slice() != bytes {
            return Err(Error::Persistence(format!("hash collision on {reference}")));
        }
        Ok(reference)
    }

    fn get(&self, reference: &BlobRef) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(reference).map(|b| b.value().clone()))
    }
}

/// Filesystem blob store: one file per blob, named by its content hash.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, reference: &BlobRef) -> Result<PathBuf> {
        let name = reference
            .as_str()
            .strip_prefix(REF_PREFIX)
            .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_hexdigit() || c == '-'))
            .ok_or_else(|| Error::Persistence(format!("malformed blob reference {reference}")))?;
        Ok(self.root.join(format!("{name}.bin")))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, bytes: &[u8]) -> Result<BlobRef> {
        let reference = content_ref(bytes);
        let path = self.path_of(&reference)?;
        if !path.exists() {
            let tmp = path.with_extension("bin.tmp");
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(reference)
    }

    fn get(&self, reference: &BlobRef) -> Result<Option<Vec<u8>>> {
        let path = self.path_of(reference)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_ref_format() {
        let reference = content_ref(b"weights");
        assert!(reference.as_str().starts_with("fxhash:"));
        assert!(reference.as_str().ends_with("-7"));
        assert_eq!(reference, content_ref(b"weights"));
        assert_ne!(reference, content_ref(b"weight5"));
    }

    #[test]
    fn test_memory_put_get_dedupes() {
        let store = MemoryBlobStore::new();
        let a = store.put(b"snapshot").unwrap();
        let b = store.put(b"snapshot").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a).unwrap(), Some(b"snapshot".to_vec()));
        assert_eq!(store.get(&BlobRef::new("fxhash:0-0")).unwrap(), None);
    }

    #[test]
    fn test_fs_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        let reference = store.put(&[1, 2, 3, 4]).unwrap();
        assert_eq!(store.get(&reference).unwrap(), Some(vec![1, 2, 3, 4]));

        let reopened = FsBlobStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&reference).unwrap(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_fs_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        let err = store.get(&BlobRef::new("fxhash:../../etc/passwd")).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }
}
