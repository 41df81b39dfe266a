//! Compressed blob store wrapper
//!
//! Provides transparent LZ4/ZSTD compression for any `BlobStore` backend.
//! Model snapshots are often dominated by zero-initialised or sparse weights.

use super::{BlobRef, BlobStore};
use crate::{Error, Result};

/// Compression algorithm for blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// LZ4 - Fast compression (default)
    #[default]
    Lz4,
    /// ZSTD - Better ratio, slower
    Zstd,
}

impl Compression {
    /// Get algorithm name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Compress data using this algorithm
    ///
    /// # Errors
    /// Returns `Error::Persistence` if ZSTD fails internally
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::Persistence(format!("ZSTD compression failed: {e}"))),
        }
    }

    /// Decompress data using this algorithm
    ///
    /// # Errors
    /// Returns `Error::Persistence` if the blob is corrupted
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::Persistence(format!("LZ4 decompression failed: {e}"))),
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::Persistence(format!("ZSTD decompression failed: {e}"))),
        }
    }
}

/// Compressed blob store wrapper
///
/// References returned by `put` address the compressed bytes in the inner
/// store.
///
/// # Example
///
/// ```rust
/// use trueno_train::experiment::{BlobStore, CompressedBlobStore, Compression, MemoryBlobStore};
///
/// let store = CompressedBlobStore::new(MemoryBlobStore::new(), Compression::Lz4);
/// let reference = store.put(&[0u8; 4096])?;
/// assert_eq!(store.get(&reference)?, Some(vec![0u8; 4096]));
/// # Ok::<(), trueno_train::Error>(())
/// ```
#[derive(Debug)]
pub struct CompressedBlobStore<B: BlobStore> {
    inner: B,
    compression: Compression,
}

impl<B: BlobStore> CompressedBlobStore<B> {
    /// Create a new compressed store wrapping the given store
    #[must_use]
    pub const fn new(inner: B, compression: Compression) -> Self {
        Self { inner, compression }
    }

    /// Get reference to inner store (for inspection/testing)
    #[must_use]
    pub const fn inner(&self) -> &B {
        &self.inner
    }

    /// Get compression algorithm
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }
}

impl<B: BlobStore> BlobStore for CompressedBlobStore<B> {
    fn put(&self, bytes: &[u8]) -> Result<BlobRef> {
        let compressed = self.compression.compress(bytes)?;
        self.inner.put(&compressed)
    }

    fn get(&self, reference: &BlobRef) -> Result<Option<Vec<u8>>> {
        self.inner
            .get(reference)?
            .map(|compressed| self.compression.decompress(&compressed))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::MemoryBlobStore;

    #[test]
    fn test_compression_default() {
        assert_eq!(Compression::default(), Compression::Lz4);
        assert_eq!(Compression::Zstd.as_str(), "zstd");
    }

    #[test]
    fn test_empty_blob_stays_empty() {
        for algo in [Compression::Lz4, Compression::Zstd] {
            let compressed = algo.compress(&[]).unwrap();
            assert!(compressed.is_empty());
            assert!(algo.decompress(&compressed).unwrap().is_empty());
        }
    }

    #[test]
    fn test_store_shrinks_repeated_snapshot() {
        for algo in [Compression::Lz4, Compression::Zstd] {
            let store = CompressedBlobStore::new(MemoryBlobStore::new(), algo);
            let snapshot = vec![0u8; 10_000];
            let reference = store.put(&snapshot).unwrap();

            let raw = store.inner().get(&reference).unwrap().unwrap();
            assert!(raw.len() < snapshot.len() / 10, "{} ratio", algo.as_str());
            assert_eq!(store.get(&reference).unwrap(), Some(snapshot));
        }
    }

    #[test]
    fn test_corrupted_blob_is_persistence_error() {
        let err = Compression::Lz4.decompress(&[5, 0, 0, 0, 0xff]).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }
}
