//! Compressed blob store
//!
//! [`CompressedBlobStore`] keeps model snapshots and raw payloads compressed
//! in any [`BlobStore`]. Every stored blob starts with a one-byte codec tag:
//!
//! ```text
//! 0x00 | bytes                  stored as is (empty or incompressible)
//! 0x01 | lz4, size-prepended
//! 0x02 | zstd frame
//! ```
//!
//! Reads decode by the tag, not by the configured codec, so blobs written
//! before a codec change stay readable.

use super::BlobStore;
use crate::{Error, Result};

const RAW_TAG: u8 = 0x00;
const LZ4_TAG: u8 = 0x01;
const ZSTD_TAG: u8 = 0x02;

/// Zstd level used by [`Compression::zstd`].
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Codec for newly written blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// LZ4 (default)
    #[default]
    Lz4,
    /// Zstd at the given level
    Zstd(i32),
}

impl Compression {
    /// Zstd at [`DEFAULT_ZSTD_LEVEL`].
    #[must_use]
    pub const fn zstd() -> Self {
        Self::Zstd(DEFAULT_ZSTD_LEVEL)
    }

    /// Codec name, as logged.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd(_) => "zstd",
        }
    }

    const fn tag(self) -> u8 {
        match self {
            Self::Lz4 => LZ4_TAG,
            Self::Zstd(_) => ZSTD_TAG,
        }
    }

    fn compress(self, bytes: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(bytes)),
            Self::Zstd(level) => zstd::encode_all(bytes, level)
                .map_err(|e| Error::StorageError(format!("zstd compression failed: {e}"))),
        }
    }
}

/// Tagged blob for `bytes`; falls back to raw when compression does not shrink it.
fn encode(compression: Compression, bytes: &[u8]) -> Result<Vec<u8>> {
    let compressed = if bytes.is_empty() {
        None
    } else {
        Some(compression.compress(bytes)?).filter(|body| body.len() < bytes.len())
    };
    let (tag, body) = match &compressed {
        Some(body) => (compression.tag(), body.as_slice()),
        None => (RAW_TAG, bytes),
    };
    let mut blob = Vec::with_capacity(body.len() + 1);
    blob.push(tag);
    blob.extend_from_slice(body);
    Ok(blob)
}

fn decode(key: &str, blob: &[u8]) -> Result<Vec<u8>> {
    let Some((&tag, body)) = blob.split_first() else {
        return Err(Error::StorageError(format!("blob '{key}' has no codec tag")));
    };
    match tag {
        RAW_TAG => Ok(body.to_vec()),
        LZ4_TAG => lz4_flex::decompress_size_prepended(body)
            .map_err(|e| Error::StorageError(format!("blob '{key}': lz4 decompression failed: {e}"))),
        ZSTD_TAG => zstd::decode_all(body)
            .map_err(|e| Error::StorageError(format!("blob '{key}': zstd decompression failed: {e}"))),
        other => Err(Error::StorageError(format!(
            "blob '{key}' has unknown codec tag {other:#04x}"
        ))),
    }
}

/// Blob store wrapper that compresses on put and decompresses on get.
///
/// ```rust
/// use mlvault::storage::{BlobStore, CompressedBlobStore, Compression, MemoryBlobStore};
///
/// let store = CompressedBlobStore::new(MemoryBlobStore::new(), Compression::zstd());
/// store.put("weights", vec![0u8; 10_000])?;
/// assert_eq!(store.get("weights")?.map(|b| b.len()), Some(10_000));
/// assert!(store.stored_len("weights")? < Some(10_000));
/// # Ok::<(), mlvault::Error>(())
/// ```
#[derive(Debug)]
pub struct CompressedBlobStore<S: BlobStore> {
    inner: S,
    compression: Compression,
}

impl<S: BlobStore> CompressedBlobStore<S> {
    /// Wrap `inner`, writing new blobs with `compression`.
    #[must_use]
    pub const fn new(inner: S, compression: Compression) -> Self {
        Self { inner, compression }
    }

    /// The wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap the inner store.
    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Codec used for new blobs.
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }

    /// Size of the blob as stored, tag included.
    ///
    /// # Errors
    ///
    /// Returns an error if the inner store fails.
    pub fn stored_len(&self, key: &str) -> Result<Option<usize>> {
        Ok(self.inner.get(key)?.map(|blob| blob.len()))
    }
}

impl<S: BlobStore> BlobStore for CompressedBlobStore<S> {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let blob = encode(self.compression, &bytes)?;
        self.inner.put(key, blob)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)?.map(|blob| decode(key, &blob)).transpose()
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;

    fn weights() -> Vec<u8> {
        (0..4096u32).map(|i| (i % 7) as u8).collect()
    }

    #[test]
    fn test_both_codecs_shrink_repetitive_payloads() {
        for compression in [Compression::Lz4, Compression::zstd(), Compression::Zstd(19)] {
            let store = CompressedBlobStore::new(MemoryBlobStore::new(), compression);
            store.put("k", weights()).unwrap();
            assert_eq!(store.get("k").unwrap(), Some(weights()), "{}", compression.name());
            let stored = store.inner().get("k").unwrap().unwrap();
            assert_eq!(stored[0], compression.tag());
            assert!(stored.len() < 4096);
        }
    }

    #[test]
    fn test_codec_change_keeps_old_blobs_readable() {
        let old = CompressedBlobStore::new(MemoryBlobStore::new(), Compression::Lz4);
        old.put("v1", weights()).unwrap();
        let store = CompressedBlobStore::new(old.into_inner(), Compression::zstd());
        store.put("v2", weights()).unwrap();
        assert_eq!(store.get("v1").unwrap(), Some(weights()));
        assert_eq!(store.get("v2").unwrap(), Some(weights()));
    }

    #[test]
    fn test_small_and_empty_payloads_stay_raw() {
        let store = CompressedBlobStore::new(MemoryBlobStore::new(), Compression::default());
        store.put("tiny", b"abc".to_vec()).unwrap();
        store.put("empty", Vec::new()).unwrap();
        assert_eq!(store.inner().get("tiny").unwrap(), Some(vec![RAW_TAG, b'a', b'b', b'c']));
        assert_eq!(store.get("tiny").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(store.get("empty").unwrap(), Some(Vec::new()));
        assert_eq!(store.stored_len("empty").unwrap(), Some(1));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_malformed_blobs_are_storage_errors() {
        let store = CompressedBlobStore::new(MemoryBlobStore::new(), Compression::Lz4);
        store.inner().put("untagged", Vec::new()).unwrap();
        store.inner().put("unknown", vec![0x7f, 1, 2]).unwrap();
        store.inner().put("corrupt", vec![LZ4_TAG, 0xff, 0xff, 0xff, 0xff, 1]).unwrap();
        for key in ["untagged", "unknown", "corrupt"] {
            let err = store.get(key).unwrap_err();
            assert!(matches!(err, Error::StorageError(ref m) if m.contains(key)), "{err}");
        }
    }
}
