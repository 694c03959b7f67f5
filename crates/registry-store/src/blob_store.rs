use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{instrument, warn};

use crate::block_store::BlockStore;
use crate::digests::{BlockFp, BlobDigest};
use crate::error::{Error, Result};

/// Default fixed block size (spec §1, §3): chunking is fixed-size, not
/// content-defined.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// An ordered sequence of block fingerprints whose concatenated bytes
/// reproduce a blob exactly (spec §3 Recipe). The single-field shape makes
/// the on-disk JSON trivially "canonical" — there's only one key to sort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipe {
    pub chunks: Vec<BlockFp>,
}

/// A blob opened for reading: its reconstructed size and a stream of its
/// bytes in order. Produced lazily — the `recipe.json` case never
/// materializes the whole blob in memory (spec §4.2, §9).
pub struct OpenedBlob {
    pub size: u64,
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

/// Maps SHA-256 blob digests to recipes over a [BlockStore]; verifies
/// digests on write and serves reconstructed streams on read (spec §4.2).
#[derive(Clone)]
pub struct BlobStore {
    layers_dir: PathBuf,
    block_store: BlockStore,
    block_size: usize,
}

impl BlobStore {
    pub async fn open(
        layers_dir: impl Into<PathBuf>,
        block_store: BlockStore,
        block_size: usize,
    ) -> Result<Self> {
        let layers_dir = layers_dir.into();
        fs::create_dir_all(&layers_dir).await?;
        Ok(Self {
            layers_dir,
            block_store,
            block_size,
        })
    }

    fn layer_dir(&self, digest: &BlobDigest) -> PathBuf {
        self.layers_dir.join(digest.as_hex())
    }

    /// Verifies `source`'s content against `expected_digest`, chunks it into
    /// fixed-size blocks, installs each unique block, and writes the recipe
    /// and full-content sidecar. Idempotent (spec §4.2, §8.3).
    #[instrument(skip(self), fields(blob.expected = %expected_digest))]
    pub async fn store(&self, source: &Path, expected_digest: &BlobDigest) -> Result<BlobDigest> {
        let content = fs::read(source).await?;

        let actual = BlobDigest::of(&content);
        if actual != *expected_digest {
            warn!(blob.actual = %actual, "digest mismatch on blob store");
            return Err(Error::DigestMismatch {
                expected: expected_digest.to_string(),
                actual: actual.to_string(),
            });
        }

        let blob_dir = self.layer_dir(&actual);
        match fs::create_dir(&blob_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Another writer already installed this blob (or we did,
                // previously). Contents are identical by the blob_id
                // invariant, so this is a no-op success.
                return Ok(actual);
            }
            Err(e) => return Err(e.into()),
        }

        let mut chunks = Vec::with_capacity(content.len().div_ceil(self.block_size.max(1)));
        for window in content.chunks(self.block_size) {
            chunks.push(self.block_store.put(window).await?);
        }

        let recipe = Recipe { chunks };
        fs::write(blob_dir.join("recipe.json"), serde_json::to_vec(&recipe)?).await?;
        fs::write(blob_dir.join("data"), &content).await?;

        for fp in &recipe.chunks {
            if !self.block_store.has(fp).await {
                return Err(Error::BlobCorrupt {
                    blob_id: actual.as_hex(),
                    fp: fp.clone(),
                });
            }
        }

        Ok(actual)
    }

    /// Side-path for image config blobs: verified, stored whole, never
    /// chunked (spec §4.2 `put_config`).
    #[instrument(skip(self, bytes), fields(blob.expected = %expected_digest, config.size = bytes.len()))]
    pub async fn put_config(&self, expected_digest: &BlobDigest, bytes: &[u8]) -> Result<BlobDigest> {
        let actual = BlobDigest::of(bytes);
        if actual != *expected_digest {
            return Err(Error::DigestMismatch {
                expected: expected_digest.to_string(),
                actual: actual.to_string(),
            });
        }

        let blob_dir = self.layer_dir(&actual);
        fs::create_dir_all(&blob_dir).await?;
        fs::write(blob_dir.join("config"), bytes).await?;
        Ok(actual)
    }

    pub async fn exists(&self, digest: &BlobDigest) -> bool {
        let blob_dir = self.layer_dir(digest);
        for candidate in ["config", "data", "recipe.json"] {
            if fs::try_exists(blob_dir.join(candidate)).await.unwrap_or(false) {
                return true;
            }
        }
        // Spec §4.2 also treats a same-named entry directly under blocks/ as
        // existence. A blob digest's hex form is 64 chars and a block
        // fingerprint's is 40, so this can never actually match in
        // practice; `from_hex` rejects the length and the check short-
        // circuits to false, which is kept here for literal conformance.
        match BlockFp::from_hex(&digest.as_hex()) {
            Ok(fp) => self.block_store.has(&fp).await,
            Err(_) => false,
        }
    }

    /// Opens a blob for reading, following the config/data/recipe priority
    /// order from spec §4.2.
    #[instrument(skip(self), fields(blob.digest = %digest))]
    pub async fn open(&self, digest: &BlobDigest) -> Result<OpenedBlob> {
        let blob_dir = self.layer_dir(digest);

        if let Ok(file) = fs::File::open(blob_dir.join("config")).await {
            let size = file.metadata().await?.len();
            return Ok(OpenedBlob {
                size,
                stream: ReaderStream::new(file).boxed(),
            });
        }

        if let Ok(file) = fs::File::open(blob_dir.join("data")).await {
            let size = file.metadata().await?.len();
            return Ok(OpenedBlob {
                size,
                stream: ReaderStream::new(file).boxed(),
            });
        }

        match fs::read(blob_dir.join("recipe.json")).await {
            Ok(bytes) => self.open_from_recipe(digest, &bytes).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::BlobUnknown(digest.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn open_from_recipe(&self, digest: &BlobDigest, recipe_bytes: &[u8]) -> Result<OpenedBlob> {
        let recipe: Recipe = serde_json::from_slice(recipe_bytes)?;

        let mut size = 0u64;
        for fp in &recipe.chunks {
            size += self.block_store.block_len(fp).await.map_err(|_| Error::BlobCorrupt {
                blob_id: digest.as_hex(),
                fp: fp.clone(),
            })?;
        }

        let block_store = self.block_store.clone();
        let blob_id = digest.as_hex();
        let stream = async_stream::try_stream! {
            for fp in recipe.chunks {
                let mut block = block_store.open_block(&fp).await.map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("block {fp} missing while reconstructing blob {blob_id}"),
                    )
                })?;
                let mut buf = Vec::new();
                block.read_to_end(&mut buf).await?;
                yield Bytes::from(buf);
            }
        };

        Ok(OpenedBlob {
            size,
            stream: Box::pin(stream),
        })
    }
}
