//! Content-addressed, block-level deduplicating object store for container
//! images: blocks, blobs, manifests, and the upload session state machine
//! that feeds them. No networking lives here — see `registry-service` for
//! the HTTP surface.

pub mod blob_store;
pub mod block_index;
pub mod block_store;
pub mod digests;
pub mod error;
pub mod manifest_store;
pub mod scrubber;
pub mod upload_sessions;

pub use blob_store::{BlobStore, OpenedBlob, Recipe, DEFAULT_BLOCK_SIZE};
pub use block_store::BlockStore;
pub use digests::{BlobDigest, BlockFp};
pub use error::{Error, Result};
pub use manifest_store::{ManifestStore, DOCKER_MANIFEST_V2_JSON, OCI_IMAGE_MANIFEST_V1_JSON};
pub use scrubber::{Defect, Scrubber};
pub use upload_sessions::UploadSessions;

use std::path::{Path, PathBuf};

/// The fully wired storage engine for one repository root, built once at
/// startup and threaded into each request handler as shared state — no
/// ambient globals (spec §9 design notes).
#[derive(Clone)]
pub struct Registry {
    pub blocks: BlockStore,
    pub blobs: BlobStore,
    pub manifests: ManifestStore,
    pub uploads: UploadSessions,
    pub scrubber: Scrubber,
}

impl Registry {
    /// Opens every component rooted at `repo_root`, creating the directory
    /// layout from spec §6 if it doesn't already exist.
    pub async fn open(repo_root: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let repo_root = repo_root.as_ref();
        let blocks = BlockStore::open(repo_root.join("blocks")).await?;
        let layers_dir: PathBuf = repo_root.join("layers");
        let blobs = BlobStore::open(&layers_dir, blocks.clone(), block_size).await?;
        let manifests = ManifestStore::open(repo_root.join("manifests"), blobs.clone()).await?;
        let uploads = UploadSessions::open(repo_root.join("uploads"), blobs.clone()).await?;
        let scrubber = Scrubber::new(layers_dir, blocks.clone());

        Ok(Self {
            blocks,
            blobs,
            manifests,
            uploads,
            scrubber,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_open_creates_full_layout() {
        let dir = tempfile::tempdir().unwrap();
        let _registry = Registry::open(dir.path(), DEFAULT_BLOCK_SIZE).await.unwrap();

        assert!(dir.path().join("blocks").is_dir());
        assert!(dir.path().join("layers").is_dir());
        assert!(dir.path().join("manifests").is_dir());
        assert!(dir.path().join("uploads").is_dir());
    }
}
