use std::path::PathBuf;

use tokio::fs;
use tracing::{info, instrument, warn};

use crate::block_store::BlockStore;
use crate::blob_store::Recipe;
use crate::digests::BlockFp;
use crate::error::Result;

/// A single integrity violation found by [Scrubber::verify].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Defect {
    BlockMissing { blob_id: String, fp: BlockFp },
}

/// On-demand, read-only integrity check: every block a recipe references
/// must actually be present (spec §4.6). Never mutates.
#[derive(Clone)]
pub struct Scrubber {
    layers_dir: PathBuf,
    block_store: BlockStore,
}

impl Scrubber {
    pub fn new(layers_dir: impl Into<PathBuf>, block_store: BlockStore) -> Self {
        Self {
            layers_dir: layers_dir.into(),
            block_store,
        }
    }

    #[instrument(skip(self))]
    pub async fn verify(&self) -> Result<(bool, Vec<Defect>)> {
        let layers_dir = self.layers_dir.clone();
        let recipe_paths = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&layers_dir)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    entry.file_type().is_file() && entry.file_name().to_str() == Some("recipe.json")
                })
                .map(|entry| entry.path().to_path_buf())
                .collect::<Vec<_>>()
        })
        .await?;

        let mut defects = Vec::new();
        for recipe_path in recipe_paths {
            let blob_id = recipe_path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let bytes = match fs::read(&recipe_path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(blob_id, error = %e, "failed to read recipe during scrub");
                    continue;
                }
            };
            let recipe: Recipe = match serde_json::from_slice(&bytes) {
                Ok(r) => r,
                Err(e) => {
                    warn!(blob_id, error = %e, "unparseable recipe during scrub");
                    continue;
                }
            };

            for fp in recipe.chunks {
                if !self.block_store.has(&fp).await {
                    defects.push(Defect::BlockMissing {
                        blob_id: blob_id.clone(),
                        fp,
                    });
                }
            }
        }

        let ok = defects.is_empty();
        if ok {
            info!("scrub found no defects");
        } else {
            warn!(defect_count = defects.len(), "scrub found defects");
        }
        Ok((ok, defects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (tempfile::TempDir, BlockStore, Scrubber) {
        let dir = tempfile::tempdir().unwrap();
        let block_store = BlockStore::open(dir.path().join("blocks")).await.unwrap();
        let scrubber = Scrubber::new(dir.path().join("layers"), block_store.clone());
        (dir, block_store, scrubber)
    }

    #[tokio::test]
    async fn verify_clean_store_reports_no_defects() {
        use crate::blob_store::BlobStore;

        let dir = tempfile::tempdir().unwrap();
        let block_store = BlockStore::open(dir.path().join("blocks")).await.unwrap();
        let blob_store = BlobStore::open(dir.path().join("layers"), block_store.clone(), 4096)
            .await
            .unwrap();
        let scrubber = Scrubber::new(dir.path().join("layers"), block_store);

        let content = vec![9u8; 9000];
        let digest = crate::digests::BlobDigest::of(&content);
        let src = dir.path().join("src");
        fs::write(&src, &content).await.unwrap();
        blob_store.store(&src, &digest).await.unwrap();

        let (ok, defects) = scrubber.verify().await.unwrap();
        assert!(ok);
        assert!(defects.is_empty());
    }

    #[tokio::test]
    async fn verify_detects_missing_block() {
        use crate::blob_store::BlobStore;

        let dir = tempfile::tempdir().unwrap();
        let block_store = BlockStore::open(dir.path().join("blocks")).await.unwrap();
        let blob_store = BlobStore::open(dir.path().join("layers"), block_store.clone(), 4096)
            .await
            .unwrap();
        let scrubber = Scrubber::new(dir.path().join("layers"), block_store);

        let content = vec![9u8; 9000];
        let digest = crate::digests::BlobDigest::of(&content);
        let src = dir.path().join("src");
        fs::write(&src, &content).await.unwrap();
        blob_store.store(&src, &digest).await.unwrap();

        for entry in std::fs::read_dir(dir.path().join("blocks")).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }

        let (ok, defects) = scrubber.verify().await.unwrap();
        assert!(!ok);
        assert!(!defects.is_empty());
        assert!(defects
            .iter()
            .all(|d| matches!(d, Defect::BlockMissing { .. })));
    }

    #[tokio::test]
    async fn verify_on_empty_store_is_clean() {
        let (_dir, _block_store, scrubber) = setup().await;
        let (ok, defects) = scrubber.verify().await.unwrap();
        assert!(ok);
        assert!(defects.is_empty());
    }
}
