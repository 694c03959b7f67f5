use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::instrument;

use crate::block_index::BlockIndex;
use crate::digests::BlockFp;
use crate::error::Result;

/// Deduplicated, content-addressed storage of fixed-size byte blocks on a
/// local filesystem (spec §4.1). Blocks are immutable once written and
/// shared by every recipe that references them.
#[derive(Clone)]
pub struct BlockStore {
    blocks_dir: PathBuf,
    index: Arc<BlockIndex>,
}

impl BlockStore {
    /// Opens (creating if necessary) a block store rooted at `blocks_dir`,
    /// populating the in-memory [BlockIndex] from whatever is already on
    /// disk.
    pub async fn open(blocks_dir: impl Into<PathBuf>) -> Result<Self> {
        let blocks_dir = blocks_dir.into();
        fs::create_dir_all(&blocks_dir).await?;

        let index = Arc::new(BlockIndex::new());
        let dir = blocks_dir.clone();
        let idx = index.clone();
        // Directory enumeration is blocking I/O; keep it off the async
        // executor.
        tokio::task::spawn_blocking(move || idx.populate_from_disk(&dir)).await??;

        Ok(Self { blocks_dir, index })
    }

    fn path_for(&self, fp: &BlockFp) -> PathBuf {
        self.blocks_dir.join(fp.as_hex())
    }

    /// Stores `bytes` as a block, returning its fingerprint. Idempotent:
    /// concurrent puts of identical bytes leave exactly one file (spec
    /// §4.1, §5).
    #[instrument(skip(self, bytes), fields(block.size = bytes.len()))]
    pub async fn put(&self, bytes: &[u8]) -> Result<BlockFp> {
        let fp = BlockFp::of(bytes);

        if self.has(&fp).await {
            return Ok(fp);
        }

        let final_path = self.path_for(&fp);
        let tmp_path = final_path.with_extension("tmp");
        fs::write(&tmp_path, bytes).await?;
        // Atomic on POSIX filesystems: a racing writer of the same fp writes
        // identical bytes, so whichever rename lands last is indistinguishable.
        fs::rename(&tmp_path, &final_path).await?;

        self.index.note(fp.clone());
        Ok(fp)
    }

    /// Fast existence check: index lookup, falling back to the filesystem
    /// (the authoritative source) on a miss.
    pub async fn has(&self, fp: &BlockFp) -> bool {
        if self.index.has(fp) {
            return true;
        }
        fs::try_exists(self.path_for(fp)).await.unwrap_or(false)
    }

    /// Opens a block for reading. Fails with [crate::Error::BlockMissing] if
    /// absent.
    pub async fn open_block(&self, fp: &BlockFp) -> Result<fs::File> {
        fs::File::open(self.path_for(fp))
            .await
            .map_err(|_| crate::Error::BlockMissing(fp.clone()))
    }

    /// Size, in bytes, of a stored block.
    pub async fn block_len(&self, fp: &BlockFp) -> Result<u64> {
        let meta = fs::metadata(self.path_for(fp))
            .await
            .map_err(|_| crate::Error::BlockMissing(fp.clone()))?;
        Ok(meta.len())
    }

    /// Lazy, restartable, finite enumeration of every block known to this
    /// store, read straight off the filesystem (spec §4.1 `iter_known`).
    pub fn iter_known(&self) -> impl Iterator<Item = BlockFp> {
        walkdir::WalkDir::new(&self.blocks_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(".tmp") {
                    None
                } else {
                    BlockFp::from_hex(&name).ok()
                }
            })
    }
}
