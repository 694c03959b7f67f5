use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::Path;

use crate::digests::BlockFp;

/// Process-local, write-mostly-once cache of block fingerprints known to be
/// present on disk. The filesystem is always the authoritative answer (spec
/// §3 BlockIndex, §9 design notes); this only saves a `stat` on the common
/// "have I already stored this block" path.
#[derive(Default)]
pub struct BlockIndex(RwLock<HashSet<BlockFp>>);

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates the index by enumerating `blocks_dir`. Called once at
    /// startup; safe to call again (e.g. after an external scrub repair).
    pub fn populate_from_disk(&self, blocks_dir: &Path) -> std::io::Result<()> {
        if !blocks_dir.exists() {
            return Ok(());
        }
        let mut known = self.0.write();
        for entry in walkdir::WalkDir::new(blocks_dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(".tmp") {
                continue;
            }
            if let Ok(fp) = BlockFp::from_hex(&name) {
                known.insert(fp);
            }
        }
        Ok(())
    }

    pub fn has(&self, fp: &BlockFp) -> bool {
        self.0.read().contains(fp)
    }

    pub fn note(&self, fp: BlockFp) {
        self.0.write().insert(fp);
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}
