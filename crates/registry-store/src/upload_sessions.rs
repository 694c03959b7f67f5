use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::digests::BlobDigest;
use crate::error::{Error, Result};

/// Resumable upload state machine: `initiate` → repeated `append` →
/// `finalize` (or `abort`), handing verified content off to a [BlobStore]
/// (spec §4.3).
#[derive(Clone)]
pub struct UploadSessions {
    uploads_dir: PathBuf,
    blob_store: BlobStore,
}

impl UploadSessions {
    pub async fn open(uploads_dir: impl Into<PathBuf>, blob_store: BlobStore) -> Result<Self> {
        let uploads_dir = uploads_dir.into();
        fs::create_dir_all(&uploads_dir).await?;
        Ok(Self {
            uploads_dir,
            blob_store,
        })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.uploads_dir.join(session_id)
    }

    /// Session ids are server-issued UUIDs; a syntactically invalid id can
    /// never correspond to a session this server created.
    async fn validated_session_path(&self, session_id: &str) -> Result<PathBuf> {
        Uuid::parse_str(session_id)
            .map_err(|_| Error::UnknownUploadSession(session_id.to_string()))?;
        let path = self.path_for(session_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::UnknownUploadSession(session_id.to_string()));
        }
        Ok(path)
    }

    /// Creates a new, empty upload session and returns its id.
    #[instrument(skip(self))]
    pub async fn initiate(&self) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        fs::File::create(self.path_for(&session_id)).await?;
        Ok(session_id)
    }

    /// Appends `bytes` to the session, returning the new total length.
    /// Rejects an empty append outright (spec §4.3, §7).
    #[instrument(skip(self, bytes), fields(session_id, append.size = bytes.len()))]
    pub async fn append(&self, session_id: &str, bytes: &[u8]) -> Result<u64> {
        if bytes.is_empty() {
            warn!("rejecting empty PATCH");
            return Err(Error::EmptyAppend);
        }

        let path = self.validated_session_path(session_id).await?;
        let mut file = fs::OpenOptions::new().append(true).open(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(file.metadata().await?.len())
    }

    /// Deletes the session without storing anything.
    #[instrument(skip(self))]
    pub async fn abort(&self, session_id: &str) -> Result<()> {
        let path = self.validated_session_path(session_id).await?;
        fs::remove_file(&path).await?;
        Ok(())
    }

    /// Verifies the staged (or inline) bytes against `expected_digest` and
    /// hands them to the [BlobStore]. Implements the finalize protocol from
    /// spec §4.3 exactly, including its on-mismatch and on-failure recovery
    /// states.
    #[instrument(skip(self, inline_bytes), fields(session_id, blob.expected = %expected_digest))]
    pub async fn finalize(
        &self,
        session_id: &str,
        expected_digest: &BlobDigest,
        inline_bytes: Option<&[u8]>,
    ) -> Result<BlobDigest> {
        let session_path = self.validated_session_path(session_id).await?;
        let tmp_path = tmp_sibling(&session_path);
        let used_inline = inline_bytes.is_some();

        if let Some(bytes) = inline_bytes {
            fs::write(&tmp_path, bytes).await?;
        } else {
            fs::rename(&session_path, &tmp_path).await?;
        }

        match self.blob_store.store(&tmp_path, expected_digest).await {
            Ok(digest) => {
                let _ = fs::remove_file(&tmp_path).await;
                if used_inline {
                    let _ = fs::remove_file(&session_path).await;
                }
                Ok(digest)
            }
            Err(Error::DigestMismatch { expected, actual }) => {
                // Permit retry: the session must still be resumable
                // afterwards, whichever branch we took above.
                if used_inline {
                    let _ = fs::remove_file(&tmp_path).await;
                } else {
                    let _ = fs::rename(&tmp_path, &session_path).await;
                }
                Err(Error::DigestMismatch { expected, actual })
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                let _ = fs::remove_file(&session_path).await;
                Err(e)
            }
        }
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
