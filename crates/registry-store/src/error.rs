use crate::digests::BlockFp;
use thiserror::Error;

/// Typed failures from the storage engine. The HTTP layer owns the one-place
/// translation of these into the documented status-code/error-code envelope
/// (spec §7); nothing in this crate knows about HTTP.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed digest: {0}")]
    MalformedDigest(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("unknown upload session {0}")]
    UnknownUploadSession(String),

    #[error("PATCH with empty body is not allowed")]
    EmptyAppend,

    #[error("blob {0} unknown")]
    BlobUnknown(String),

    #[error("blob {blob_id} is corrupt: block {fp} missing")]
    BlobCorrupt { blob_id: String, fp: BlockFp },

    #[error("block {0} missing")]
    BlockMissing(BlockFp),

    #[error("manifest {repo}:{reference} unknown")]
    ManifestUnknown { repo: String, reference: String },

    #[error("manifest structure invalid: {0}")]
    ManifestStructureInvalid(String),

    #[error("unsupported manifest content type: {0}")]
    UnsupportedManifestContentType(String),

    #[error("referenced blob missing: {0}")]
    ReferencedBlobMissing(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ManifestStructureInvalid(e.to_string())
    }
}

impl From<crate::digests::Error> for Error {
    fn from(e: crate::digests::Error) -> Self {
        Error::MalformedDigest(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
