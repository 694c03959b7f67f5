use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use registry_store::Error as StoreError;

/// The one place typed storage errors become the documented HTTP envelope
/// (spec §7). Nothing in `registry-store` knows about status codes.
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

#[derive(Serialize)]
struct ErrorEntry {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            errors: vec![ErrorEntry {
                code: self.code,
                message: self.message,
            }],
        };
        (self.status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let (status, code) = match &err {
            StoreError::MalformedDigest(_) => (StatusCode::BAD_REQUEST, "DIGEST_INVALID"),
            StoreError::DigestMismatch { .. } => (StatusCode::BAD_REQUEST, "DIGEST_INVALID"),
            StoreError::UnknownUploadSession(_) => {
                (StatusCode::NOT_FOUND, "BLOB_UPLOAD_UNKNOWN")
            }
            StoreError::EmptyAppend => (StatusCode::BAD_REQUEST, "BLOB_UPLOAD_INVALID"),
            StoreError::BlobUnknown(_) => (StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
            StoreError::BlobCorrupt { .. } => (StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
            StoreError::BlockMissing(_) => (StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
            StoreError::ManifestUnknown { .. } => (StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN"),
            StoreError::ManifestStructureInvalid(_) => {
                (StatusCode::BAD_REQUEST, "MANIFEST_INVALID")
            }
            StoreError::UnsupportedManifestContentType(_) => {
                (StatusCode::BAD_REQUEST, "MANIFEST_INVALID")
            }
            StoreError::ReferencedBlobMissing(_) => (StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
            StoreError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message: message.into(),
        }
    }
}
