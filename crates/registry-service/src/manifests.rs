use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::instrument;

use crate::error::ApiError;
use crate::AppState;

/// PUT `/v2/<name>/manifests/<ref>` — store a manifest by tag.
#[instrument(skip_all, fields(repo = %name, reference = %reference, body.len = body.len()))]
pub async fn put_manifest(
    registry: &AppState,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let content_type = headers
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::bad_request("MANIFEST_INVALID", "missing Content-Type header")
        })?;

    let digest = registry
        .manifests
        .put(name, reference, content_type, &body)
        .await?;

    Ok((
        StatusCode::CREATED,
        [
            ("Location", format!("/v2/{name}/manifests/{digest}")),
            ("Docker-Content-Digest", digest.to_string()),
        ],
    )
        .into_response())
}

/// GET `/v2/<name>/manifests/<ref>` — fetch a manifest by tag or digest.
#[instrument(skip_all, fields(repo = %name, reference = %reference))]
pub async fn get_manifest(
    registry: &AppState,
    name: &str,
    reference: &str,
) -> Result<Response, ApiError> {
    let (content_type, digest, bytes) = registry.manifests.get(name, reference).await?;

    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", content_type.parse().unwrap());
    headers.insert("Docker-Content-Digest", digest.to_string().parse().unwrap());

    Ok((StatusCode::OK, headers, Body::from(bytes)).into_response())
}
