use std::collections::HashMap;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::instrument;

use registry_store::BlobDigest;

use crate::error::ApiError;
use crate::AppState;

fn parse_digest(raw: &str) -> Result<BlobDigest, ApiError> {
    BlobDigest::parse(raw).map_err(|e| ApiError::bad_request("DIGEST_INVALID", e.to_string()))
}

fn upload_location(name: &str, id: &str) -> String {
    format!("/v2/{name}/blobs/uploads/{id}")
}

/// POST `/v2/<name>/blobs/uploads/` — initiate a resumable upload session.
#[instrument(skip_all, fields(repo = %name))]
pub async fn initiate_upload(registry: &AppState, name: &str) -> Result<Response, ApiError> {
    let id = registry.uploads.initiate().await?;
    let location = upload_location(name, &id);

    Ok((
        StatusCode::ACCEPTED,
        [
            ("Location", location),
            ("Docker-Upload-UUID", id),
            ("Range", "0-0".to_string()),
        ],
    )
        .into_response())
}

/// PATCH `/v2/<name>/blobs/uploads/<id>` — append bytes to a session.
#[instrument(skip_all, fields(repo = %name, session_id = %id, body.len = body.len()))]
pub async fn append_upload(
    registry: &AppState,
    name: &str,
    id: &str,
    body: Bytes,
) -> Result<Response, ApiError> {
    let new_len = registry.uploads.append(id, &body).await?;
    let location = upload_location(name, id);

    Ok((
        StatusCode::ACCEPTED,
        [
            ("Location", location),
            ("Docker-Upload-UUID", id.to_string()),
            ("Range", format!("0-{}", new_len.saturating_sub(1))),
        ],
    )
        .into_response())
}

/// PUT `/v2/<name>/blobs/uploads/<id>?digest=sha256:<hex>` — finalize.
#[instrument(skip_all, fields(repo = %name, session_id = %id, body.len = body.len()))]
pub async fn finalize_upload(
    registry: &AppState,
    name: &str,
    id: &str,
    params: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let raw_digest = params
        .get("digest")
        .ok_or_else(|| ApiError::bad_request("DIGEST_INVALID", "missing digest query parameter"))?;
    let digest = parse_digest(raw_digest)?;

    let inline = if body.is_empty() { None } else { Some(body.as_ref()) };
    let stored = registry.uploads.finalize(id, &digest, inline).await?;

    Ok((
        StatusCode::CREATED,
        [
            ("Location", format!("/v2/{name}/blobs/{stored}")),
            ("Docker-Content-Digest", stored.to_string()),
        ],
    )
        .into_response())
}

/// DELETE `/v2/<name>/blobs/uploads/<id>` — abort a session.
#[instrument(skip_all, fields(session_id = %id))]
pub async fn abort_upload(registry: &AppState, id: &str) -> Result<StatusCode, ApiError> {
    registry.uploads.abort(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// HEAD `/v2/<name>/blobs/<digest>` — existence and size.
#[instrument(skip_all, fields(digest = %digest_str))]
pub async fn head_blob(registry: &AppState, digest_str: &str) -> Result<Response, ApiError> {
    let digest = parse_digest(digest_str)?;
    let opened = registry.blobs.open(&digest).await?;

    let mut headers = HeaderMap::new();
    headers.insert("Content-Length", opened.size.into());
    headers.insert("Docker-Content-Digest", digest.to_string().parse().unwrap());
    Ok((StatusCode::OK, headers).into_response())
}

/// GET `/v2/<name>/blobs/<digest>` — fetch, streamed.
#[instrument(skip_all, fields(digest = %digest_str))]
pub async fn get_blob(registry: &AppState, digest_str: &str) -> Result<Response, ApiError> {
    let digest = parse_digest(digest_str)?;
    let opened = registry.blobs.open(&digest).await?;

    let mut headers = HeaderMap::new();
    headers.insert("Content-Length", opened.size.into());
    headers.insert("Docker-Content-Digest", digest.to_string().parse().unwrap());
    headers.insert("Content-Type", "application/octet-stream".parse().unwrap());

    let body = Body::from_stream(opened.stream);
    Ok((StatusCode::OK, headers, body).into_response())
}
