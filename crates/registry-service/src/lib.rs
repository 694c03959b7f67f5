//! The Registry V2 HTTP surface: routing, request/response header
//! assembly, and error-envelope translation over `registry-store`.

pub mod blobs;
pub mod error;
pub mod manifests;

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use bytes::Bytes;
use registry_store::Registry;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

/// Shared state threaded into every handler. `Registry` is cheaply `Clone`
/// (its components are thin handles over shared directories/indices), so no
/// extra `Arc` wrapping is needed here.
pub type AppState = Registry;

/// Builds the full `/v2/` router over an already-opened [Registry].
///
/// Registry V2 repository names are hierarchical (`library/nginx`), which a
/// fixed-segment route like `/v2/:name/blobs/...` can't capture — `:name`
/// only ever matches a single path segment. Every request under `/v2/`
/// other than the bare liveness check instead lands on one wildcard route,
/// and [dispatch] recovers the repository name plus the verb-specific
/// suffix by splitting the tail on the fixed suffixes spec §6 defines.
pub fn gen_router(registry: Registry) -> Router {
    Router::new()
        .route("/v2/", get(base))
        .route("/v2/*rest", any(dispatch))
        .fallback(four_o_four)
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// GET `/v2/` — liveness and API version advertisement.
async fn base() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Docker-Distribution-API-Version", "registry/2.0")],
        "",
    )
}

/// The verb-independent shape of a `/v2/<name>/...` request.
enum Route {
    InitiateUpload { name: String },
    Upload { name: String, id: String },
    Blob { digest: String },
    Manifest { name: String, reference: String },
}

/// Splits a wildcard-captured path tail (everything after `/v2/`) into a
/// repository name plus the matching [Route] variant, by recognizing the
/// fixed suffixes `blobs/uploads/`, `blobs/uploads/<id>`, `blobs/<digest>`,
/// and `manifests/<reference>` from the end. Repository names are
/// themselves slash-separated, so this only works by anchoring on those
/// literal suffix segments rather than a fixed segment count.
fn parse_route(rest: &str) -> Option<Route> {
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    let len = segments.len();

    let name_of = |upto: usize| -> Option<String> {
        (upto > 0).then(|| segments[..upto].join("/"))
    };

    if len >= 2 && segments[len - 2] == "blobs" && segments[len - 1] == "uploads" {
        return name_of(len - 2).map(|name| Route::InitiateUpload { name });
    }
    if len >= 3 && segments[len - 3] == "blobs" && segments[len - 2] == "uploads" {
        return name_of(len - 3).map(|name| Route::Upload {
            name,
            id: segments[len - 1].to_string(),
        });
    }
    if len >= 2 && segments[len - 2] == "blobs" {
        return name_of(len - 2).map(|_| Route::Blob {
            digest: segments[len - 1].to_string(),
        });
    }
    if len >= 2 && segments[len - 2] == "manifests" {
        return name_of(len - 2).map(|name| Route::Manifest {
            name,
            reference: segments[len - 1].to_string(),
        });
    }
    None
}

/// Single entry point for every `/v2/<name>/...` request; recovers the
/// route shape via [parse_route] and forwards to the matching handler in
/// [blobs] or [manifests].
async fn dispatch(
    State(registry): State<AppState>,
    Path(rest): Path<String>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let route = parse_route(&rest).ok_or_else(not_found)?;

    match route {
        Route::InitiateUpload { name } if method == Method::POST => {
            blobs::initiate_upload(&registry, &name).await
        }
        Route::Upload { name, id } if method == Method::PATCH => {
            blobs::append_upload(&registry, &name, &id, body).await
        }
        Route::Upload { name, id } if method == Method::PUT => {
            blobs::finalize_upload(&registry, &name, &id, &params, body).await
        }
        Route::Upload { id, .. } if method == Method::DELETE => {
            blobs::abort_upload(&registry, &id)
                .await
                .map(IntoResponse::into_response)
        }
        Route::Blob { digest } if method == Method::GET => {
            blobs::get_blob(&registry, &digest).await
        }
        Route::Blob { digest } if method == Method::HEAD => {
            blobs::head_blob(&registry, &digest).await
        }
        Route::Manifest { name, reference } if method == Method::GET => {
            manifests::get_manifest(&registry, &name, &reference).await
        }
        Route::Manifest { name, reference } if method == Method::PUT => {
            manifests::put_manifest(&registry, &name, &reference, &headers, body).await
        }
        _ => Err(not_found()),
    }
}

fn not_found() -> ApiError {
    ApiError::not_found("NOT_FOUND", "no such route")
}

async fn four_o_four() -> Response {
    not_found().into_response()
}
