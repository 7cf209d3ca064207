//! Peer-to-peer HTTP service
//!
//! The endpoints every node serves to its peers: shard upload/download with
//! content-address verification, audit challenges, and liveness.

use crate::node::Node;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use peervault_core::crypto::sha256_hex;
use peervault_core::error::PeerVaultError;
use peervault_core::manifest::AuditChallenge;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Largest accepted shard upload (64 MB)
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct UploadResponse {
    shard_hash: String,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    file_hash: String,
    shard_index: usize,
}

/// Build the peer service router
pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/shard/upload", post(upload_shard))
        .route("/shard/download", get(download_shard))
        .route("/audit/challenge", post(audit_challenge))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(node)
}

/// Serve the peer endpoints on an already-bound listener
pub async fn serve(node: Arc<Node>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    axum::serve(listener, router(node)).await
}

async fn health() -> &'static str {
    "OK"
}

async fn upload_shard(
    State(node): State<Arc<Node>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let mut file_hash: Option<String> = None;
    let mut shard_index: Option<usize> = None;
    let mut shard_hash: Option<String> = None;
    let mut shard_data: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file_hash" => {
                file_hash = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
                );
            }
            "shard_index" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
                shard_index = Some(text.parse().map_err(|_| {
                    (StatusCode::BAD_REQUEST, "invalid shard_index".to_string())
                })?);
            }
            "shard_hash" => {
                shard_hash = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
                );
            }
            "shard_data" => {
                shard_data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let (file_hash, shard_index, shard_hash, shard_data) =
        match (file_hash, shard_index, shard_hash, shard_data) {
            (Some(fh), Some(si), Some(sh), Some(sd)) => (fh, si, sh, sd),
            _ => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    "missing multipart field".to_string(),
                ))
            }
        };

    // The declared hash is the content address; refuse bytes that don't match
    let computed = sha256_hex(&shard_data);
    if computed != shard_hash {
        warn!(
            file_hash = %file_hash,
            shard_index,
            "Upload rejected: shard hash mismatch"
        );
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "shard hash mismatch".to_string(),
        ));
    }

    let stored_hash = node
        .store()
        .put(&file_hash, shard_index, &shard_data, None, None)
        .map_err(|e| match e {
            PeerVaultError::QuotaExceeded { .. } => {
                (StatusCode::INSUFFICIENT_STORAGE, e.to_string())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    debug!(file_hash = %file_hash, shard_index, "Shard accepted");
    Ok(Json(UploadResponse {
        shard_hash: stored_hash,
    }))
}

async fn download_shard(
    State(node): State<Arc<Node>>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match node.store().get(&query.file_hash, query.shard_index) {
        Ok(bytes) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )),
        Err(e @ PeerVaultError::ShardNotFound { .. }) => {
            Err((StatusCode::NOT_FOUND, e.to_string()))
        }
        // A corrupt shard is never served
        Err(e @ PeerVaultError::CorruptShard { .. }) => {
            Err((StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn audit_challenge(
    State(node): State<Arc<Node>>,
    Json(challenge): Json<AuditChallenge>,
) -> Result<Json<peervault_core::manifest::ProofResponse>, (StatusCode, String)> {
    let records = node
        .store()
        .list(Some(&challenge.file_hash))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let Some(record) = records.first() else {
        return Err((
            StatusCode::NOT_FOUND,
            format!("no shard of {} held here", challenge.file_hash),
        ));
    };

    let shard_bytes = node
        .store()
        .get(&challenge.file_hash, record.shard_index)
        .map_err(|e| match e {
            PeerVaultError::CorruptShard { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    let proof = node
        .audit()
        .prove(&challenge, &shard_bytes, node.signing_key());

    debug!(
        file_hash = %challenge.file_hash,
        shard_index = record.shard_index,
        "Answered audit challenge"
    );
    Ok(Json(proof))
}
