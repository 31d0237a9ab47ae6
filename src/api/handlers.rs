//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::DetailedMetrics;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteResponse, GetResponse, HealthResponse, HotShardsResponse, SetRequest,
    SetResponse, SizeResponse, SnapshotResponse,
};
use crate::service::ResilientCache;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: ResilientCache,
}

impl AppState {
    pub fn new(cache: ResilientCache) -> Self {
        Self { cache }
    }

    /// Opens the cache described by `config` (snapshot restore and WAL replay included).
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(ResilientCache::open(config.clone())?))
    }
}

/// Handler for PUT /set
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    state
        .cache
        .set(&req.key, req.value.into_bytes(), req.ttl)?;
    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get(&key)? {
        Some(value) => Ok(Json(GetResponse::new(key, &value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if state.cache.delete(&key)? {
        Ok(Json(DeleteResponse::new(key)))
    } else {
        Err(CacheError::NotFound(key))
    }
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    Json(ClearResponse {
        removed: state.cache.clear(),
    })
}

/// Handler for GET /size
pub async fn size_handler(State(state): State<AppState>) -> Json<SizeResponse> {
    Json(SizeResponse {
        size: state.cache.size(),
    })
}

/// Handler for POST /snapshot
///
/// Snapshot writing touches the disk, so it runs on the blocking pool.
pub async fn snapshot_handler(State(state): State<AppState>) -> Result<Json<SnapshotResponse>> {
    let cache = state.cache.clone();
    let info = tokio::task::spawn_blocking(move || cache.create_backup_snapshot())
        .await
        .map_err(|e| CacheError::Internal(e.to_string()))??;
    Ok(Json(info.into()))
}

/// Handler for GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Json<DetailedMetrics> {
    Json(state.cache.get_detailed_metrics())
}

/// Handler for GET /hot-shards
pub async fn hot_shards_handler(State(state): State<AppState>) -> Json<HotShardsResponse> {
    Json(HotShardsResponse {
        hot_shards: state.cache.get_hot_shards(),
    })
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(state.cache.is_degraded()))
}
