use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum_auth::AuthBearer;
use axum_typed_multipart::TypedMultipart;
use log::{info, warn};
use tokio::task::block_in_place;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::metrics;
use crate::snapshot::Snapshot;

/// 搜索与上传图片最相似的专辑
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
        (status = 400, description = "图片无法解码或参数无效"),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let k = data.k.unwrap_or(state.search.k);
    let start = Instant::now();

    info!("正在搜索上传图片，k = {}", k);

    let result = block_in_place(|| state.query.query_scored(&data.file, k));
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            metrics::inc_search_error();
            warn!("搜索失败: {}", e);
            return Err(e.into());
        }
    };

    let elapsed = start.elapsed();
    metrics::observe_search(elapsed.as_secs_f32(), result.len());

    Ok(Json(SearchResponse { time: elapsed.as_millis(), result }))
}

/// 从磁盘重新加载索引和元数据，并替换当前快照
#[utoipa::path(
    post,
    path = "/reload",
    responses(
        (status = 200, body = ReloadResponse),
        (status = 401, description = "token 无效"),
    )
)]
pub async fn reload_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
) -> Result<Json<ReloadResponse>> {
    if token != state.token {
        let err = AppError::from(anyhow::anyhow!("token 无效"));
        return Err(err.with_status(StatusCode::UNAUTHORIZED));
    }
    // 加载新快照期间旧快照继续服务
    let snapshot = block_in_place(|| Snapshot::open(&state.paths, state.dimension))?;
    let response =
        ReloadResponse { records: snapshot.metadata.len(), vectors: snapshot.index.len() };
    state.query.snapshot().swap(snapshot);
    info!("快照已重新加载: {} 条记录，{} 个向量", response.records, response.vectors);
    Ok(Json(response))
}

/// Prometheus 指标
#[utoipa::path(get, path = "/metrics")]
pub async fn metrics_handler() -> String {
    metrics::gather_text()
}
