use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum_typed_multipart::TypedMultipart;
use log::info;

use super::error::Result;
use super::state::AppState;
use super::types::*;
use crate::IndexStatus;
use crate::dispatch::QueryImage;
use crate::error::Error;
use crate::metrics;

/// 搜索一张图片
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let count = data.count.unwrap_or(state.search.count);
    if !(1..=1000).contains(&count) {
        return Err(Error::InvalidRequest(format!("结果数量 {count} 超出范围 1..=1000")).into());
    }

    info!("正在搜索上传图片");
    let start = Instant::now();
    let result = state.dispatcher.query(QueryImage::Bytes(data.file.to_vec()), count).await?;

    Ok(Json(SearchResponse {
        time: start.elapsed().as_millis() as u64,
        result: result.into_iter().map(Into::into).collect(),
    }))
}

/// 获取索引状态
#[utoipa::path(get, path = "/status")]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<IndexStatus> {
    Json(state.dispatcher.searcher().status())
}

/// Prometheus 指标
#[utoipa::path(get, path = "/metrics")]
pub async fn metrics_handler() -> String {
    metrics::gather_text()
}
