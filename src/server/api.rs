use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum_auth::AuthBearer;
use log::info;
use tokio::task::spawn_blocking;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::search::CancelFlag;

fn check_token(state: &AppState, token: &str) -> Result<()> {
    if token != state.token {
        return Err(AppError::new(StatusCode::UNAUTHORIZED, anyhow!("token 无效")));
    }
    Ok(())
}

/// 使用文本搜索图片
#[utoipa::path(
    post,
    path = "/search",
    request_body = SearchRequest,
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    Json(data): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    check_token(&state, &token)?;

    let query = data.query.trim().to_owned();
    if query.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, anyhow!("查询不能为空")));
    }
    let count = data.count.unwrap_or(state.display_num);
    if count == 0 {
        return Err(AppError::new(StatusCode::BAD_REQUEST, anyhow!("count 必须大于 0")));
    }

    info!("正在搜索: {}", query);
    let start = Instant::now();

    // 客户端断开时 handler 被丢弃，守卫随之取消正在进行的扫描
    let cancel = CancelFlag::new();
    let _guard = cancel.drop_guard();
    let result = spawn_blocking({
        let state = state.clone();
        move || state.engine.search_text(&*state.encoder, &query, count, Some(&cancel))
    })
    .await??;

    Ok(Json(SearchResponse { time: start.elapsed().as_millis() as u64, result }))
}

/// 获取索引信息
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, body = StatsResponse),
    )
)]
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
) -> Result<Json<StatsResponse>> {
    check_token(&state, &token)?;
    Ok(Json(StatsResponse {
        photos: state.engine.len(),
        dim: state.engine.dim(),
        model: state.encoder.name().to_owned(),
    }))
}
