mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;
pub use self::types::*;

#[derive(OpenApi)]
#[openapi(
    paths(api::search_handler, api::stats_handler),
    components(schemas(SearchRequest, SearchResponse, StatsResponse))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", post(api::search_handler))
        .route("/stats", get(api::stats_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // 查询只有一段文本，64K 足够
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(state)
}
