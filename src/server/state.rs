use std::sync::Arc;

use crate::encoder::Encoder;
use crate::search::SearchEngine;

/// 应用状态
pub struct AppState {
    /// 已加载的索引
    pub engine: Arc<SearchEngine>,
    /// 文本编码器
    pub encoder: Arc<dyn Encoder>,
    /// 默认返回的结果数量
    pub display_num: usize,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        engine: SearchEngine,
        encoder: Arc<dyn Encoder>,
        display_num: usize,
        token: String,
    ) -> Arc<Self> {
        Arc::new(AppState { engine: Arc::new(engine), encoder, display_num, token })
    }
}
