use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 搜索请求参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    /// 查询文本
    pub query: String,
    /// 返回的结果数量，默认使用配置中的 display_num
    pub count: Option<usize>,
}

/// 搜索响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u64,
    /// 搜索结果，格式为 `(相似度, 图片路径)`，相似度从高到低
    pub result: Vec<(f32, String)>,
}

/// 索引信息
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    /// 索引中的图片数量
    pub photos: usize,
    /// 向量维度
    pub dim: usize,
    /// 编码模型
    pub model: String,
}
