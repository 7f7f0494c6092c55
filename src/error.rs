use std::path::PathBuf;

use crate::encoder::EncodeError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 索引流水线与搜索引擎的错误类型
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 批次中有图片无法解码，整个批次被跳过，下次运行时重试
    #[error("批次 {batch} 中的图片无法解码: {path}: {source}")]
    BatchDecode {
        batch: usize,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// 编码器调用失败
    #[error("编码器错误: {0}")]
    Encoder(#[from] EncodeError),

    /// 批次产物不完整或不一致，继续合并会导致向量与标识错位
    #[error("批次 {batch} 已损坏: {reason}")]
    CorruptBatch { batch: usize, reason: String },

    /// 合并后的索引文件缺失
    #[error("索引文件不存在: {}", .0.display())]
    IndexMissing(PathBuf),

    /// 索引中没有任何向量
    #[error("索引为空")]
    EmptyIndex,

    /// 合并后的索引行数与标识数量不一致
    #[error("索引已损坏: {rows} 行特征, {ids} 个标识")]
    CorruptIndex { rows: usize, ids: usize },

    /// 查询向量维度与索引维度不一致
    #[error("向量维度不一致: 索引为 {expected}, 查询为 {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// 查询在扫描途中被取消
    #[error("查询已取消")]
    Cancelled,

    /// 已有批次产物与当前配置不匹配
    #[error("特征目录使用 batch_size={found} 生成，当前配置为 {configured}，请清空目录后重新处理")]
    StaleConfig { found: usize, configured: usize },

    /// 标识表格式错误
    #[error("无法解析标识文件 {}: {reason}", path.display())]
    IdsFormat { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error(transparent)]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
