mod palette;
mod remote;

use std::sync::Arc;

use image::DynamicImage;
use log::info;
use ndarray::prelude::*;

pub use self::palette::*;
pub use self::remote::*;

/// 编码器错误
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// 未知的模型名称
    #[error("未知的模型: {0}")]
    UnknownModel(String),
    /// 输入无法被当前模型编码
    #[error("无法编码: {0}")]
    Unsupported(String),
    /// 编码结果为零向量，无法归一化
    #[error("编码结果为零向量")]
    ZeroVector,
    /// 编码结果数量或维度与输入不符
    #[error("编码结果不符合预期: {0}")]
    Malformed(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// 文本与图片共享同一向量空间的编码器
///
/// 所有返回的向量都必须是单位向量，相似度直接使用点积计算
pub trait Encoder: Send + Sync {
    /// 模型名称
    fn name(&self) -> &str;

    /// 编码一批图片，返回 `images.len() x D` 的矩阵，行顺序与输入一致
    fn encode_images(&self, images: &[DynamicImage]) -> Result<Array2<f32>, EncodeError>;

    /// 编码一条文本查询
    fn encode_text(&self, text: &str) -> Result<Array1<f32>, EncodeError>;
}

/// 根据配置中的模型名称加载编码器
///
/// - `palette`：内置的颜色词编码器
/// - `http://...` / `https://...`：远程编码服务
pub fn load_encoder(model: &str) -> Result<Arc<dyn Encoder>, EncodeError> {
    let encoder: Arc<dyn Encoder> = match model {
        "palette" => Arc::new(PaletteEncoder::default()),
        url if url.starts_with("http://") || url.starts_with("https://") => {
            Arc::new(RemoteEncoder::new(url)?)
        }
        other => return Err(EncodeError::UnknownModel(other.to_owned())),
    };
    info!("加载编码器: {}", encoder.name());
    Ok(encoder)
}

/// 原地归一化向量，零向量或包含非有限值时返回 false
pub fn normalize(mut v: ArrayViewMut1<f32>) -> bool {
    let norm = v.dot(&v).sqrt();
    if !norm.is_finite() || norm == 0. {
        return false;
    }
    v.mapv_inplace(|x| x / norm);
    true
}
