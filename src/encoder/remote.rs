use std::io::Cursor;
use std::sync::OnceLock;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat};
use log::debug;
use ndarray::prelude::*;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{EncodeError, Encoder, normalize};

#[derive(Debug, Default, Serialize)]
pub struct EmbedRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub texts: Vec<String>,
    /// base64 编码的 PNG 图片
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
}

/// 远程编码服务
///
/// 向 `{url}/embed` 发送 JSON 请求，服务端返回每个输入对应的向量。
/// 返回的向量会在本地重新归一化。
/// 该类型内部使用阻塞的 HTTP 客户端，不能直接在异步上下文中调用。
pub struct RemoteEncoder {
    endpoint: String,
    client: Client,
    /// 第一次请求时确定的向量维度
    dim: OnceLock<usize>,
}

impl RemoteEncoder {
    pub fn new(url: &str) -> Result<Self, EncodeError> {
        let client = Client::builder().timeout(Duration::from_secs(300)).build()?;
        let endpoint = format!("{}/embed", url.trim_end_matches('/'));
        Ok(Self { endpoint, client, dim: OnceLock::new() })
    }

    fn embed(&self, request: &EmbedRequest, expected: usize) -> Result<Array2<f32>, EncodeError> {
        debug!("请求远程编码: {} ({} 条)", self.endpoint, expected);
        let response: EmbedResponse =
            self.client.post(&self.endpoint).json(request).send()?.error_for_status()?.json()?;
        self.to_matrix(response.embeddings, expected)
    }

    /// 检查返回的向量数量与维度，并归一化每一行
    fn to_matrix(&self, embeddings: Vec<Vec<f32>>, expected: usize) -> Result<Array2<f32>, EncodeError> {
        if embeddings.len() != expected {
            return Err(EncodeError::Malformed(format!(
                "请求 {} 条，返回 {} 条",
                expected,
                embeddings.len()
            )));
        }
        let Some(d) = embeddings.first().map(Vec::len) else {
            return Ok(Array2::zeros((0, self.dim.get().copied().unwrap_or(0))));
        };
        let known = *self.dim.get_or_init(|| d);
        if d != known || embeddings.iter().any(|v| v.len() != d) {
            return Err(EncodeError::Malformed(format!("向量维度不一致，预期 {}", known)));
        }

        let mut matrix = Array2::zeros((expected, d));
        for (mut row, v) in matrix.outer_iter_mut().zip(embeddings) {
            row.assign(&ArrayView1::from(&v));
            if !normalize(row) {
                return Err(EncodeError::ZeroVector);
            }
        }
        Ok(matrix)
    }
}

impl Encoder for RemoteEncoder {
    fn name(&self) -> &str {
        &self.endpoint
    }

    fn encode_images(&self, images: &[DynamicImage]) -> Result<Array2<f32>, EncodeError> {
        let images = images
            .iter()
            .map(|image| {
                let mut buf = Vec::new();
                image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
                Ok(STANDARD.encode(&buf))
            })
            .collect::<Result<Vec<_>, EncodeError>>()?;
        let n = images.len();
        self.embed(&EmbedRequest { images, ..Default::default() }, n)
    }

    fn encode_text(&self, text: &str) -> Result<Array1<f32>, EncodeError> {
        let request = EmbedRequest { texts: vec![text.to_owned()], ..Default::default() };
        let matrix = self.embed(&request, 1)?;
        Ok(matrix.row(0).to_owned())
    }
}
