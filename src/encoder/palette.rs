use image::DynamicImage;
use ndarray::prelude::*;

use super::{EncodeError, Encoder, normalize};

/// 基本颜色词，向量的每一维对应其中一种
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black,
    White,
    Gray,
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Pink,
    Brown,
}

impl Color {
    pub const ALL: [Color; 11] = [
        Color::Black,
        Color::White,
        Color::Gray,
        Color::Red,
        Color::Orange,
        Color::Yellow,
        Color::Green,
        Color::Blue,
        Color::Purple,
        Color::Pink,
        Color::Brown,
    ];

    /// 颜色的代表 RGB 值
    pub fn rgb(self) -> [u8; 3] {
        match self {
            Color::Black => [0, 0, 0],
            Color::White => [255, 255, 255],
            Color::Gray => [128, 128, 128],
            Color::Red => [220, 20, 20],
            Color::Orange => [255, 140, 0],
            Color::Yellow => [255, 220, 0],
            Color::Green => [30, 160, 40],
            Color::Blue => [30, 70, 220],
            Color::Purple => [130, 40, 160],
            Color::Pink => [255, 150, 190],
            Color::Brown => [130, 80, 30],
        }
    }

    /// 距离给定像素最近的颜色
    pub fn nearest([r, g, b]: [u8; 3]) -> Color {
        let dist = |c: Color| {
            let [cr, cg, cb] = c.rgb();
            let (dr, dg, db) =
                (r as i32 - cr as i32, g as i32 - cg as i32, b as i32 - cb as i32);
            dr * dr + dg * dg + db * db
        };
        // min_by_key 在距离相等时返回第一个，结果是确定的
        Color::ALL.into_iter().min_by_key(|&c| dist(c)).unwrap_or(Color::Black)
    }
}

const ENGLISH_TERMS: &[(&str, Color)] = &[
    ("black", Color::Black),
    ("dark", Color::Black),
    ("night", Color::Black),
    ("white", Color::White),
    ("snow", Color::White),
    ("gray", Color::Gray),
    ("grey", Color::Gray),
    ("silver", Color::Gray),
    ("red", Color::Red),
    ("crimson", Color::Red),
    ("scarlet", Color::Red),
    ("fire", Color::Red),
    ("orange", Color::Orange),
    ("sunset", Color::Orange),
    ("yellow", Color::Yellow),
    ("gold", Color::Yellow),
    ("golden", Color::Yellow),
    ("sand", Color::Yellow),
    ("green", Color::Green),
    ("grass", Color::Green),
    ("forest", Color::Green),
    ("leaf", Color::Green),
    ("leaves", Color::Green),
    ("blue", Color::Blue),
    ("navy", Color::Blue),
    ("azure", Color::Blue),
    ("sky", Color::Blue),
    ("sea", Color::Blue),
    ("ocean", Color::Blue),
    ("purple", Color::Purple),
    ("violet", Color::Purple),
    ("pink", Color::Pink),
    ("brown", Color::Brown),
    ("wood", Color::Brown),
];

const CHINESE_TERMS: &[(char, Color)] = &[
    ('黑', Color::Black),
    ('夜', Color::Black),
    ('白', Color::White),
    ('雪', Color::White),
    ('灰', Color::Gray),
    ('银', Color::Gray),
    ('红', Color::Red),
    ('火', Color::Red),
    ('橙', Color::Orange),
    ('橘', Color::Orange),
    ('黄', Color::Yellow),
    ('金', Color::Yellow),
    ('绿', Color::Green),
    ('草', Color::Green),
    ('林', Color::Green),
    ('蓝', Color::Blue),
    ('天', Color::Blue),
    ('海', Color::Blue),
    ('紫', Color::Purple),
    ('粉', Color::Pink),
    ('棕', Color::Brown),
    ('褐', Color::Brown),
];

/// 颜色词编码器
///
/// 图片按缩略图中每个像素最接近的基本颜色统计直方图，文本按其中出现的颜色词统计，
/// 两者落在同一个 11 维空间内。不依赖任何模型文件。
#[derive(Debug, Clone)]
pub struct PaletteEncoder {
    /// 统计直方图前将图片缩放到的最大边长
    thumbnail_size: u32,
}

impl Default for PaletteEncoder {
    fn default() -> Self {
        Self { thumbnail_size: 32 }
    }
}

impl PaletteEncoder {
    pub fn dim(&self) -> usize {
        Color::ALL.len()
    }

    fn histogram(&self, image: &DynamicImage) -> Result<Array1<f32>, EncodeError> {
        let size = self.thumbnail_size;
        let thumb = if image.width() > size || image.height() > size {
            image.thumbnail(size, size).to_rgb8()
        } else {
            image.to_rgb8()
        };
        let mut hist = Array1::<f32>::zeros(self.dim());
        for pixel in thumb.pixels() {
            hist[Color::nearest(pixel.0) as usize] += 1.;
        }
        if !normalize(hist.view_mut()) {
            return Err(EncodeError::ZeroVector);
        }
        Ok(hist)
    }
}

impl Encoder for PaletteEncoder {
    fn name(&self) -> &str {
        "palette"
    }

    fn encode_images(&self, images: &[DynamicImage]) -> Result<Array2<f32>, EncodeError> {
        let mut features = Array2::zeros((images.len(), self.dim()));
        for (mut row, image) in features.outer_iter_mut().zip(images) {
            row.assign(&self.histogram(image)?);
        }
        Ok(features)
    }

    fn encode_text(&self, text: &str) -> Result<Array1<f32>, EncodeError> {
        let mut votes = Array1::<f32>::zeros(self.dim());
        let text = text.to_lowercase();

        for word in text.split(|c: char| !c.is_ascii_alphanumeric()) {
            if let Some((_, color)) = ENGLISH_TERMS.iter().find(|(term, _)| *term == word) {
                votes[*color as usize] += 1.;
            }
        }
        for ch in text.chars() {
            if let Some((_, color)) = CHINESE_TERMS.iter().find(|(term, _)| *term == ch) {
                votes[*color as usize] += 1.;
            }
        }

        if !normalize(votes.view_mut()) {
            return Err(EncodeError::Unsupported(format!("查询中没有可识别的颜色词: {}", text)));
        }
        Ok(votes)
    }
}
