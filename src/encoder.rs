use anyhow::Result;
use image::DynamicImage;
use image::imageops::FilterType;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::archive::{EMBEDDING_DIM, Embedding};
use crate::config::ComputeOptions;
use crate::error::Error;

/// 将图片和文本编码到同一个向量空间
///
/// 预处理（缩放、裁剪、格式转换）由实现自行完成
pub trait Encoder {
    /// 输出向量的维数
    fn dim(&self) -> usize;

    /// 编码一张图片
    fn encode_image(&self, image: &DynamicImage) -> Result<Embedding>;

    /// 批量编码图片，返回的向量与输入一一对应
    fn encode_images(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>> {
        images.iter().map(|image| self.encode_image(image)).collect()
    }

    /// 编码一段文本
    fn encode_text(&self, text: &str) -> Result<Embedding>;
}

const THUMB_WIDTH: u32 = 32;
const THUMB_HEIGHT: u32 = 16;

/// 内置的缩略图编码器
///
/// 将图片转为灰度并缩放到 32x16，得到 512 维的亮度向量并归一化。
/// 只能用于以图搜图，不支持文本查询。
pub struct ThumbnailEncoder {
    pool: ThreadPool,
}

impl ThumbnailEncoder {
    pub fn new(opts: &ComputeOptions) -> Result<Self> {
        let pool = ThreadPoolBuilder::new().num_threads(opts.threads.max(1)).build()?;
        Ok(Self { pool })
    }
}

impl Encoder for ThumbnailEncoder {
    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn encode_image(&self, image: &DynamicImage) -> Result<Embedding> {
        let thumb = image.resize_exact(THUMB_WIDTH, THUMB_HEIGHT, FilterType::Triangle).to_luma8();
        let mut v = thumb.as_raw().iter().map(|&p| p as f32 / 255.).collect::<Vec<_>>();
        normalize(&mut v);
        Ok(v)
    }

    fn encode_images(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>> {
        self.pool.install(|| images.par_iter().map(|image| self.encode_image(image)).collect())
    }

    fn encode_text(&self, _text: &str) -> Result<Embedding> {
        Err(Error::UnsupportedQuery("文本").into())
    }
}

/// L2 归一化，全零向量会被替换为均匀向量
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    } else if !v.is_empty() {
        let fill = 1. / (v.len() as f32).sqrt();
        v.iter_mut().for_each(|x| *x = fill);
    }
}
