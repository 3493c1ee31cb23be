#![allow(dead_code)]

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use vitsearch::error::{Error, Result};
use vitsearch::{Embedder, EmbeddingVector};

/// 缩放后的像素值作为特征，维度为 8 * 8 * 3
pub struct PixelEmbedder;

pub const PIXEL_DIMENSION: usize = 8 * 8 * 3;

impl Embedder for PixelEmbedder {
    fn dimension(&self) -> usize {
        PIXEL_DIMENSION
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<EmbeddingVector> {
        let small = imageops::resize(&image.to_rgb8(), 8, 8, FilterType::Triangle);
        let raw = small.pixels().flat_map(|p| p.0).map(|v| v as f32 / 255.0 - 0.5).collect();
        EmbeddingVector::normalized(raw)
    }
}

/// 对文件名包含 `bad` 的图片返回失败
pub struct PickyEmbedder;

impl Embedder for PickyEmbedder {
    fn dimension(&self) -> usize {
        PIXEL_DIMENSION
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<EmbeddingVector> {
        PixelEmbedder.embed_image(image)
    }

    fn extract(&self, path: &Path) -> Result<EmbeddingVector> {
        if path.to_string_lossy().contains("bad") {
            return Err(Error::extract(path.to_string_lossy(), "rejected"));
        }
        PixelEmbedder.extract(path)
    }
}

/// 输出维度与声明不符
pub struct ShortEmbedder;

impl Embedder for ShortEmbedder {
    fn dimension(&self) -> usize {
        PIXEL_DIMENSION
    }

    fn embed_image(&self, _image: &DynamicImage) -> Result<EmbeddingVector> {
        EmbeddingVector::normalized(vec![1.0; 16])
    }
}

/// 生成一张带有独特图案的图片
pub fn pattern(seed: u32) -> RgbImage {
    RgbImage::from_fn(32, 32, |x, y| {
        let r = (x * (seed + 3) * 7) % 256;
        let g = (y * (seed + 5) * 11) % 256;
        let b = ((x + y) * (seed + 1) * 13 + seed * 40) % 256;
        Rgb([r as u8, g as u8, b as u8])
    })
}

/// 在目录中写入 n 张不同的 png 图片，返回按文件名排序的路径
pub fn write_images(dir: &Path, n: u32) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            let path = dir.join(format!("img{i:02}.png"));
            pattern(i).save(&path).unwrap();
            path
        })
        .collect()
}
