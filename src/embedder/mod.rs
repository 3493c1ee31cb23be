mod vit;

use std::ops::Deref;
use std::path::Path;

use image::DynamicImage;
use serde::Serialize;
pub use vit::*;

use crate::context::ExecutionContext;
use crate::error::{Error, Result};

/// 归一化时加在范数上的常数，避免除零
pub const NORM_EPSILON: f32 = 1e-6;

/// 经过 L2 归一化的图像特征向量
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    /// 将原始模型输出除以其欧氏范数，得到单位向量
    ///
    /// 含有 NaN 或无穷大的输入会被拒绝
    pub fn normalized(mut raw: Vec<f32>) -> Result<Self> {
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteVector);
        }
        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in raw.iter_mut() {
            *x /= norm + NORM_EPSILON;
        }
        Ok(Self(raw))
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl Deref for EmbeddingVector {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl AsRef<[f32]> for EmbeddingVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// 图像特征提取器
///
/// 实现者只需要提供 `embed_image`，文件和字节的解码由默认实现完成。
/// 提取失败时返回 [`Error::Extract`]，由调用方决定跳过还是终止。
pub trait Embedder: Send + Sync {
    /// 输出向量的维度
    fn dimension(&self) -> usize;

    /// 推理使用的执行环境
    fn context(&self) -> ExecutionContext {
        ExecutionContext::Baseline
    }

    /// 对已解码的图片提取特征
    fn embed_image(&self, image: &DynamicImage) -> Result<EmbeddingVector>;

    /// 读取并解码图片文件，然后提取特征
    fn extract(&self, path: &Path) -> Result<EmbeddingVector> {
        let name = path.to_string_lossy();
        let image = image::open(path).map_err(|e| Error::extract(name.as_ref(), e))?;
        self.embed_image(&image).map_err(|e| match e {
            Error::Extract { .. } => e,
            e => Error::extract(name.as_ref(), e),
        })
    }

    /// 解码内存中的图片数据，然后提取特征
    ///
    /// 推理失败保持为 [`Error::Inference`]，其余错误都归为图片本身的问题
    fn extract_bytes(&self, bytes: &[u8]) -> Result<EmbeddingVector> {
        let image = image::load_from_memory(bytes).map_err(|e| Error::extract("<upload>", e))?;
        self.embed_image(&image).map_err(|e| match e {
            Error::Extract { .. } | Error::Inference(_) => e,
            e => Error::extract("<upload>", e),
        })
    }
}
