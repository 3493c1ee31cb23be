use std::fmt::Display;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use image::DynamicImage;
use image::imageops::{self, FilterType};
use log::{debug, info};
use ndarray::Array4;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;

use super::{Embedder, EmbeddingVector};
use crate::config::Acceleration;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};

/// ViT 输入图片的边长
pub const VIT_INPUT_SIZE: u32 = 224;

// ViTImageProcessor 对 in21k 模型使用的归一化参数
const VIT_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const VIT_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// 基于 ONNX Runtime 的 ViT 特征提取器
///
/// 取 `last_hidden_state` 中 CLS token 的输出作为整张图片的特征
pub struct VitEmbedder {
    /// ONNX 会话，推理时需要独占
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    dimension: usize,
    context: ExecutionContext,
}

impl VitEmbedder {
    /// 从 ONNX 文件加载模型
    ///
    /// # Arguments
    ///
    /// * `path` - 模型文件路径
    /// * `dimension` - 期望的输出维度
    /// * `acceleration` - 是否尝试使用 CUDA 推理
    pub fn open(path: &Path, dimension: usize, acceleration: Acceleration) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "模型文件不存在: {}，请先将模型导出为 ONNX 格式",
                path.display()
            )));
        }

        let start = Instant::now();
        let context = probe_inference(acceleration);

        let mut builder = Session::builder()
            .map_err(ort_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error)?
            .with_intra_threads(num_cpus::get())
            .map_err(ort_error)?;
        if context == ExecutionContext::Accelerated {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(ort_error)?;
        }
        let session = builder.commit_from_file(path).map_err(ort_error)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "pixel_values".into());
        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name == "last_hidden_state")
            .or_else(|| session.outputs.first())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "last_hidden_state".into());

        info!("模型加载完成: {} ({})", path.display(), context);
        debug!("模型加载耗时: {:.2}s", start.elapsed().as_secs_f32());

        Ok(Self { session: Mutex::new(session), input_name, output_name, dimension, context })
    }
}

impl Embedder for VitEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn context(&self) -> ExecutionContext {
        self.context
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<EmbeddingVector> {
        let tensor =
            Tensor::from_array(pixel_values(image, VIT_INPUT_SIZE)).map_err(inference_error)?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(inference_error)?;
        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| Error::Inference(format!("模型没有输出 {}", self.output_name)))?;
        let (shape, data) = output.try_extract_tensor::<f32>().map_err(inference_error)?;

        // 输出形状为 (1, tokens, hidden) 或 (1, hidden)，两种情况下前 hidden 个值都是 CLS
        let hidden = shape.last().copied().unwrap_or(0) as usize;
        if hidden == 0 || data.len() < hidden {
            return Err(Error::Inference(format!("无法识别的模型输出形状: {:?}", &shape[..])));
        }
        let cls = data[..hidden].to_vec();
        drop(outputs);
        drop(session);

        EmbeddingVector::normalized(cls)
    }
}

/// 将图片转换为 ViT 的输入张量，格式为 NCHW
///
/// 处理步骤：转为 RGB，双线性缩放到 size x size，缩放到 [0, 1] 后按均值和方差归一化
pub fn pixel_values(image: &DynamicImage, size: u32) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let resized = imageops::resize(&rgb, size, size, FilterType::Triangle);

    let mut array = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            array[[0, c, y as usize, x as usize]] = (v - VIT_MEAN[c]) / VIT_STD[c];
        }
    }
    array
}

/// 探测推理可用的执行环境
fn probe_inference(acceleration: Acceleration) -> ExecutionContext {
    if acceleration == Acceleration::Off {
        return ExecutionContext::Baseline;
    }
    match CUDAExecutionProvider::default().is_available() {
        Ok(true) => {
            debug!("检测到 CUDA，推理使用 GPU");
            ExecutionContext::Accelerated
        }
        Ok(false) => {
            debug!("未检测到可用 GPU，推理使用 CPU");
            ExecutionContext::Baseline
        }
        Err(e) => {
            debug!("探测 CUDA 失败，推理使用 CPU: {e}");
            ExecutionContext::Baseline
        }
    }
}

fn ort_error(e: impl Display) -> Error {
    Error::Config(format!("ONNX Runtime: {e}"))
}

fn inference_error(e: impl Display) -> Error {
    Error::Inference(format!("ONNX Runtime: {e}"))
}
