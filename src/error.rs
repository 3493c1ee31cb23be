use std::path::PathBuf;

use thiserror::Error;

/// vitsearch 的错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// 配置错误，构建或启动时直接终止
    #[error("配置错误: {0}")]
    Config(String),

    /// 请求参数不合法
    #[error("无效的请求: {0}")]
    InvalidRequest(String),

    #[error("不支持的相似度度量: {0}")]
    UnsupportedMetric(String),

    /// 特征维度与索引维度不一致
    #[error("特征维度不匹配: 期望 {expected}, 得到 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 模型推理失败，属于服务端错误
    #[error("模型推理失败: {0}")]
    Inference(String),

    #[error("向量包含非有限值")]
    NonFiniteVector,

    /// 单张图片的特征提取失败
    #[error("处理图像 {path} 时出错: {reason}")]
    Extract { path: String, reason: String },

    #[error("数据目录不存在: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("数据目录 {} 中没有找到支持的图像文件", .0.display())]
    EmptySource(PathBuf),

    #[error("未能成功提取任何特征，无法构建索引")]
    NoEmbeddings,

    /// 索引文件或映射文件不存在
    #[error("{kind}文件未找到: {}，请先运行 `vitsearch build` 构建索引", .path.display())]
    MissingArtifact { kind: &'static str, path: PathBuf },

    /// 索引文件与映射文件数量或校验和不一致
    #[error("索引文件与映射文件不一致: {0}，请重新运行 `vitsearch build`")]
    InconsistentArtifact(String),

    #[error("索引文件损坏: {0}")]
    CorruptArtifact(String),

    #[error("查询向量维度 ({actual}) 与索引维度 ({expected}) 不匹配")]
    QueryDimension { expected: usize, actual: usize },

    /// 查询已被新的查询取代
    #[error("查询已取消")]
    Cancelled,

    /// 后台任务异常退出
    #[error("查询任务异常退出: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}

impl Error {
    /// 构造一个与图片路径关联的特征提取错误
    pub fn extract(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Extract { path: path.into(), reason: reason.to_string() }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
